use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stocklot_infra::command_dispatcher::DispatchError;
use stocklot_stock::MovementKind;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DispatchError::InsufficientStock(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "insufficient_stock", msg)
        }
        DispatchError::NotAuthenticated => json_error(
            StatusCode::UNAUTHORIZED,
            "not_authenticated",
            "no acting user",
        ),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_movement_kind(s: &str) -> Result<MovementKind, axum::response::Response> {
    s.parse::<MovementKind>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_movement_kind",
            "kind must be one of: purchase, sale, adjustment, transfer_in, transfer_out",
        )
    })
}
