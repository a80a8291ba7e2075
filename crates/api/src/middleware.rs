use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use stocklot_core::UserId;

use crate::app::errors;
use crate::context::ActorContext;

/// Header carrying the authenticated user's id.
///
/// Session management lives in an upstream collaborator; this header is its
/// hand-off point. Requests without a valid actor are rejected before any
/// handler runs.
pub const ACTOR_HEADER: &str = "x-actor-id";

pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let actor = match extract_actor(req.headers()) {
        Ok(actor) => actor,
        Err(message) => {
            return errors::json_error(StatusCode::UNAUTHORIZED, "not_authenticated", message);
        }
    };

    req.extensions_mut().insert(ActorContext::new(actor));

    next.run(req).await
}

fn extract_actor(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(ACTOR_HEADER)
        .ok_or("missing x-actor-id header")?
        .to_str()
        .map_err(|_| "malformed x-actor-id header")?;

    header
        .trim()
        .parse()
        .map_err(|_| "x-actor-id is not a valid user id")
}
