use serde::{Deserialize, Serialize};

/// Kind of a stock movement, as recorded in the movement ledger and the
/// live stock log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Purchase,
    Sale,
    Adjustment,
    TransferIn,
    TransferOut,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Purchase => "purchase",
            MovementKind::Sale => "sale",
            MovementKind::Adjustment => "adjustment",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::TransferOut => "transfer_out",
        }
    }

    /// Transfer legs are produced only by transfer commands, never supplied
    /// directly by an adjustment.
    pub fn is_transfer(&self) -> bool {
        matches!(self, MovementKind::TransferIn | MovementKind::TransferOut)
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "purchase" => Ok(MovementKind::Purchase),
            "sale" => Ok(MovementKind::Sale),
            "adjustment" => Ok(MovementKind::Adjustment),
            "transfer_in" => Ok(MovementKind::TransferIn),
            "transfer_out" => Ok(MovementKind::TransferOut),
            other => Err(format!("unknown movement kind: {other}")),
        }
    }
}
