//! Status enums for marketplace entities.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a cart line is fulfilled.
///
/// `Basic` lines are assigned to a provider automatically by the backend;
/// `Direct` lines are booked with a provider the customer picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMode {
    /// Customer chose a specific provider; the line carries a provider id.
    Direct,
    /// Provider is assigned automatically; any provider id is ignored.
    #[default]
    Basic,
}

impl FulfillmentMode {
    /// Stable lowercase name used in storage and line keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Basic => "basic",
        }
    }

    /// Whether lines in this mode are tied to a specific provider.
    #[must_use]
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::Direct)
    }
}

impl std::fmt::Display for FulfillmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`FulfillmentMode`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid fulfillment mode: {0}")]
pub struct ParseModeError(pub String);

impl std::str::FromStr for FulfillmentMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "basic" => Ok(Self::Basic),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}
