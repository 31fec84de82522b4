//! Shared enums for targets, managers and streams.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Visibility stage of a target.
///
/// Only `Public` targets take part in engine-only assignment. `Private` and
/// `Beta` targets are served when a core asks for them by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Never assigned.
    Disabled,
    /// Assigned only on explicit request.
    #[default]
    Private,
    /// Assigned only on explicit request.
    Beta,
    /// Part of the weighted pool.
    Public,
}

impl Stage {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Private => "private",
            Self::Beta => "beta",
            Self::Public => "public",
        }
    }

    /// Whether a target in this stage can be handed to a core that named it.
    #[must_use]
    pub const fn is_assignable(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "private" => Ok(Self::Private),
            "beta" => Ok(Self::Beta),
            "public" => Ok(Self::Public),
            other => Err(CoreError::InvalidValue(format!("unknown stage {other}"))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a manager account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May manage other managers and engine keys.
    Admin,
    /// May manage its own targets and streams.
    #[default]
    Manager,
}

impl Role {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
        }
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            other => Err(CoreError::InvalidValue(format!("unknown role {other}"))),
        }
    }
}

/// Persistent status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StreamStatus {
    /// Enabled: queued or active.
    #[default]
    #[serde(rename = "OK")]
    Ok,
    /// Disabled by its manager.
    #[serde(rename = "STOPPED")]
    Stopped,
}

impl StreamStatus {
    /// Uppercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Stopped => "STOPPED",
        }
    }
}

impl FromStr for StreamStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(CoreError::InvalidValue(format!(
                "unknown stream status {other}"
            ))),
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
