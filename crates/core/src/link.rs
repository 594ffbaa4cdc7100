//! Per-user file link lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a user's link to a piece of content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Visible to the owner; counts as a reference.
    Active,
    /// In the owner's recycle bin; does not count as a reference.
    Recycled,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Recycled => "recycled",
        }
    }
}

impl FromStr for LinkStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "recycled" => Ok(Self::Recycled),
            other => Err(crate::Error::InvalidStatus(format!(
                "unknown link status: {other}"
            ))),
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
