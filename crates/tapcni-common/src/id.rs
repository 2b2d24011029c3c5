//! Container ID validation and TAP device naming.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TapError, TapResult};

/// A validated container ID, as supplied by the container runtime.
///
/// Container IDs must:
/// - Be 1-128 characters long
/// - Contain only alphanumeric characters, hyphens, underscores and periods
/// - Start with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Maximum length of a container ID.
    pub const MAX_LENGTH: usize = 128;

    /// Create a new container ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> TapResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the container ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> TapResult<()> {
        let invalid = || TapError::config(format!("invalid container ID: {id:?}"));

        if id.is_empty() || id.len() > Self::MAX_LENGTH {
            return Err(invalid());
        }

        if !id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid());
        }

        Ok(())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = TapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of a kernel network interface.
///
/// Names are limited to 15 bytes (`IFNAMSIZ - 1`) and may not contain
/// `/`, `:` or whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName(String);

impl DeviceName {
    /// Maximum interface name length in bytes.
    pub const MAX_LENGTH: usize = 15;

    /// Prefix of every device created for a container.
    pub const PREFIX: &'static str = "tap";

    /// Number of container ID characters used in the device name.
    pub const ID_CHARS: usize = 5;

    /// Create a device name, validating it against kernel rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long or contains
    /// forbidden characters.
    pub fn new(name: impl Into<String>) -> TapResult<Self> {
        let name = name.into();
        if name.is_empty()
            || name.len() > Self::MAX_LENGTH
            || name == "."
            || name == ".."
            || name
                .chars()
                .any(|c| c == '/' || c == ':' || c.is_whitespace())
        {
            return Err(TapError::config(format!("invalid device name: {name:?}")));
        }
        Ok(Self(name))
    }

    /// Derive the device name for a container.
    ///
    /// The name is `tap` followed by the first five characters of the
    /// container ID, so ADD and DEL of the same container agree on it.
    /// Two containers sharing a five character prefix collide.
    ///
    /// # Errors
    ///
    /// Returns an error if the container ID is shorter than five characters.
    pub fn for_container(id: &ContainerId) -> TapResult<Self> {
        let prefix = id.as_str().get(..Self::ID_CHARS).ok_or_else(|| {
            TapError::config(format!(
                "container ID {id} is shorter than {} characters",
                Self::ID_CHARS
            ))
        })?;
        Self::new(format!("{}{prefix}", Self::PREFIX))
    }

    /// Get the device name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceName {
    type Err = TapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceName {
    type Error = TapError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceName> for String {
    fn from(name: DeviceName) -> Self {
        name.0
    }
}

impl AsRef<str> for DeviceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
