//! Exposure identifiers
//!
//! Exposure ids are opaque strings of the form `exp_<16 hex chars>`. They are
//! generated once at creation and never change; resource names in the proxy
//! configuration are derived from them.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::Error;

const EXPOSURE_ID_PREFIX: &str = "exp_";
const EXPOSURE_ID_HEX_LEN: usize = 16;

/// Unique identifier for an exposure
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ExposureId(String);

impl ExposureId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        let mut bytes = [0u8; EXPOSURE_ID_HEX_LEN / 2];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("{}{}", EXPOSURE_ID_PREFIX, hex::encode(bytes)))
    }

    /// Wrap an existing string without checking its shape (persisted records)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Parse and validate an id string
    pub fn parse(s: &str) -> Result<Self, Error> {
        let suffix = s
            .strip_prefix(EXPOSURE_ID_PREFIX)
            .ok_or_else(|| Error::validation(format!("exposure id '{}' must start with 'exp_'", s)))?;

        if suffix.len() != EXPOSURE_ID_HEX_LEN || !suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::validation(format!(
                "exposure id '{}' must end with {} hex characters",
                s, EXPOSURE_ID_HEX_LEN
            )));
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ExposureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExposureId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ExposureId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ExposureId> for String {
    fn from(id: ExposureId) -> Self {
        id.0
    }
}
