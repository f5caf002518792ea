//! Validator address type with `pal_` prefix.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A validator address, always prefixed with `pal_`.
///
/// Derived from the validator's Ed25519 public key by
/// `palisade_crypto::derive_address` (base32 key + Blake2b checksum).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorAddress(String);

impl ValidatorAddress {
    /// The standard prefix for all validator addresses.
    pub const PREFIX: &'static str = "pal_";

    /// Create a new address from a raw string.
    ///
    /// # Panics
    /// Panics if the string does not start with `pal_`.
    pub fn new(raw: impl Into<String>) -> Self {
        let s = raw.into();
        assert!(s.starts_with(Self::PREFIX), "address must start with pal_");
        Self(s)
    }

    /// Parse an address, returning `None` if the prefix is missing.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let s = raw.into();
        if s.starts_with(Self::PREFIX) && s.len() > Self::PREFIX.len() {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Return the raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate that this address is well-formed.
    pub fn is_valid(&self) -> bool {
        self.0.starts_with(Self::PREFIX) && self.0.len() > Self::PREFIX.len()
    }
}

impl fmt::Display for ValidatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
