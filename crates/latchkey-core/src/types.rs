//! Core data model shared by the daemon, the store, and the CLI

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default background-duration timeout before the session must re-authenticate
pub const DEFAULT_BACKGROUND_TIMEOUT_MS: u64 = 30_000;

/// Default number of wrong PINs before an intruder capture is taken
pub const DEFAULT_ATTEMPT_THRESHOLD: u32 = 3;

/// The entity currently holding foreground focus
///
/// `id` is the stable opaque identifier reported by the host (a package or
/// bundle name); `display_name` is the human-readable label, which falls back
/// to the id when the host cannot resolve one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
}

impl Identity {
    /// Create an identity with a resolved label
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Create an identity whose label is its id
    pub fn unlabeled(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }

    /// Validate a raw identifier coming from a user or the wire
    pub fn validate_id(id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(CoreError::InvalidIdentity("identifier is empty".to_string()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidIdentity(format!(
                "identifier '{}' contains whitespace",
                id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.display_name == self.id {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.display_name, self.id)
        }
    }
}

/// Identities subject to a challenge when they come to the foreground
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockSet(HashSet<String>);

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Returns true if the identity was not already locked
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    /// Returns true if the identity was locked
    pub fn remove(&mut self, id: &str) -> bool {
        self.0.remove(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Locked identifiers in lexical order
    pub fn sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.iter().cloned().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<String> for LockSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Global lock switch and background-duration timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// When false no challenge is ever triggered
    pub enabled: bool,
    /// Time the session may spend in the background before re-authentication
    pub background_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            background_timeout_ms: DEFAULT_BACKGROUND_TIMEOUT_MS,
        }
    }
}

/// The shared secret guarding every challenge
///
/// `pin` holds an Argon2id PHC string, never the PIN itself.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub pin: String,
    pub is_set: bool,
}

impl Secret {
    /// A secret holding the given PHC hash
    pub fn from_hash(hash: String) -> Self {
        Self {
            pin: hash,
            is_set: true,
        }
    }

    /// The cleared secret left behind by a credential reset
    pub fn unset() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("pin", &"<redacted>")
            .field("is_set", &self.is_set)
            .finish()
    }
}

/// Intruder photo settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntruderDetectionConfig {
    pub enabled: bool,
    /// Wrong attempts within one challenge before each capture
    pub attempt_threshold: u32,
}

impl Default for IntruderDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            attempt_threshold: DEFAULT_ATTEMPT_THRESHOLD,
        }
    }
}

impl IntruderDetectionConfig {
    pub fn new(enabled: bool, attempt_threshold: u32) -> Result<Self> {
        if attempt_threshold == 0 {
            return Err(CoreError::InvalidThreshold(attempt_threshold));
        }
        Ok(Self {
            enabled,
            attempt_threshold,
        })
    }

    /// Whether a wrong attempt with this running count warrants a capture
    pub fn should_capture(&self, attempt_count: u32) -> bool {
        self.enabled && attempt_count >= self.attempt_threshold
    }
}

/// A persisted tamper-evidence entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Monotonic, derived from the capture time in milliseconds
    pub id: u64,
    /// Absent when the device or permission was unavailable
    pub image_path: Option<String>,
    pub subject: Identity,
    /// Unix epoch milliseconds
    pub timestamp: u64,
    pub attempt_count: u32,
}
