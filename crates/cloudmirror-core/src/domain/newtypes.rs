//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers that flow through a sync run.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// EventId
// ============================================================================

/// Monotonically assigned identity of a change event
///
/// Zero means "not yet assigned"; such a change is ephemeral and cannot be
/// sent to the remote service.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// The unassigned event id
    pub const UNASSIGNED: EventId = EventId(0);

    /// Wrap a raw event id
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Returns true once the index has assigned this event an identity
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ============================================================================
// SyncId
// ============================================================================

/// Opaque sync checkpoint handed out by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncId(String);

impl SyncId {
    /// Create a new SyncId, rejecting blank values
    ///
    /// # Errors
    /// Returns `DomainError::InvalidId` if the value is empty or whitespace
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::InvalidId("Sync id cannot be blank".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SyncId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// CorrelationId
// ============================================================================

/// Identity of one in-flight download, also used as its staging file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Create a new random CorrelationId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid CorrelationId: {e}")))
    }
}
