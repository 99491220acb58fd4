//! Operation identifier allocation.

use serde::Serialize;
use uuid::Uuid;

/// Correlates a Before event with its terminal event.
///
/// A random (v4) UUID per announced operation. The nil UUID is reserved as
/// the "nothing was announced" sentinel and is never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// The sentinel for operations that were not announced.
    pub const EMPTY: Self = Self(Uuid::nil());

    /// Allocates a fresh identifier.
    ///
    /// Safe to call from any thread without coordination; uniqueness comes
    /// from 122 random bits rather than from shared state.
    pub fn allocate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether this is the [`OperationId::EMPTY`] sentinel.
    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<OperationId> for Uuid {
    fn from(id: OperationId) -> Self {
        id.0
    }
}
