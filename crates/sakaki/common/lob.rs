//! References to large objects stored in the external datastore.
//!
//! Records never embed LOB content; they carry a fixed-size reference that
//! is either still unresolved (the content lives in a session-local staging
//! area) or resolved to a datastore-assigned id.

use serde::{Deserialize, Serialize};

pub type LobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LobKind {
    Blob,
    Clob,
}

/// Fixed-size reference to a blob or clob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LobReference {
    pub id: LobId,
    pub kind: LobKind,
    pub resolved: bool,
}

impl LobReference {
    /// A reference to content not yet registered with the datastore.
    pub fn unresolved(kind: LobKind) -> Self {
        Self { id: 0, kind, resolved: false }
    }

    pub fn resolved(id: LobId, kind: LobKind) -> Self {
        Self { id, kind, resolved: true }
    }
}
