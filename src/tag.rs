use crate::indices::{SharedTypeIndex, TagAddr};
use crate::store::Store;
use core::sync::atomic::{AtomicU64, Ordering};

// Identities are minted process-wide so that a tag keeps matching after it
// has been exported, imported, and re-exported across any chain of instances.
static NEXT_TAG_IDENTITY: AtomicU64 = AtomicU64::new(1);

pub(crate) fn mint_tag_identity() -> u64 {
    NEXT_TAG_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

/// An exception tag owned by a store.
///
/// Catch clauses match thrown exceptions on `identity`, never on the tag's
/// store address or signature, so structurally identical tags from different
/// modules stay distinct.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TagInstance {
    /// The tag's signature (a function type; results are empty).
    pub ty: SharedTypeIndex,
    /// The process-unique identity, preserved across import/export.
    pub identity: u64,
}

/// A handle to an exception tag within some store.
#[derive(Debug, Clone, Copy)]
pub struct Tag(TagAddr);

impl Tag {
    pub(crate) fn from_addr(addr: TagAddr) -> Self {
        Self(addr)
    }

    pub(crate) fn addr(&self) -> TagAddr {
        self.0
    }

    /// The process-unique identity catches match on.
    pub fn identity(&self, store: &Store) -> u64 {
        store.tag(self.0).identity
    }
}
