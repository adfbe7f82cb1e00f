//! Protection of configured containers from destructive operations.

use dsm_common::ContainerIdentity;
use std::collections::BTreeSet;

/// True iff the block-set names the container's id, name or image exactly.
pub fn is_protected<'a, I>(identity: &ContainerIdentity, blockset: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    blockset.into_iter().any(|entry| {
        *entry == identity.id || *entry == identity.name || *entry == identity.image
    })
}

/// The configured block-set. Gates stop, restart and update; start is never gated.
#[derive(Debug, Clone, Default)]
pub struct ProtectionGuard {
    entries: BTreeSet<String>,
}

impl ProtectionGuard {
    pub fn new(entries: impl IntoIterator<Item = String>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn is_protected(&self, identity: &ContainerIdentity) -> bool {
        is_protected(identity, &self.entries)
    }

    pub fn entries(&self) -> &BTreeSet<String> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
