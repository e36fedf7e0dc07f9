//! Outcome of propagating an IP block or unblock to every actor seen at the address.

use std::net::IpAddr;

use serde::Serialize;

use helpdesk_core::{ActorId, IpBlockId, SanctionId};

use crate::sanction::{IpBlock, Sanction};
use crate::store::{BulkUpdate, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeDirection {
    /// Pointers set to the `BLOCK_IP` sanction.
    Block,
    /// Pointers referencing the `BLOCK_IP` sanction cleared.
    Unblock,
}

/// Per-actor result of one cascade.
///
/// `failed` actors were not touched; the caller may retry them with
/// [`crate::ModerationEngine::resume_cascade`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub ip: IpAddr,
    pub ip_block: IpBlockId,
    /// The `BLOCK_IP` sanction the cascade moves pointers to or from.
    pub sanction: SanctionId,
    pub direction: CascadeDirection,
    pub updated: Vec<ActorId>,
    /// Pointer no longer matched the expected value; left as found.
    pub skipped: Vec<ActorId>,
    /// Immune actors excluded from a block cascade.
    pub skipped_immune: Vec<ActorId>,
    #[serde(serialize_with = "serialize_failures")]
    pub failed: Vec<(ActorId, StoreError)>,
}

impl CascadeReport {
    pub(crate) fn new(block: &IpBlock, direction: CascadeDirection) -> Self {
        Self {
            ip: block.ip,
            ip_block: block.id,
            sanction: block.sanction,
            direction,
            updated: Vec::new(),
            skipped: Vec::new(),
            skipped_immune: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub(crate) fn absorb(&mut self, bulk: BulkUpdate) {
        self.updated.extend(bulk.updated);
        self.skipped.extend(bulk.skipped);
        self.failed.extend(bulk.failed);
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_actors(&self) -> Vec<ActorId> {
        self.failed.iter().map(|(actor, _)| *actor).collect()
    }
}

fn serialize_failures<S>(failed: &[(ActorId, StoreError)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;

    let mut seq = serializer.serialize_seq(Some(failed.len()))?;
    for (actor, error) in failed {
        seq.serialize_element(&(actor, error.to_string()))?;
    }
    seq.end()
}

/// A fully applied IP block or unblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpBlockOutcome {
    /// The block record after the operation.
    pub ip_block: IpBlock,
    /// The ledger entry appended (`BLOCK_IP` or `UNBLOCK`).
    pub sanction: Sanction,
    pub report: CascadeReport,
}
