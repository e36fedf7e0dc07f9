use serde::{Deserialize, Serialize};

use helpdesk_core::{ActorId, Entity, GroupId, SanctionId};

/// One of the two independent sanction tracks every actor carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Mute,
    Block,
}

impl core::fmt::Display for Track {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Track::Mute => f.write_str("mute"),
            Track::Block => f.write_str("block"),
        }
    }
}

/// An authenticated account.
///
/// The sanction references are denormalized pointers into the append-only
/// sanction ledger. Only the moderation engine moves them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    /// Opaque credential digest; hashing and verification live outside this crate.
    #[serde(default, skip_serializing)]
    pub credential_hash: String,
    #[serde(default)]
    pub group_refs: Vec<GroupId>,
    #[serde(default)]
    pub muted: Option<SanctionId>,
    #[serde(default)]
    pub blocked: Option<SanctionId>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(),
            name: name.into(),
            credential_hash: String::new(),
            group_refs: Vec::new(),
            muted: None,
            blocked: None,
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = GroupId>) -> Self {
        self.group_refs.extend(groups);
        self
    }

    pub fn sanction_ref(&self, track: Track) -> Option<SanctionId> {
        match track {
            Track::Mute => self.muted,
            Track::Block => self.blocked,
        }
    }

    pub fn set_sanction_ref(&mut self, track: Track, sanction: Option<SanctionId>) {
        match track {
            Track::Mute => self.muted = sanction,
            Track::Block => self.blocked = sanction,
        }
    }

    pub fn has_group(&self, group: GroupId) -> bool {
        self.group_refs.contains(&group)
    }
}

impl Entity for Actor {
    type Id = ActorId;

    fn id(&self) -> ActorId {
        self.id
    }
}
