//! Permission groups: named bundles of capability grants or revocations.

use serde::{Deserialize, Serialize};

use helpdesk_core::{ActorId, DomainError, Entity, GroupId};

use crate::Capabilities;

/// How a group's mask combines with the others an actor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Grants every capability in the mask.
    #[default]
    Add,
    /// Revokes every capability in the mask, regardless of any grant.
    Remove,
}

impl core::fmt::Display for GroupMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GroupMode::Add => f.write_str("add"),
            GroupMode::Remove => f.write_str("remove"),
        }
    }
}

impl core::str::FromStr for GroupMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(GroupMode::Add),
            "remove" => Ok(GroupMode::Remove),
            other => Err(DomainError::validation(format!(
                "group mode must be 'add' or 'remove', got '{other}'"
            ))),
        }
    }
}

/// An administratively managed group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub mode: GroupMode,
    pub permissions: Capabilities,
    /// Assigned to every actor at registration.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub author: Option<ActorId>,
}

impl Group {
    pub fn new(name: impl Into<String>, mode: GroupMode, permissions: Capabilities) -> Self {
        Self {
            id: GroupId::new(),
            name: name.into(),
            mode,
            permissions,
            is_default: false,
            author: None,
        }
    }

    /// Convenience constructor for an additive group.
    pub fn granting(name: impl Into<String>, permissions: impl Into<Capabilities>) -> Self {
        Self::new(name, GroupMode::Add, permissions.into())
    }

    /// Convenience constructor for a subtractive group.
    pub fn revoking(name: impl Into<String>, permissions: impl Into<Capabilities>) -> Self {
        Self::new(name, GroupMode::Remove, permissions.into())
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_author(mut self, author: ActorId) -> Self {
        self.author = Some(author);
        self
    }
}

impl Entity for Group {
    type Id = GroupId;

    fn id(&self) -> GroupId {
        self.id
    }
}
