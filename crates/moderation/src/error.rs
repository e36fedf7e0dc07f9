//! Moderation error model.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use helpdesk_auth::{Capability, GroupResolutionError, Track};
use helpdesk_core::{ActorId, DomainError, SanctionId};

use crate::cascade::CascadeReport;
use crate::store::StoreError;

pub type ModerationResult<T> = Result<T, ModerationError>;

/// Failure of a moderation or authorization operation.
///
/// Returned as a typed result; nothing here is used for control flow past the
/// engine boundary.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("actor {target} already has an active {track} sanction")]
    AlreadySanctioned { target: ActorId, track: Track },

    #[error("actor {target} has no active {track} sanction")]
    NotSanctioned { target: ActorId, track: Track },

    #[error("{0} is already blocked")]
    AlreadyBlocked(IpAddr),

    #[error("{0} is not blocked")]
    NotBlocked(IpAddr),

    #[error("actor {0} is immune to this action")]
    ImmuneTarget(ActorId),

    /// The active block came from an IP block; lift the address instead.
    #[error("actor {target} is blocked through ip sanction {sanction}; unblock the ip instead")]
    BlockedByIp { target: ActorId, sanction: SanctionId },

    #[error("no actor has been observed at {0}")]
    NoUsersForIp(IpAddr),

    #[error("actor {0} has no recorded addresses")]
    NoIpHistory(ActorId),

    #[error("missing capability '{0}'")]
    Unauthorized(Capability),

    /// The requesting actor is blocked.
    #[error("blocked: {reason}")]
    Forbidden {
        sanction: SanctionId,
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },

    /// The requesting actor is muted and the operation requires otherwise.
    #[error("muted: {reason}")]
    Muted {
        sanction: SanctionId,
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    GroupResolution(#[from] GroupResolutionError),

    #[error(
        "ip cascade on {} partially applied: {} updated, {} failed",
        .0.ip,
        .0.updated.len(),
        .0.failed.len()
    )]
    PartialCascade(Box<CascadeReport>),
}

impl ModerationError {
    /// HTTP-equivalent status class for the transport layer.
    pub fn status(&self) -> u16 {
        match self {
            ModerationError::NotFound(_) => 404,
            ModerationError::AlreadySanctioned { .. }
            | ModerationError::NotSanctioned { .. }
            | ModerationError::AlreadyBlocked(_)
            | ModerationError::NotBlocked(_)
            | ModerationError::BlockedByIp { .. } => 409,
            ModerationError::NoUsersForIp(_) | ModerationError::NoIpHistory(_) => 404,
            ModerationError::ImmuneTarget(_)
            | ModerationError::Unauthorized(_)
            | ModerationError::Forbidden { .. }
            | ModerationError::Muted { .. } => 403,
            ModerationError::Domain(e) if e.is_input_error() => 400,
            ModerationError::Domain(_) => 409,
            ModerationError::Store(e) => match e {
                StoreError::NotFound(_) => 404,
                StoreError::Conflict(_) => 409,
                StoreError::Unavailable(_) | StoreError::Corrupt(_) => 500,
            },
            ModerationError::GroupResolution(_) => 500,
            ModerationError::PartialCascade(_) => 207,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ModerationError::NotFound(what.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        ModerationError::Store(StoreError::Corrupt(msg.into()))
    }
}
