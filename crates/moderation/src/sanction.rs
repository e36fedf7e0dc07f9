//! Sanction ledger records and IP block records.
//!
//! Sanctions are append-only: every state change, including server-generated
//! reversals, is a new record. Existing records are never mutated.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use helpdesk_auth::Track;
use helpdesk_core::{ActorId, DomainError, DomainResult, Entity, IpBlockId, SanctionId};

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionKind {
    Block,
    Unblock,
    Mute,
    Unmute,
    BlockIp,
    UpdateInfo,
}

impl SanctionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SanctionKind::Block => "block",
            SanctionKind::Unblock => "unblock",
            SanctionKind::Mute => "mute",
            SanctionKind::Unmute => "unmute",
            SanctionKind::BlockIp => "block_ip",
            SanctionKind::UpdateInfo => "update_info",
        }
    }

    /// The track an imposing sanction occupies, if any.
    pub fn imposes(self) -> Option<Track> {
        match self {
            SanctionKind::Block | SanctionKind::BlockIp => Some(Track::Block),
            SanctionKind::Mute => Some(Track::Mute),
            _ => None,
        }
    }

    /// The kind recorded when a sanction on `track` is lifted.
    pub fn reversal_for(track: Track) -> SanctionKind {
        match track {
            Track::Mute => SanctionKind::Unmute,
            Track::Block => SanctionKind::Unblock,
        }
    }
}

impl core::fmt::Display for SanctionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable moderation ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sanction {
    pub id: SanctionId,
    pub author: ActorId,
    pub target: ActorId,
    pub kind: SanctionKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// `None` means indefinite.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Sanction {
    pub fn new(
        kind: SanctionKind,
        author: ActorId,
        target: ActorId,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SanctionId::new(),
            author,
            target,
            kind,
            reason: reason.into(),
            created_at,
            expires_at: None,
        }
    }

    pub fn expiring(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Expiry is derived, never stored: a sanction is expired once its
    /// expiry instant has been reached. Indefinite sanctions never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Server-generated reversal of this sanction, attributed to its author.
    pub fn expiry_reversal(&self, track: Track, now: DateTime<Utc>) -> Sanction {
        Sanction::new(
            SanctionKind::reversal_for(track),
            self.author,
            self.target,
            expired_reason(self.id),
            now,
        )
    }
}

impl Entity for Sanction {
    type Id = SanctionId;

    fn id(&self) -> SanctionId {
        self.id
    }
}

/// Reason recorded on reversals generated by lazy expiry.
pub fn expired_reason(original: SanctionId) -> String {
    format!("expired: passed expiry of sanction [{original}]")
}

/// Network-address-level block.
///
/// The referenced `BLOCK_IP` sanction is shared by every actor the block
/// cascaded onto. `active = false` marks a lifted block; history is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpBlock {
    pub id: IpBlockId,
    pub ip: IpAddr,
    pub sanction: SanctionId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl IpBlock {
    pub fn new(ip: IpAddr, sanction: SanctionId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: IpBlockId::new(),
            ip,
            sanction,
            active: true,
            created_at,
        }
    }
}

impl Entity for IpBlock {
    type Id = IpBlockId;

    fn id(&self) -> IpBlockId {
        self.id
    }
}

/// Trim and bound a moderator-supplied reason.
pub fn validate_reason(raw: &str, max_len: usize) -> DomainResult<String> {
    let reason = raw.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("reason is required"));
    }
    if reason.chars().count() > max_len {
        return Err(DomainError::validation(format!(
            "reason must be at most {max_len} characters"
        )));
    }
    Ok(reason.to_string())
}

/// Parse a raw expiry value.
///
/// - absent or blank: indefinite (`None`)
/// - RFC 3339 timestamp: that instant
/// - anything else: rejected
///
/// A malformed value is never read as "already expired" or as "indefinite".
pub fn parse_expiry(raw: Option<&str>) -> DomainResult<Option<DateTime<Utc>>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|e| DomainError::validation(format!("malformed expiry '{raw}': {e}")))
}

/// Reject expiry instants that have already passed.
pub fn ensure_future_expiry(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    match expires_at {
        Some(at) if at <= now => Err(DomainError::validation("expiry must be in the future")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn sanction(expires_at: Option<DateTime<Utc>>) -> Sanction {
        Sanction::new(SanctionKind::Block, ActorId::new(), ActorId::new(), "spam", now())
            .expiring(expires_at)
    }

    #[test]
    fn indefinite_sanction_never_expires() {
        let s = sanction(None);
        assert!(!s.is_expired(now() + Duration::days(365 * 50)));
    }

    #[test]
    fn expiry_is_inclusive_of_the_instant() {
        let at = now();
        let s = sanction(Some(at));
        assert!(!s.is_expired(at - Duration::seconds(1)));
        assert!(s.is_expired(at));
    }

    #[test]
    fn expiry_reversal_names_the_original() {
        let s = sanction(Some(now()));
        let r = s.expiry_reversal(Track::Block, now());
        assert_eq!(r.kind, SanctionKind::Unblock);
        assert_eq!(r.author, s.author);
        assert_eq!(r.target, s.target);
        assert!(r.reason.contains("expired"));
        assert!(r.reason.contains(&s.id.to_string()));
        assert_eq!(r.expires_at, None);
    }

    #[test]
    fn parse_expiry_handles_null_blank_valid_and_malformed() {
        assert_eq!(parse_expiry(None).unwrap(), None);
        assert_eq!(parse_expiry(Some("   ")).unwrap(), None);

        let parsed = parse_expiry(Some("2030-01-02T03:04:05+02:00")).unwrap().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2030-01-02T01:04:05+00:00");

        for bad in ["tomorrow", "2030-13-01T00:00:00Z", "0", "null"] {
            let err = parse_expiry(Some(bad)).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "{bad} should be rejected");
        }
    }

    #[test]
    fn stored_sanction_with_malformed_expiry_fails_to_load() {
        let json = format!(
            r#"{{"id":"{}","author":"{}","target":"{}","kind":"block","reason":"x","created_at":"2024-01-01T00:00:00Z","expires_at":"soon"}}"#,
            SanctionId::new(),
            ActorId::new(),
            ActorId::new()
        );
        assert!(serde_json::from_str::<Sanction>(&json).is_err());

        let json = json.replace(r#""expires_at":"soon""#, r#""expires_at":null"#);
        let loaded: Sanction = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.expires_at, None);
        assert_eq!(loaded.kind, SanctionKind::Block);
    }

    #[test]
    fn past_expiry_is_rejected_at_apply_time() {
        let t = now();
        assert!(ensure_future_expiry(Some(t - Duration::minutes(1)), t).is_err());
        assert!(ensure_future_expiry(Some(t + Duration::minutes(1)), t).is_ok());
        assert!(ensure_future_expiry(None, t).is_ok());
    }

    #[test]
    fn reason_is_trimmed_and_bounded() {
        assert_eq!(validate_reason("  spam  ", 255).unwrap(), "spam");
        assert!(validate_reason("   ", 255).is_err());
        assert!(validate_reason(&"x".repeat(256), 255).is_err());
        assert!(validate_reason(&"é".repeat(255), 255).is_ok());
    }

    #[test]
    fn kinds_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&SanctionKind::BlockIp).unwrap(), "\"block_ip\"");
        assert_eq!(SanctionKind::UpdateInfo.to_string(), "update_info");
        assert_eq!(SanctionKind::BlockIp.imposes(), Some(Track::Block));
        assert_eq!(SanctionKind::Unmute.imposes(), None);
    }
}
