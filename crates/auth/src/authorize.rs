use serde::Serialize;
use thiserror::Error;

use helpdesk_core::{ActorId, GroupId};

use crate::{Capabilities, Capability, Group, GroupMode, permissions::resolve};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing capability '{0}'")]
    Forbidden(Capability),

    #[error("target is immune to this action")]
    ImmuneTarget,
}

/// Capability gate: does `mask` share any bit with `required`?
///
/// - No IO
/// - No panics
/// - The mask must be freshly resolved for the current request
pub fn allow(mask: Capabilities, required: impl Into<Capabilities>) -> bool {
    mask.intersects(required.into())
}

pub fn has_immunity(mask: Capabilities) -> bool {
    mask.contains(Capability::IMMUNITY)
}

/// True if the mask carries every defined capability (administrator).
pub fn is_full_privilege(mask: Capabilities) -> bool {
    mask.contains_all(Capabilities::all())
}

/// Gate a single capability, turning a denial into an error.
pub fn authorize(mask: Capabilities, required: Capability) -> Result<(), AuthzError> {
    if allow(mask, required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required))
    }
}

/// Immunity check for mutating actions aimed at another actor.
///
/// An immune target can only be acted on by a full-privilege author.
pub fn ensure_can_target(author: Capabilities, target: Capabilities) -> Result<(), AuthzError> {
    if has_immunity(target) && !is_full_privilege(author) {
        return Err(AuthzError::ImmuneTarget);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
///
/// Answers "why was this request allowed or denied?" in terms of the groups
/// that granted or revoked the capability.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub actor_id: ActorId,
    pub required_capability: Capability,
    pub granted: bool,
    pub reason: String,
    pub effective_capabilities: Vec<&'static str>,
    /// Add-mode groups whose mask includes the capability.
    pub granting_groups: Vec<GroupRef>,
    /// Remove-mode groups whose mask includes the capability.
    pub revoking_groups: Vec<GroupRef>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRef {
    pub id: GroupId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No add-mode group grants the capability.
    NotGranted,
    /// Granted, but a remove-mode group takes it away.
    Revoked,
}

/// Explain the decision the gate would make for `required` given `groups`.
pub fn explain_authorization(
    actor_id: ActorId,
    groups: &[Group],
    required: Capability,
) -> AuthorizationExplanation {
    let effective = resolve(groups);
    let granted = allow(effective, required);

    let refs_for = |mode: GroupMode| -> Vec<GroupRef> {
        groups
            .iter()
            .filter(|g| g.mode == mode && g.permissions.contains(required))
            .map(|g| GroupRef {
                id: g.id,
                name: g.name.clone(),
            })
            .collect()
    };
    let granting_groups = refs_for(GroupMode::Add);
    let revoking_groups = refs_for(GroupMode::Remove);

    let (reason, denial_reason) = if granted {
        let names: Vec<&str> = granting_groups.iter().map(|g| g.name.as_str()).collect();
        (format!("'{required}' granted by {names:?}"), None)
    } else if !revoking_groups.is_empty() {
        let names: Vec<&str> = revoking_groups.iter().map(|g| g.name.as_str()).collect();
        (
            format!("'{required}' revoked by {names:?}"),
            Some(DenialReason {
                kind: DenialKind::Revoked,
                message: format!("Remove-mode groups take away '{required}'"),
                suggestions: vec![
                    format!("Remove the actor from {names:?}"),
                    format!("Drop '{required}' from the remove mask of {names:?}"),
                ],
            }),
        )
    } else {
        (
            format!("no group grants '{required}'"),
            Some(DenialReason {
                kind: DenialKind::NotGranted,
                message: format!("Missing required capability: '{required}'"),
                suggestions: vec![format!(
                    "Assign a group that grants '{required}' ({} category)",
                    capability_category(required)
                )],
            }),
        )
    };

    AuthorizationExplanation {
        actor_id,
        required_capability: required,
        granted,
        reason,
        effective_capabilities: effective.names(),
        granting_groups,
        revoking_groups,
        denial_reason,
    }
}

/// Capability definition (for audit/display).
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityDefinition {
    pub name: &'static str,
    pub bit: u8,
    pub category: &'static str,
}

/// Every defined capability with its bit and display category.
pub fn capability_definitions() -> Vec<CapabilityDefinition> {
    Capability::DEFINED
        .iter()
        .map(|&c| CapabilityDefinition {
            name: c.name(),
            bit: c.bit(),
            category: capability_category(c),
        })
        .collect()
}

fn capability_category(capability: Capability) -> &'static str {
    let name = capability.name();
    if name.contains("NOTE") {
        "notes"
    } else if name.contains("TICKET") {
        "tickets"
    } else if name.contains("GROUP") {
        "groups"
    } else if name.contains("MODERATION")
        || name.contains("BLOCK")
        || name.contains("MUTE")
        || name.contains("IP")
        || capability == Capability::IMMUNITY
    {
        "moderation"
    } else {
        "accounts"
    }
}
