//! Capability registry: named permission bits and the capability mask.
//!
//! Every capability is one bit of a [`Capabilities`] mask. Bit positions are
//! assigned once and never reused or renumbered, because group masks are
//! persisted as raw integers. Bit 0 is reserved and never assigned.
//!
//! The mask is backed by a `u128` so the registry has headroom well past the
//! 55 capabilities defined today, and so the top defined bit never lands on a
//! sign bit.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

use helpdesk_core::DomainError;

/// A single named capability (one bit of the mask).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(u8);

/// A set of capabilities, stored as a bitmask.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u128);

macro_rules! capabilities {
    ($($name:ident = $bit:literal,)+) => {
        impl Capability {
            $(pub const $name: Capability = Capability($bit);)+

            /// Every defined capability, in bit order.
            pub const DEFINED: &'static [Capability] = &[$(Capability::$name),+];

            /// Stable name of the capability (e.g. `"BLOCK_USER"`).
            pub fn name(self) -> &'static str {
                match self.0 {
                    $($bit => stringify!($name),)+
                    _ => "UNDEFINED",
                }
            }

            /// Look up a capability by its stable name.
            pub fn from_name(name: &str) -> Option<Capability> {
                match name {
                    $(stringify!($name) => Some(Capability::$name),)+
                    _ => None,
                }
            }
        }
    };
}

capabilities! {
    VIEW_USERS = 1,
    VIEW_USERS_BY_IP = 2,
    BLOCK_USERS_BY_IP = 3,
    UNBLOCK_USERS_BY_IP = 4,
    VIEW_CURRENT_ACCOUNT_DETAILS = 5,
    CHANGE_CURRENT_ACCOUNT_PASSWORD = 6,
    CHANGE_CURRENT_ACCOUNT_EMAIL = 7,
    VIEW_CURRENT_ACCOUNT_TICKETS = 8,
    VIEW_TICKETS_BY_USER = 9,
    VIEW_USER_DETAILS = 10,
    DELETE_USER = 11,
    CHANGE_PASSWORD_BY_USER = 12,
    CHANGE_DETAILS_BY_USER = 13,
    CHANGE_GROUP_BY_USER = 14,
    VIEW_MODERATIONS_BY_USER = 15,
    VIEW_MODERATIONS_BY_AUTHOR = 16,
    BLOCK_USER = 17,
    UNBLOCK_USER = 18,
    BLOCK_IP_BY_USER = 19,
    MUTE_USER = 20,
    UNMUTE_USER = 21,
    VIEW_IPS_BY_USER = 22,
    VIEW_SAMEIP_BY_USER = 23,
    VIEW_TICKETS = 24,
    VIEW_TICKETS_BY_CATEGORY = 25,
    VIEW_TICKETS_BY_PRIORITY = 26,
    VIEW_OPEN_TICKETS = 27,
    VIEW_CLOSED_TICKETS = 28,
    VIEW_TICKET = 29,
    CREATE_TICKET = 30,
    REPLY_TO_TICKET = 31,
    CLOSE_TICKET = 32,
    CLOSE_TICKET_PERMANENTLY = 33,
    OPEN_TICKET = 34,
    CHANGE_TICKET_PRIORITY = 35,
    CHANGE_TICKET_CATEGORY = 36,
    DELETE_TICKET = 37,
    VIEW_MODERATIONS = 38,
    VIEW_MODERATION = 39,
    VIEW_USER_NOTES = 40,
    VIEW_TICKET_NOTES = 41,
    VIEW_NOTES_BY_AUTHOR = 42,
    CREATE_USER_NOTE = 43,
    CREATE_TICKET_NOTE = 44,
    DELETE_NOTE = 45,
    IMMUNITY = 46,
    VIEW_BLOCKED_USERS = 47,
    VIEW_MUTED_USERS = 48,
    VIEW_GROUPS = 49,
    EDIT_GROUP = 50,
    CREATE_GROUP = 51,
    VIEW_USERS_BY_GROUP = 52,
    VIEW_GROUPS_BY_FLAG = 53,
    VIEW_GROUP = 54,
    DELETE_GROUP = 55,
}

impl Capability {
    /// Bit position of this capability within the mask.
    pub fn bit(self) -> u8 {
        self.0
    }

    /// The single-bit mask for this capability.
    pub fn mask(self) -> Capabilities {
        Capabilities(1u128 << self.0)
    }

    /// Interpret a raw mask value as exactly one defined capability.
    ///
    /// Rejects zero, the reserved bit, values with more than one bit set and
    /// bits that are not assigned to any capability.
    pub fn from_bits(bits: u128) -> Result<Capability, DomainError> {
        if bits < 2 {
            return Err(DomainError::validation("invalid flag provided"));
        }
        if bits.count_ones() != 1 {
            return Err(DomainError::validation("flag must be exactly one capability"));
        }
        let bit = bits.trailing_zeros() as u8;
        Capability::DEFINED
            .iter()
            .copied()
            .find(|c| c.0 == bit)
            .ok_or_else(|| DomainError::validation("flag does not exist"))
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Capability {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Capability::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown capability '{name}'")))
    }
}

/// Bitwise-OR of every defined capability.
///
/// Used to seed the maximal-privilege (administrator) group.
pub fn all_capabilities() -> Capabilities {
    Capability::DEFINED
        .iter()
        .fold(Capabilities::empty(), |acc, c| acc | c.mask())
}

impl Capabilities {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every defined capability.
    pub fn all() -> Self {
        all_capabilities()
    }

    /// Wrap raw bits without checking them against the registry.
    ///
    /// Persisted group masks go through this path; undefined bits are carried
    /// along but never match a defined capability.
    pub const fn from_bits_retain(bits: u128) -> Self {
        Self(bits)
    }

    /// Wrap raw bits, rejecting any bit that is not a defined capability.
    pub fn from_bits_checked(bits: u128) -> Result<Self, DomainError> {
        let undefined = bits & !Self::all().0;
        if undefined != 0 {
            return Err(DomainError::validation(format!(
                "mask contains undefined capability bits: {undefined:#x}"
            )));
        }
        Ok(Self(bits))
    }

    pub const fn bits(self) -> u128 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.mask().0 != 0
    }

    /// True if every bit of `other` is also set in `self`.
    pub fn contains_all(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Capabilities) -> bool {
        self.0 & other.0 != 0
    }

    /// Defined capabilities present in this mask, in bit order.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::DEFINED
            .iter()
            .copied()
            .filter(move |c| self.contains(*c))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(Capability::name).collect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capabilities({:#x})", self.0)
    }
}

impl From<Capability> for Capabilities {
    fn from(value: Capability) -> Self {
        value.mask()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Capabilities::empty(), |acc, c| acc | c)
    }
}

impl<T: Into<Capabilities>> BitOr<T> for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: T) -> Self::Output {
        Capabilities(self.0 | rhs.into().0)
    }
}

impl<T: Into<Capabilities>> BitOrAssign<T> for Capabilities {
    fn bitor_assign(&mut self, rhs: T) {
        self.0 |= rhs.into().0;
    }
}

impl<T: Into<Capabilities>> BitAnd<T> for Capabilities {
    type Output = Capabilities;

    fn bitand(self, rhs: T) -> Self::Output {
        Capabilities(self.0 & rhs.into().0)
    }
}

impl<T: Into<Capabilities>> BitAndAssign<T> for Capabilities {
    fn bitand_assign(&mut self, rhs: T) {
        self.0 &= rhs.into().0;
    }
}

impl Not for Capabilities {
    type Output = Capabilities;

    fn not(self) -> Self::Output {
        Capabilities(!self.0)
    }
}

impl BitOr for Capability {
    type Output = Capabilities;

    fn bitor(self, rhs: Capability) -> Self::Output {
        self.mask() | rhs
    }
}
