//! Shared fixture for the moderation integration tests.
#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use helpdesk_auth::{Actor, Capabilities, Capability, Group};
use helpdesk_moderation::{GroupStore, InMemoryModerationStore, ModerationConfig, ModerationEngine};

pub type Engine = ModerationEngine<InMemoryModerationStore>;

pub struct World {
    pub store: Arc<InMemoryModerationStore>,
    pub engine: Engine,
    /// Full-privilege administrator.
    pub admin: Actor,
    /// Moderator: every moderation capability plus immunity, but not full privilege.
    pub moderator: Actor,
    pub users: Group,
    pub staff: Group,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(ModerationConfig::default())
    }

    pub fn with_config(config: ModerationConfig) -> Self {
        helpdesk_observability::init_for_tests();

        let store = InMemoryModerationStore::arc();
        let admins = Group::granting("admin", Capabilities::all());
        let moderators = Group::granting(
            "moderators",
            Capability::BLOCK_USER
                | Capability::UNBLOCK_USER
                | Capability::MUTE_USER
                | Capability::UNMUTE_USER
                | Capability::BLOCK_USERS_BY_IP
                | Capability::UNBLOCK_USERS_BY_IP
                | Capability::BLOCK_IP_BY_USER
                | Capability::IMMUNITY,
        );
        let users = Group::granting(
            "user",
            Capability::CREATE_TICKET | Capability::REPLY_TO_TICKET | Capability::VIEW_TICKET,
        )
        .with_default(true);
        let staff = Group::granting("staff", Capability::IMMUNITY);
        for group in [&admins, &moderators, &users, &staff] {
            store.insert_group(group.clone()).unwrap();
        }

        let admin = Actor::new("root").with_groups([admins.id]);
        let moderator = Actor::new("mod").with_groups([moderators.id]);
        store.insert_actor(admin.clone()).unwrap();
        store.insert_actor(moderator.clone()).unwrap();

        Self {
            engine: ModerationEngine::with_config(Arc::clone(&store), config),
            store,
            admin,
            moderator,
            users,
            staff,
        }
    }

    /// A regular account.
    pub fn user(&self, name: &str) -> Actor {
        let actor = Actor::new(name).with_groups([self.users.id]);
        self.store.insert_actor(actor.clone()).unwrap();
        actor
    }

    /// An account holding `IMMUNITY`.
    pub fn staffer(&self, name: &str) -> Actor {
        let actor = Actor::new(name).with_groups([self.users.id, self.staff.id]);
        self.store.insert_actor(actor.clone()).unwrap();
        actor
    }

    pub fn seen_at(&self, actor: &Actor, ip: IpAddr, at: DateTime<Utc>) {
        self.store.record_access(actor.id, ip, at).unwrap();
    }

    pub fn current(&self, actor: &Actor) -> Actor {
        self.store.actor(actor.id).unwrap()
    }
}

pub fn ip(raw: &str) -> IpAddr {
    raw.parse().unwrap()
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}
