//! Site record: the tenant entity that owns a storage partition.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{LockState, PublicKey32, SiteId};

/// A tenant site and its pairing state.
///
/// Invariant: `lock_state == Locked` iff `public_key.is_some()`. The only way
/// to reach `Locked` is the pairing manager's atomic transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Site {
    pub site_id: SiteId,
    pub lock_state: LockState,
    #[serde(skip)]
    pub public_key: Option<PublicKey32>,
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl Site {
    /// A freshly created, unpaired site.
    pub fn new_public(site_id: SiteId, created_at: DateTime<Utc>) -> Self {
        Self {
            site_id,
            lock_state: LockState::Public,
            public_key: None,
            created_at,
            locked_at: None,
        }
    }

    /// Rebuild a site from its stored parts, enforcing the lock/key invariant.
    pub fn from_parts(
        site_id: SiteId,
        lock_state: LockState,
        public_key: Option<PublicKey32>,
        created_at: DateTime<Utc>,
        locked_at: Option<DateTime<Utc>>,
    ) -> Result<Self, &'static str> {
        match (lock_state, public_key.is_some()) {
            (LockState::Locked, false) => return Err("locked site has no registered key"),
            (LockState::Public, true) => return Err("public site has a registered key"),
            _ => {}
        }
        Ok(Self {
            site_id,
            lock_state,
            public_key,
            created_at,
            locked_at,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state == LockState::Locked
    }

    /// The key reads must be signed with, if the site is paired.
    pub fn registered_key(&self) -> Option<&PublicKey32> {
        self.public_key.as_ref()
    }
}
