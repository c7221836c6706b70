//! Pairing: proving possession of a key and locking a site to it.
//!
//! ```text
//! PUBLIC --initiate--> CHALLENGE_ISSUED --complete(ok)--> LOCKED
//! CHALLENGE_ISSUED --expiry or complete(fail)--> PUBLIC (challenge discarded)
//! ```
//!
//! A site has at most one live challenge; initiating again replaces it.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::AuthError;
use crate::crypto::SiteVerifyingKey;
use crate::domain::{PairingChallenge, PublicKey32, Signature64, Site, SiteId, NONCE_LEN};
use crate::infra::{Result, SiteRegistry};

/// Issues pairing challenges and performs the public-to-locked transition.
pub struct PairingManager {
    registry: Arc<dyn SiteRegistry>,
    ttl: Duration,
    challenges: Mutex<HashMap<SiteId, PairingChallenge>>,
}

impl PairingManager {
    pub fn new(registry: Arc<dyn SiteRegistry>, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn initiate_pairing(&self, site_id: &SiteId) -> Result<PairingChallenge> {
        self.initiate_pairing_at(site_id, Utc::now()).await
    }

    /// Issue a fresh challenge for a public site, replacing any pending one.
    pub async fn initiate_pairing_at(
        &self,
        site_id: &SiteId,
        now: DateTime<Utc>,
    ) -> Result<PairingChallenge> {
        let site = self.registry.load_site(site_id).await?;
        if site.is_locked() {
            return Err(AuthError::AlreadyLocked.into());
        }

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let challenge = PairingChallenge::new(site_id.clone(), nonce, now, self.ttl);

        let replaced = self
            .lock_challenges()
            .insert(site_id.clone(), challenge.clone())
            .is_some();

        info!(
            site_id = %site_id,
            expires_at = %challenge.expires_at,
            replaced,
            "Issued pairing challenge"
        );
        Ok(challenge)
    }

    pub async fn complete_pairing(
        &self,
        site_id: &SiteId,
        public_key: &PublicKey32,
        signature: &Signature64,
    ) -> Result<Site> {
        self.complete_pairing_at(site_id, public_key, signature, Utc::now())
            .await
    }

    /// Verify `signature` over the pending nonce and lock the site to `public_key`.
    ///
    /// The challenge is consumed before verification, so it is single-use
    /// whatever the outcome and a concurrent second attempt sees `NoChallenge`.
    pub async fn complete_pairing_at(
        &self,
        site_id: &SiteId,
        public_key: &PublicKey32,
        signature: &Signature64,
        now: DateTime<Utc>,
    ) -> Result<Site> {
        let challenge = {
            let mut challenges = self.lock_challenges();
            match challenges.get_mut(site_id) {
                Some(c) if c.is_live_at(now) => {
                    c.consumed = true;
                    c.clone()
                }
                _ => return Err(AuthError::NoChallenge.into()),
            }
        };

        let outcome = self.verify_and_lock(&challenge, public_key, signature, now).await;
        self.discard(site_id, &challenge.nonce);
        outcome
    }

    async fn verify_and_lock(
        &self,
        challenge: &PairingChallenge,
        public_key: &PublicKey32,
        signature: &Signature64,
        now: DateTime<Utc>,
    ) -> Result<Site> {
        let verifying_key =
            SiteVerifyingKey::from_bytes(public_key).map_err(|_| AuthError::BadSignature)?;
        verifying_key
            .verify(&challenge.nonce, signature)
            .map_err(|_| AuthError::BadSignature)?;

        let site = self
            .registry
            .lock_site(&challenge.site_id, *public_key, now)
            .await?;
        info!(site_id = %challenge.site_id, "Pairing completed");
        Ok(site)
    }

    /// Remove the challenge carrying `nonce`; a newer replacement is left alone.
    fn discard(&self, site_id: &SiteId, nonce: &[u8; NONCE_LEN]) {
        let mut challenges = self.lock_challenges();
        if challenges.get(site_id).is_some_and(|c| &c.nonce == nonce) {
            challenges.remove(site_id);
        }
    }

    /// The live challenge for a site, if any.
    pub fn pending(&self, site_id: &SiteId, now: DateTime<Utc>) -> Option<PairingChallenge> {
        self.lock_challenges()
            .get(site_id)
            .filter(|c| c.is_live_at(now))
            .cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_challenges().len()
    }

    /// Drop consumed and expired challenges. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut challenges = self.lock_challenges();
        let before = challenges.len();
        challenges.retain(|_, c| c.is_live_at(now));
        let removed = before - challenges.len();
        if removed > 0 {
            debug!(removed, "Swept pairing challenges");
        }
        removed
    }

    /// Periodically sweep until the task is dropped.
    pub async fn run_sweeper(self: Arc<Self>, every: std::time::Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_expired(Utc::now());
        }
    }

    fn lock_challenges(&self) -> std::sync::MutexGuard<'_, HashMap<SiteId, PairingChallenge>> {
        self.challenges.lock().unwrap_or_else(|e| {
            warn!("Pairing challenge lock was poisoned; continuing");
            e.into_inner()
        })
    }
}
