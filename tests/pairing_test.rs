//! Pairing against real site partitions.

mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use visitor_analytics::auth::{AuthError, PairingManager};
use visitor_analytics::crypto::SiteSigningKey;
use visitor_analytics::domain::LockState;
use visitor_analytics::infra::{AnalyticsError, SiteRegistry, SiteStore};

use common::site;

fn manager(store: &Arc<SiteStore>) -> Arc<PairingManager> {
    let registry: Arc<dyn SiteRegistry> = store.clone();
    Arc::new(PairingManager::new(registry, Duration::seconds(300)))
}

fn is_no_challenge(err: &AnalyticsError) -> bool {
    matches!(err, AnalyticsError::Auth(AuthError::NoChallenge))
}

#[tokio::test]
async fn test_concurrent_completion_admits_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SiteStore::new(dir.path()));
    let pairing = manager(&store);
    let site_id = site("s1");

    let challenge = pairing.initiate_pairing(&site_id).await.unwrap();
    let key = SiteSigningKey::generate();
    let public_key = key.public_key_bytes();
    let signature = key.sign(&challenge.nonce);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let pairing = Arc::clone(&pairing);
            let site_id = site_id.clone();
            tokio::spawn(async move {
                pairing
                    .complete_pairing(&site_id, &public_key, &signature)
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(site) => {
                assert_eq!(site.lock_state, LockState::Locked);
                successes += 1;
            }
            Err(e) => assert!(is_no_challenge(&e), "unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_competing_keys_lock_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SiteStore::new(dir.path()));
    let pairing = manager(&store);
    let site_id = site("contested");

    let challenge = pairing.initiate_pairing(&site_id).await.unwrap();
    let keys: Vec<_> = (0..4).map(|_| SiteSigningKey::generate()).collect();

    let tasks: Vec<_> = keys
        .iter()
        .map(|key| {
            let pairing = Arc::clone(&pairing);
            let site_id = site_id.clone();
            let public_key = key.public_key_bytes();
            let signature = key.sign(&challenge.nonce);
            tokio::spawn(async move {
                pairing
                    .complete_pairing(&site_id, &public_key, &signature)
                    .await
                    .map(|site| site.public_key)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for task in tasks {
        if let Ok(key) = task.await.unwrap() {
            winners.push(key);
        }
    }
    assert_eq!(winners.len(), 1);

    let stored = store.load_site(&site_id).await.unwrap();
    assert_eq!(stored.public_key, winners[0]);
}

#[tokio::test]
async fn test_expired_challenge_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SiteStore::new(dir.path()));
    let pairing = manager(&store);
    let site_id = site("slow");

    let t0 = Utc::now();
    let challenge = pairing.initiate_pairing_at(&site_id, t0).await.unwrap();
    let key = SiteSigningKey::generate();

    let late = t0 + pairing.ttl() + Duration::milliseconds(1);
    let err = pairing
        .complete_pairing_at(
            &site_id,
            &key.public_key_bytes(),
            &key.sign(&challenge.nonce),
            late,
        )
        .await
        .unwrap_err();
    assert!(is_no_challenge(&err));

    let stored = store.load_site(&site_id).await.unwrap();
    assert_eq!(stored.lock_state, LockState::Public);
}

#[tokio::test]
async fn test_lock_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let site_id = site("durable");
    let key = SiteSigningKey::generate();

    {
        let store = Arc::new(SiteStore::new(dir.path()));
        let pairing = manager(&store);
        let challenge = pairing.initiate_pairing(&site_id).await.unwrap();
        pairing
            .complete_pairing(&site_id, &key.public_key_bytes(), &key.sign(&challenge.nonce))
            .await
            .unwrap();
        store.close_all().await;
    }

    let store = Arc::new(SiteStore::new(dir.path()));
    let reopened = store.load_site(&site_id).await.unwrap();
    assert!(reopened.is_locked());
    assert_eq!(reopened.public_key, Some(key.public_key_bytes()));
    assert!(reopened.locked_at.is_some());

    let err = manager(&store).initiate_pairing(&site_id).await.unwrap_err();
    assert!(matches!(err, AnalyticsError::Auth(AuthError::AlreadyLocked)));
}
