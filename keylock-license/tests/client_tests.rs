mod common;

use chrono::TimeDelta;
use common::{
    COLLECTION, FlakyStore, KEY, at, cache_in, client_for, fields_of, now, seed_activated,
    seed_unactivated,
};
use keylock_license::{
    AuthMode, ClientConfig, Credentials, DeviceId, Expiry, ExpiryDisplay, KeyAdmin, LicenseClient,
    LicenseError, SessionCache, ValidationReport, field,
};
use keylock_store::{DocumentStore, Fields, MemoryDocumentStore, Value};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

fn bob() -> Credentials {
    Credentials::new("bob", "x", KEY)
}

// ── First activation ─────────────────────────────────────────────

#[tokio::test]
async fn first_activation_binds_key_to_device() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;

    let client = client_for(store.clone(), dir.path(), "H1");
    let authorized = client.validate_at(&bob(), now()).await.unwrap();

    assert_eq!(authorized.mode, AuthMode::Activated);
    assert_eq!(
        authorized.expiry,
        ExpiryDisplay::Until(Expiry::Timed(at(2026, 3, 8, 10, 0)))
    );
    assert_eq!(authorized.session.key.as_str(), KEY);

    let fields = fields_of(&store, KEY).await;
    assert_eq!(fields.get_str(field::HWID), Some("H1"));
    assert_eq!(fields.get_str(field::LOGIN), Some("bob"));
    assert_eq!(fields.get_str(field::PASSWORD), Some("x"));
    assert_eq!(
        fields.get_str(field::ACTIVATED_AT),
        Some("2026-03-01T10:00:00")
    );
    assert_eq!(
        fields.get_str(field::EXPIRES_AT),
        Some("2026-03-08T10:00:00")
    );
    // Untouched by activation
    assert_eq!(fields.get_int(field::DURATION_DAYS), Some(7));
}

#[tokio::test]
async fn second_device_is_rejected_after_activation() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;

    let client_a = client_for(store.clone(), dir_a.path(), "H1");
    let client_b = client_for(store.clone(), dir_b.path(), "H2");

    assert!(client_a.validate_at(&bob(), now()).await.is_ok());
    let err = client_b.validate_at(&bob(), now()).await.unwrap_err();

    assert_eq!(err, LicenseError::DeviceMismatch);
    assert_eq!(
        fields_of(&store, KEY).await.get_str(field::HWID),
        Some("H1")
    );
}

#[tokio::test]
async fn same_device_revalidates_online() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = client_for(store.clone(), dir.path(), "H1");

    client.validate_at(&bob(), now()).await.unwrap();
    let later = now() + TimeDelta::days(3);
    let authorized = client.validate_at(&bob(), later).await.unwrap();

    assert_eq!(authorized.mode, AuthMode::Online);
    assert_eq!(authorized.expiry.to_string(), "2026-03-08T10:00:00");
}

#[tokio::test]
async fn lowercase_key_is_normalized() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = client_for(store.clone(), dir.path(), "H1");

    let creds = Credentials::new("bob", "x", " ab12-cd34-ef56-0078 ");
    let authorized = client.validate_at(&creds, now()).await.unwrap();
    assert_eq!(authorized.session.key.as_str(), KEY);
}

#[tokio::test]
async fn duration_falls_back_to_string_then_default() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    store
        .create(
            COLLECTION,
            "AAAA-0000-0000-0001",
            &Fields::new().with(field::DURATION_DAYS, "30"),
        )
        .await
        .unwrap();
    store
        .create(COLLECTION, "AAAA-0000-0000-0002", &Fields::new())
        .await
        .unwrap();

    let client = client_for(store.clone(), dir.path(), "H1");

    let with_string = client
        .validate_at(&Credentials::new("a", "b", "AAAA-0000-0000-0001"), now())
        .await
        .unwrap();
    assert_eq!(
        with_string.expiry,
        ExpiryDisplay::Until(Expiry::Timed(now() + TimeDelta::days(30)))
    );

    let without = client
        .validate_at(&Credentials::new("a", "b", "AAAA-0000-0000-0002"), now())
        .await
        .unwrap();
    assert_eq!(
        without.expiry,
        ExpiryDisplay::Until(Expiry::Timed(now() + TimeDelta::days(7)))
    );
}

#[tokio::test]
async fn extended_unactivated_key_activates_with_longer_grant() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;

    let admin = KeyAdmin::new(store.clone(), COLLECTION);
    admin
        .extend(
            &KEY.parse().unwrap(),
            keylock_license::ExtendMode::AddDays(30),
            false,
        )
        .await
        .unwrap();

    let client = client_for(store.clone(), dir.path(), "H1");
    let authorized = client.validate_at(&bob(), now()).await.unwrap();
    assert_eq!(
        authorized.expiry,
        ExpiryDisplay::Until(Expiry::Timed(now() + TimeDelta::days(37)))
    );
}

// ── Activated keys ───────────────────────────────────────────────

#[tokio::test]
async fn wrong_password_is_credential_mismatch() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "2026-12-31T00:00:00").await;
    let client = client_for(store, dir.path(), "H1");

    let err = client
        .validate_at(&Credentials::new("bob", "wrong", KEY), now())
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::CredentialMismatch);

    let err = client
        .validate_at(&Credentials::new("alice", "x", KEY), now())
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::CredentialMismatch);
}

#[tokio::test]
async fn device_is_checked_before_credentials() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "2026-12-31T00:00:00").await;
    let client = client_for(store, dir.path(), "H2");

    let err = client
        .validate_at(&Credentials::new("alice", "wrong", KEY), now())
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::DeviceMismatch);
}

#[tokio::test]
async fn past_expiry_is_expired() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "2026-02-01T00:00:00").await;
    let client = client_for(store, dir.path(), "H1");

    let err = client.validate_at(&bob(), now()).await.unwrap_err();
    assert_eq!(err, LicenseError::Expired("2026-02-01T00:00:00".into()));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn expiry_instant_itself_is_still_valid() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "2026-03-01T10:00:00").await;
    let client = client_for(store, dir.path(), "H1");

    assert!(client.validate_at(&bob(), now()).await.is_ok());
    let err = client
        .validate_at(&bob(), now() + TimeDelta::seconds(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::Expired(_)));
}

#[tokio::test]
async fn lifetime_never_expires() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "Lifetime").await;
    let client = client_for(store, dir.path(), "H1");

    let authorized = client
        .validate_at(&bob(), at(2090, 1, 1, 0, 0))
        .await
        .unwrap();
    assert_eq!(authorized.expiry.to_string(), "Lifetime");
}

#[tokio::test]
async fn unreadable_expiry_is_not_treated_as_expired() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "soon").await;
    let client = client_for(store, dir.path(), "H1");

    let authorized = client.validate_at(&bob(), now()).await.unwrap();
    assert_eq!(authorized.expiry, ExpiryDisplay::Stored("soon".into()));
}

#[tokio::test]
async fn rfc3339_expiry_is_understood() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "2020-01-01T00:00:00Z").await;
    let client = client_for(store, dir.path(), "H1");

    let err = client.validate_at(&bob(), now()).await.unwrap_err();
    assert!(matches!(err, LicenseError::Expired(_)));
}

#[tokio::test]
async fn activation_without_login_skips_credential_check() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    let fields = Fields::new()
        .with(field::HWID, "H1")
        .with(field::EXPIRES_AT, "Lifetime");
    store.create(COLLECTION, KEY, &fields).await.unwrap();
    let client = client_for(store, dir.path(), "H1");

    let creds = Credentials::new("anyone", "anything", KEY);
    assert!(client.validate_at(&creds, now()).await.is_ok());
}

// ── Terminal denials ─────────────────────────────────────────────

#[tokio::test]
async fn banned_key_is_rejected_regardless_of_state() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "Lifetime").await;
    seed_unactivated(&store, "0000-0000-0000-0001", 7).await;

    let admin = KeyAdmin::new(store.clone(), COLLECTION);
    admin.ban(&KEY.parse().unwrap()).await.unwrap();
    admin
        .ban(&"0000-0000-0000-0001".parse().unwrap())
        .await
        .unwrap();

    let client = client_for(store.clone(), dir.path(), "H1");
    assert_eq!(
        client.validate_at(&bob(), now()).await.unwrap_err(),
        LicenseError::Banned
    );

    let creds = Credentials::new("bob", "x", "0000-0000-0000-0001");
    assert_eq!(
        client.validate_at(&creds, now()).await.unwrap_err(),
        LicenseError::Banned
    );
    // A banned key is never activated
    let fields = fields_of(&store, "0000-0000-0000-0001").await;
    assert_eq!(fields.get(field::HWID), Some(&Value::Null));
}

#[tokio::test]
async fn ban_after_activation_locks_out_owner() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = client_for(store.clone(), dir.path(), "H1");
    client.validate_at(&bob(), now()).await.unwrap();

    KeyAdmin::new(store.clone(), COLLECTION)
        .ban(&KEY.parse().unwrap())
        .await
        .unwrap();

    let err = client.validate_at(&bob(), now()).await.unwrap_err();
    assert_eq!(err, LicenseError::Banned);
}

#[tokio::test]
async fn missing_key_is_not_found() {
    let dir = TempDir::new().unwrap();
    let client = client_for(MemoryDocumentStore::new(), dir.path(), "H1");

    let err = client.validate_at(&bob(), now()).await.unwrap_err();
    assert_eq!(err, LicenseError::NotFound);
}

#[tokio::test]
async fn malformed_key_is_rejected_without_lookup() {
    let dir = TempDir::new().unwrap();
    let store = FlakyStore::new(MemoryDocumentStore::new());
    store.fail_gets(common::Failure::Network);
    let client = client_for(store, dir.path(), "H1");

    let err = client
        .validate_at(&Credentials::new("bob", "x", "not-a-key"), now())
        .await
        .unwrap_err();
    assert!(matches!(err, LicenseError::InvalidKey(_)));
}

// ── Activation writes ────────────────────────────────────────────

#[tokio::test]
async fn failed_activation_write_leaves_key_unactivated() {
    let dir = TempDir::new().unwrap();
    let inner = MemoryDocumentStore::new();
    seed_unactivated(&inner, KEY, 7).await;
    let store = FlakyStore::new(inner.clone());
    store.fail_next_updates(1);
    let client = client_for(store, dir.path(), "H1");

    let err = client.validate_at(&bob(), now()).await.unwrap_err();
    assert!(matches!(err, LicenseError::ActivationWriteFailed(_)));
    assert!(err.is_retryable());
    assert_eq!(
        fields_of(&inner, KEY).await.get(field::HWID),
        Some(&Value::Null)
    );
    assert!(client.cache().load().is_none());

    let authorized = client.validate_at(&bob(), now()).await.unwrap();
    assert_eq!(authorized.mode, AuthMode::Activated);
}

#[tokio::test]
async fn losing_the_activation_race_reports_device_mismatch() {
    let dir = TempDir::new().unwrap();
    let inner = MemoryDocumentStore::new();
    seed_unactivated(&inner, KEY, 7).await;
    let store = FlakyStore::new(inner.clone());
    store.interleave_write(
        Fields::new()
            .with(field::HWID, "H2")
            .with(field::LOGIN, "eve")
            .with(field::PASSWORD, "y")
            .with(field::EXPIRES_AT, "2026-03-08T10:00:00"),
    );
    let client = client_for(store, dir.path(), "H1");

    let err = client.validate_at(&bob(), now()).await.unwrap_err();

    assert_eq!(err, LicenseError::DeviceMismatch);
    let fields = fields_of(&inner, KEY).await;
    assert_eq!(fields.get_str(field::HWID), Some("H2"));
    assert_eq!(fields.get_str(field::LOGIN), Some("eve"));
}

#[tokio::test]
async fn race_lost_to_own_earlier_write_succeeds() {
    let dir = TempDir::new().unwrap();
    let inner = MemoryDocumentStore::new();
    seed_unactivated(&inner, KEY, 7).await;
    let store = FlakyStore::new(inner.clone());
    store.interleave_write(
        Fields::new()
            .with(field::HWID, "H1")
            .with(field::LOGIN, "bob")
            .with(field::PASSWORD, "x")
            .with(field::EXPIRES_AT, "2026-03-08T10:00:00"),
    );
    let client = client_for(store, dir.path(), "H1");

    let authorized = client.validate_at(&bob(), now()).await.unwrap();
    assert_eq!(authorized.mode, AuthMode::Online);
}

#[tokio::test]
async fn concurrent_first_activations_have_one_winner() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;

    let client_a = client_for(store.clone(), dir_a.path(), "H1");
    let client_b = client_for(store.clone(), dir_b.path(), "H2");
    let creds = bob();

    let (a, b) = tokio::join!(
        client_a.validate_at(&creds, now()),
        client_b.validate_at(&creds, now())
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    let winner = if a.is_ok() { "H1" } else { "H2" };
    let loser = if a.is_ok() { &b } else { &a };
    assert_eq!(loser.as_ref().unwrap_err(), &LicenseError::DeviceMismatch);
    assert_eq!(
        fields_of(&store, KEY).await.get_str(field::HWID),
        Some(winner)
    );
}

#[tokio::test]
async fn many_devices_racing_bind_exactly_one() {
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;

    let dirs: Vec<TempDir> = (0..8).map(|_| TempDir::new().unwrap()).collect();
    let clients: Vec<Arc<LicenseClient<MemoryDocumentStore>>> = dirs
        .iter()
        .enumerate()
        .map(|(i, dir)| Arc::new(client_for(store.clone(), dir.path(), &format!("H{i}"))))
        .collect();

    let handles: Vec<_> = clients
        .iter()
        .map(|client| {
            let client = Arc::clone(client);
            tokio::spawn(async move { client.validate_at(&bob(), now()).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e, LicenseError::DeviceMismatch),
        }
    }
    assert_eq!(successes, 1);
}

// ── Session cache ────────────────────────────────────────────────

#[tokio::test]
async fn success_writes_session_cache() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = client_for(store, dir.path(), "H1");

    client.validate_at(&bob(), now()).await.unwrap();

    let record = cache_in(dir.path()).load().unwrap();
    assert_eq!(record.login, "bob");
    assert_eq!(record.password, "x");
    assert_eq!(record.key, KEY);
    assert_eq!(record.last_login, Some(now()));
}

#[tokio::test]
async fn denial_does_not_touch_session_cache() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "Lifetime").await;
    let cache = cache_in(dir.path());
    cache.save("bob", "x", KEY, at(2026, 2, 1, 0, 0));

    let client = client_for(store, dir.path(), "H2");
    assert!(client.validate_at(&bob(), now()).await.is_err());

    assert_eq!(cache.load().unwrap().last_login, Some(at(2026, 2, 1, 0, 0)));
}

#[tokio::test]
async fn unwritable_cache_does_not_fail_validation() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = LicenseClient::with_device(
        store,
        SessionCache::at(blocker.join("sub").join("auth_session.json")),
        ClientConfig::default(),
        DeviceId::new("H1"),
    );

    assert!(client.validate_at(&bob(), now()).await.is_ok());
}

// ── Status checks ────────────────────────────────────────────────

#[tokio::test]
async fn check_status_without_any_session() {
    let dir = TempDir::new().unwrap();
    let client = client_for(MemoryDocumentStore::new(), dir.path(), "H1");

    let err = client.check_status_at(None, now()).await.unwrap_err();
    assert_eq!(err, LicenseError::NoSession);
}

#[tokio::test]
async fn check_status_uses_caller_session() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = client_for(store.clone(), dir.path(), "H1");

    let authorized = client.validate_at(&bob(), now()).await.unwrap();
    let status = client
        .check_status_at(Some(&authorized.session), now())
        .await
        .unwrap();
    assert_eq!(status.mode, AuthMode::Online);

    KeyAdmin::new(store, COLLECTION)
        .ban(&KEY.parse().unwrap())
        .await
        .unwrap();
    let err = client
        .check_status_at(Some(&authorized.session), now())
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::Banned);
}

#[tokio::test]
async fn check_status_falls_back_to_cached_session() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_activated(&store, KEY, "H1", "Lifetime").await;
    cache_in(dir.path()).save("bob", "x", KEY, at(2026, 2, 1, 0, 0));
    let client = client_for(store, dir.path(), "H1");

    let status = client.check_status_at(None, now()).await.unwrap();
    assert_eq!(status.session.login, "bob");
}

#[tokio::test]
async fn remembered_credentials_and_logout() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = client_for(store, dir.path(), "H1");
    assert!(client.remembered_credentials().is_none());

    client.validate_at(&bob(), now()).await.unwrap();
    assert_eq!(client.remembered_credentials(), Some(bob()));

    client.forget_session();
    assert!(client.remembered_credentials().is_none());
}

// ── Reports ──────────────────────────────────────────────────────

#[tokio::test]
async fn report_for_success_and_failure() {
    let dir = TempDir::new().unwrap();
    let store = MemoryDocumentStore::new();
    seed_unactivated(&store, KEY, 7).await;
    let client = client_for(store, dir.path(), "H1");

    let ok = client.validate_at(&bob(), now()).await;
    let report = ValidationReport::from(&ok);
    assert!(report.success);
    assert_eq!(report.message, "License activated");
    assert_eq!(report.expiry_display.as_deref(), Some("2026-03-08T10:00:00"));

    let denied = client
        .validate_at(&Credentials::new("bob", "nope", KEY), now())
        .await;
    let report = ValidationReport::from(&denied);
    assert!(!report.success);
    assert_eq!(
        report.message,
        "login or password does not match this license key"
    );
    assert_eq!(report.expiry_display, None);
}

#[tokio::test]
async fn activation_is_visible_through_store_trait() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryDocumentStore::new());
    seed_unactivated(&store, KEY, 1).await;
    let client = client_for(Arc::clone(&store), dir.path(), "H1");

    client.validate_at(&bob(), now()).await.unwrap();
    let doc = store.get(COLLECTION, KEY).await.unwrap();
    assert!(doc.update_time > doc.create_time);
}
