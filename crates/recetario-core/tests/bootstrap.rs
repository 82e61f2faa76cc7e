mod common;

use std::time::Duration;

use mockito::Server;
use recetario_core::auth::credentials::{self, CredentialStore, StoreKey};
use recetario_core::auth::RefreshOutcome;
use recetario_core::{BootstrapOutcome, InvalidReason, Role, SessionConfig};
use serde_json::json;

use common::*;

const VALIDATE: &str = "/api/auth/validate-token";
const REFRESH: &str = "/api/auth/refresh-token";

#[tokio::test]
async fn missing_role_is_invalid_without_network() {
    let mut server = Server::new_async().await;
    let (manager, store) = seeded(&api_url(&server), &make_token("t", 3600));
    store.remove(StoreKey::Role).unwrap();

    let validate = server.mock("GET", VALIDATE).expect(0).create_async().await;
    let refresh = server.mock("POST", REFRESH).expect(0).create_async().await;

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::MissingData)
    );
    assert!(store_is_empty(&store));
    validate.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn empty_store_is_invalid() {
    let (manager, store) = manager(&refused_url(), SessionConfig::default());
    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::MissingData)
    );
    assert!(store_is_empty(&store));
    assert!(!manager.state().is_validating());
}

#[tokio::test]
async fn corrupt_user_blob_is_invalid() {
    let (manager, store) = seeded(&refused_url(), &make_token("t", 3600));
    store.set(StoreKey::User, "{\"username\":").unwrap();

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::Corrupt)
    );
    assert!(store_is_empty(&store));
}

#[tokio::test]
async fn valid_token_passes_remote_validation() {
    let mut server = Server::new_async().await;
    let token = make_token("t", 3600);
    let (manager, store) = seeded(&api_url(&server), &token);

    let validate = server
        .mock("GET", VALIDATE)
        .match_header("authorization", bearer(&token).as_str())
        .with_status(200)
        .with_body(json!({ "_id": "665f1a", "username": "chef" }).to_string())
        .expect(1)
        .create_async()
        .await;

    match manager.bootstrap().await {
        BootstrapOutcome::Valid(credential) => {
            assert_eq!(credential.token, token);
            assert_eq!(credential.user.username, "chef");
            assert_eq!(credential.role, Role::Admin);
        }
        other => panic!("expected valid session, got {:?}", other),
    }
    assert_eq!(stored_token(&store).as_deref(), Some(token.as_str()));
    validate.assert_async().await;
}

#[tokio::test]
async fn expired_token_is_refreshed_before_validation() {
    let mut server = Server::new_async().await;
    let old = make_token("old", -1);
    let fresh = make_token("fresh", 3600);
    let (manager, store) = seeded(&api_url(&server), &old);

    let validate_old = server
        .mock("GET", VALIDATE)
        .match_header("authorization", bearer(&old).as_str())
        .expect(0)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH)
        .match_header("authorization", bearer(&old).as_str())
        .with_status(200)
        .with_body(json!({ "token": fresh }).to_string())
        .expect(1)
        .create_async()
        .await;
    let validate_fresh = server
        .mock("GET", VALIDATE)
        .match_header("authorization", bearer(&fresh).as_str())
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    match manager.bootstrap().await {
        BootstrapOutcome::Valid(credential) => assert_eq!(credential.token, fresh),
        other => panic!("expected valid session, got {:?}", other),
    }
    assert_eq!(stored_token(&store).as_deref(), Some(fresh.as_str()));
    refresh.assert_async().await;
    validate_fresh.assert_async().await;
    validate_old.assert_async().await;
}

#[tokio::test]
async fn expired_token_with_failed_refresh_is_invalid() {
    let mut server = Server::new_async().await;
    let (manager, store) = seeded(&api_url(&server), &make_token("old", -60));

    server.mock("POST", REFRESH).with_status(503).create_async().await;
    let validate = server.mock("GET", VALIDATE).expect(0).create_async().await;

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::RefreshFailed)
    );
    assert!(store_is_empty(&store));
    validate.assert_async().await;
}

#[tokio::test]
async fn unreachable_auth_service_soft_passes() {
    let token = make_token("t", 3600);
    let (manager, store) = seeded(&refused_url(), &token);

    match manager.bootstrap().await {
        BootstrapOutcome::Valid(credential) => {
            assert_eq!(credential.token, token);
            assert_eq!(credential.user.username, "chef");
            assert_eq!(credential.role, Role::Admin);
        }
        other => panic!("expected soft-pass, got {:?}", other),
    }
    assert!(!store_is_empty(&store));
}

#[tokio::test]
async fn rejected_token_is_retried_once_with_refresh() {
    let mut server = Server::new_async().await;
    let old = make_token("old", 3600);
    let fresh = make_token("fresh", 3600);
    let (manager, _store) = seeded(&api_url(&server), &old);

    let validate_old = server
        .mock("GET", VALIDATE)
        .match_header("authorization", bearer(&old).as_str())
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", REFRESH)
        .with_status(200)
        .with_body(json!({ "token": fresh }).to_string())
        .expect(1)
        .create_async()
        .await;
    let validate_fresh = server
        .mock("GET", VALIDATE)
        .match_header("authorization", bearer(&fresh).as_str())
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    assert!(manager.bootstrap().await.is_valid());
    validate_old.assert_async().await;
    refresh.assert_async().await;
    validate_fresh.assert_async().await;
}

#[tokio::test]
async fn rejected_token_with_rejected_refresh_is_invalid() {
    let mut server = Server::new_async().await;
    let (manager, store) = seeded(&api_url(&server), &make_token("old", 3600));

    server.mock("GET", VALIDATE).with_status(401).expect(1).create_async().await;
    let refresh = server
        .mock("POST", REFRESH)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::Rejected)
    );
    assert!(store_is_empty(&store));
    refresh.assert_async().await;
}

#[tokio::test]
async fn refreshed_token_rejected_again_is_invalid() {
    let mut server = Server::new_async().await;
    let (manager, store) = seeded(&api_url(&server), &make_token("old", 3600));

    let validate = server.mock("GET", VALIDATE).with_status(401).expect(2).create_async().await;
    server
        .mock("POST", REFRESH)
        .with_status(200)
        .with_body(json!({ "token": make_token("fresh", 3600) }).to_string())
        .expect(1)
        .create_async()
        .await;

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::Rejected)
    );
    assert!(store_is_empty(&store));
    validate.assert_async().await;
}

#[tokio::test]
async fn base_url_without_scheme_is_not_soft_passed() {
    let (manager, store) = seeded("recetas.local/api", &make_token("t", 3600));

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::Rejected)
    );
    assert!(store_is_empty(&store));
}

#[tokio::test]
async fn stalled_bootstrap_hits_deadline_and_clears() {
    let (_listener, url) = blackhole();
    let config = SessionConfig {
        bootstrap_deadline_secs: 1,
        validate_timeout_secs: 30,
        ..SessionConfig::default()
    };
    let (manager, store) = seeded_with(&url, &make_token("t", 3600), config);

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::Stalled)
    );
    assert!(store_is_empty(&store));
    assert!(!manager.state().is_validating());
}

#[tokio::test]
async fn refresh_after_stalled_bootstrap_uses_the_new_session() {
    let old = make_token("old", -60);
    let new = make_token("new", 3600);
    let fresh = make_token("fresh", 7200);
    let server = RefreshServer::start(&old, &fresh).await;
    let config = SessionConfig {
        bootstrap_deadline_secs: 1,
        ..SessionConfig::default()
    };
    let (manager, store) = seeded_with(&server.url, &old, config);

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::Stalled)
    );
    assert!(store_is_empty(&store));

    // The user signs in again while the old refresh is still unanswered.
    credentials::save_credential(store.as_ref(), &credential(&new)).unwrap();
    manager.reset_state();
    server.release.notify_one();

    assert_eq!(manager.refresh_outcome().await, RefreshOutcome::Refreshed(fresh.clone()));
    assert_eq!(stored_token(&store).as_deref(), Some(fresh.as_str()));
    assert_eq!(server.seen(), vec![bearer(&old), bearer(&new)]);
}

#[tokio::test]
async fn concurrent_bootstrap_reports_busy() {
    let (_listener, url) = blackhole();
    let config = SessionConfig {
        bootstrap_deadline_secs: 1,
        validate_timeout_secs: 30,
        ..SessionConfig::default()
    };
    let (manager, store) = seeded_with(&url, &make_token("t", 3600), config);

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.bootstrap().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.state().is_validating());

    assert_eq!(
        manager.bootstrap().await,
        BootstrapOutcome::Invalid(InvalidReason::Busy)
    );
    assert!(!store_is_empty(&store), "a busy bootstrap leaves the store alone");

    assert_eq!(
        first.await.unwrap(),
        BootstrapOutcome::Invalid(InvalidReason::Stalled)
    );
    assert!(!manager.state().is_validating());
}
