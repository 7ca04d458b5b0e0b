//! Tests for issuance, validation and revocation.
//!
//! Tests cover:
//! - Issue then validate
//! - Expiry judged by the injected clock
//! - Logout and logout everywhere
//! - Batch validation order and independence
//! - Inactive and deleted users
//! - Backend failures surface as storage errors

mod common;

use std::sync::Arc;

use common::{BACKENDS, Backend, PASSWORD, setup, setup_with_storage};
use tokenwarden::db::SqliteStorage;
use tokenwarden::{AuthConfig, AuthError, Metadata};

#[tokio::test]
async fn test_issue_then_validate() {
    for backend in BACKENDS {
        let ctx = setup(backend).await;
        let alice = ctx.register("alice").await;
        let pair = ctx.service.issuer().issue(&alice.id, &Metadata::new()).unwrap();

        let user = ctx.service.validate(&pair.access.token).await.unwrap();
        assert_eq!(user.id, alice.id, "{backend:?}");
        assert!(ctx.service.is_valid(&pair.access.token).await);
    }
}

#[tokio::test]
async fn test_expired_access_token() {
    for backend in BACKENDS {
        let ctx = setup(backend).await;
        ctx.register("alice").await;
        let pair = ctx
            .service
            .login("alice", PASSWORD, &Metadata::new())
            .await
            .unwrap();

        // Valid through the expiry second itself.
        ctx.clock.set(pair.access.expires_at);
        assert!(ctx.service.is_valid(&pair.access.token).await);

        ctx.clock.advance(1);
        let result = ctx.service.validate(&pair.access.token).await;
        assert!(matches!(result, Err(AuthError::TokenExpired)), "{backend:?}");
    }
}

#[tokio::test]
async fn test_logout_revokes_both_tokens() {
    for backend in BACKENDS {
        let ctx = setup(backend).await;
        ctx.register("alice").await;
        let pair = ctx
            .service
            .login("alice", PASSWORD, &Metadata::new())
            .await
            .unwrap();

        ctx.service
            .logout(&pair.access.token, Some(&pair.refresh.token))
            .await
            .unwrap();
        // Logging out twice is harmless.
        ctx.service
            .logout(&pair.access.token, Some(&pair.refresh.token))
            .await
            .unwrap();

        assert!(matches!(
            ctx.service.validate(&pair.access.token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(
            ctx.service.rotate(&pair.refresh.token).await,
            Err(AuthError::TokenRevoked)
        ));
    }
}

#[tokio::test]
async fn test_logout_everywhere() {
    for backend in BACKENDS {
        let ctx = setup(backend).await;
        let alice = ctx.register("alice").await;
        let bob = ctx.register("bob").await;

        let laptop = ctx
            .service
            .login("alice", PASSWORD, &Metadata::new())
            .await
            .unwrap();
        let phone = ctx
            .service
            .login("alice@example.com", PASSWORD, &Metadata::new())
            .await
            .unwrap();
        let other = ctx
            .service
            .login("bob", PASSWORD, &Metadata::new())
            .await
            .unwrap();

        assert_eq!(ctx.service.logout_everywhere(&alice.id).await.unwrap(), 4);

        for token in [&laptop.access.token, &phone.access.token] {
            assert!(matches!(
                ctx.service.validate(token).await,
                Err(AuthError::TokenRevoked)
            ));
        }
        assert!(matches!(
            ctx.service.rotate(&phone.refresh.token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(ctx.service.active_sessions(&alice.id).is_empty());

        assert_eq!(ctx.service.validate(&other.access.token).await.unwrap().id, bob.id);
        assert_eq!(ctx.service.active_sessions(&bob.id).len(), 2);
    }
}

#[tokio::test]
async fn test_validate_batch_preserves_order() {
    let ctx = setup(Backend::Sqlite).await;
    let alice = ctx.register("alice").await;
    let bob = ctx.register("bob").await;
    let alice_pair = ctx.service.issuer().issue(&alice.id, &Metadata::new()).unwrap();
    let bob_pair = ctx.service.issuer().issue(&bob.id, &Metadata::new()).unwrap();
    ctx.service
        .revocations()
        .revoke_token(&bob_pair.access.token)
        .await
        .unwrap();

    let tokens = [
        bob_pair.access.token.as_str(),
        "garbage",
        alice_pair.access.token.as_str(),
        alice_pair.refresh.token.as_str(),
    ];
    let results = ctx.service.validate_batch(&tokens[..]).await;

    assert_eq!(results.len(), 4);
    assert!(matches!(results[0].error(), Some(AuthError::TokenRevoked)));
    assert!(matches!(results[1].error(), Some(AuthError::MalformedToken)));
    assert_eq!(results[2].user().map(|u| u.id.as_str()), Some(alice.id.as_str()));
    assert!(matches!(results[3].error(), Some(AuthError::InvalidSignature)));
}

#[tokio::test]
async fn test_inactive_user_rejected() {
    for backend in BACKENDS {
        let ctx = setup(backend).await;
        let alice = ctx.register("alice").await;
        let pair = ctx.service.issuer().issue(&alice.id, &Metadata::new()).unwrap();

        ctx.service.set_active(&alice.id, false).await.unwrap();
        assert!(matches!(
            ctx.service.validate(&pair.access.token).await,
            Err(AuthError::UserInactive)
        ));
        assert!(matches!(
            ctx.service.login("alice", PASSWORD, &Metadata::new()).await,
            Err(AuthError::UserInactive)
        ));

        ctx.service.set_active(&alice.id, true).await.unwrap();
        assert!(ctx.service.is_valid(&pair.access.token).await);
    }
}

#[tokio::test]
async fn test_deleted_user_not_found() {
    for backend in BACKENDS {
        let ctx = setup(backend).await;
        let alice = ctx.register("alice").await;
        let pair = ctx.service.issuer().issue(&alice.id, &Metadata::new()).unwrap();

        ctx.storage().delete_user(&alice.id).await.unwrap();
        assert!(matches!(
            ctx.service.validate(&pair.access.token).await,
            Err(AuthError::UserNotFound)
        ));
    }
}

#[tokio::test]
async fn test_cleanup_purges_only_lapsed_records() {
    for backend in BACKENDS {
        let ctx = setup(backend).await;
        ctx.register("alice").await;
        let pair = ctx
            .service
            .login("alice", PASSWORD, &Metadata::new())
            .await
            .unwrap();
        ctx.service
            .logout(&pair.access.token, Some(&pair.refresh.token))
            .await
            .unwrap();

        assert_eq!(ctx.service.cleanup().await.unwrap(), 0);

        // At its expiry second the access token still validates, so its
        // record must survive.
        ctx.clock.set(pair.access.expires_at);
        assert_eq!(ctx.service.cleanup().await.unwrap(), 0, "{backend:?}");
        assert!(matches!(
            ctx.service.validate(&pair.access.token).await,
            Err(AuthError::TokenRevoked)
        ));

        ctx.clock.set(pair.access.expires_at + 1);
        assert_eq!(ctx.service.cleanup().await.unwrap(), 1, "{backend:?}");
        // The refresh record outlives the access record.
        assert!(matches!(
            ctx.service.rotate(&pair.refresh.token).await,
            Err(AuthError::TokenRevoked)
        ));

        ctx.clock.set(pair.refresh.expires_at + 1);
        assert_eq!(ctx.service.cleanup().await.unwrap(), 1, "{backend:?}");
    }
}

#[tokio::test]
async fn test_closed_pool_surfaces_storage_error() {
    let storage = SqliteStorage::open(":memory:")
        .await
        .expect("Failed to open test database");
    let ctx = setup_with_storage(
        Backend::Sqlite,
        Arc::new(storage.clone()),
        AuthConfig::default(),
    )
    .await;
    ctx.register("alice").await;
    let pair = ctx
        .service
        .login("alice", PASSWORD, &Metadata::new())
        .await
        .unwrap();

    storage.pool().close().await;

    let result = ctx.service.validate(&pair.access.token).await;
    assert!(matches!(result, Err(AuthError::Storage(_))), "{result:?}");
    let result = ctx.service.rotate(&pair.refresh.token).await;
    assert!(matches!(result, Err(AuthError::Storage(_))), "{result:?}");
    let result = ctx.service.ping().await;
    assert!(matches!(result, Err(AuthError::Storage(_))), "{result:?}");
    assert!(!ctx.service.is_valid(&pair.access.token).await);
}
