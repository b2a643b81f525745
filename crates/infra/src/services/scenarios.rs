//! End-to-end behavior of the lifecycle and engine over in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatehouse_auth::{
    Action, AuthConfig, AuthError, BootstrapAdmin, ClientMeta, DEFAULT_PERMISSIONS, PASSWORD_MAX_BYTES,
    PermissionSpec, Registration, Resource, Session, SubjectStatus,
};
use gatehouse_core::UserId;

use super::{PermissionEngine, SessionLifecycle};
use crate::credentials::InMemoryCredentialStore;
use crate::permissions::{InMemoryPermissionStore, PermissionFilter};
use crate::sessions::{InMemorySessionStore, RotateOutcome, SessionStore};
use crate::StoreError;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

fn config() -> AuthConfig {
    AuthConfig::new(SECRET).with_password_hash_cost(4)
}

struct Harness {
    lifecycle: Arc<SessionLifecycle>,
    engine: PermissionEngine,
}

fn harness_with(config: AuthConfig, sessions: Arc<dyn SessionStore>) -> Harness {
    let credentials = Arc::new(InMemoryCredentialStore::new());
    let permissions = Arc::new(InMemoryPermissionStore::new());
    let lifecycle = SessionLifecycle::new(&config, credentials.clone(), permissions.clone(), sessions).unwrap();
    let engine = PermissionEngine::new(&config, permissions, credentials);
    Harness {
        lifecycle: Arc::new(lifecycle),
        engine,
    }
}

fn harness() -> Harness {
    harness_with(config(), Arc::new(InMemorySessionStore::new()))
}

fn alice() -> Registration {
    Registration::new("alice", "alice@x.com", "secret123")
}

fn meta() -> ClientMeta {
    ClientMeta::new(Some("10.0.0.1".into()), Some("tests".into()))
}

#[test]
fn invalid_config_is_refused_at_construction() {
    let mut zero_sweep = config();
    zero_sweep.session_sweep_interval = Some(Duration::ZERO);
    let result = SessionLifecycle::new(
        &zero_sweep,
        Arc::new(InMemoryCredentialStore::new()),
        Arc::new(InMemoryPermissionStore::new()),
        Arc::new(InMemorySessionStore::new()),
    );
    assert!(matches!(result, Err(AuthError::Validation(_))));
}

#[tokio::test]
async fn register_then_login_opens_distinct_sessions() {
    let h = harness();

    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();
    let roles = h.engine.subject_roles(registered.subject.id).await.unwrap();
    assert_eq!(roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["user"]);
    assert_eq!(h.lifecycle.list_sessions(registered.subject.id).await.unwrap().len(), 1);

    let logged_in = h.lifecycle.login("Alice@X.com ", "secret123", meta()).await.unwrap();
    assert_eq!(logged_in.subject.id, registered.subject.id);
    assert_ne!(logged_in.tokens.refresh_token, registered.tokens.refresh_token);
    assert_ne!(logged_in.tokens.access_token, "");
    assert_eq!(h.lifecycle.list_sessions(registered.subject.id).await.unwrap().len(), 2);

    let claims = h.lifecycle.verify_access_token(&logged_in.tokens.access_token).unwrap();
    assert_eq!(claims.sub, registered.subject.id);
    assert_eq!(claims.name, "alice");
    assert_eq!(claims.role, "user");
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let h = harness();
    h.lifecycle.register(&alice(), meta()).await.unwrap();

    let same_email = Registration::new("alice2", "ALICE@x.com", "secret123");
    assert_eq!(h.lifecycle.register(&same_email, meta()).await.unwrap_err(), AuthError::DuplicateSubject);
    let same_name = Registration::new("alice", "other@x.com", "secret123");
    assert_eq!(h.lifecycle.register(&same_name, meta()).await.unwrap_err(), AuthError::DuplicateSubject);
}

#[tokio::test]
async fn bad_credentials_do_not_reveal_which_part_failed() {
    let h = harness();
    h.lifecycle.register(&alice(), meta()).await.unwrap();

    let wrong_password = h.lifecycle.login("alice@x.com", "nope-nope", meta()).await.unwrap_err();
    let unknown_email = h.lifecycle.login("bob@x.com", "secret123", meta()).await.unwrap_err();
    assert_eq!(wrong_password, AuthError::InvalidCredentials);
    assert_eq!(unknown_email, AuthError::InvalidCredentials);
}

#[tokio::test]
async fn password_bytes_past_the_bcrypt_limit_count() {
    let h = harness();
    let at_limit = "k".repeat(PASSWORD_MAX_BYTES);
    h.lifecycle
        .register(&Registration::new("alice", "alice@x.com", at_limit.as_str()), meta())
        .await
        .unwrap();

    let too_long = Registration::new("bob", "bob@x.com", "k".repeat(PASSWORD_MAX_BYTES + 1));
    assert!(matches!(h.lifecycle.register(&too_long, meta()).await, Err(AuthError::Validation(_))));

    let wrong_suffix = format!("{at_limit}-not-the-password");
    assert_eq!(
        h.lifecycle.login("alice@x.com", &wrong_suffix, meta()).await.unwrap_err(),
        AuthError::InvalidCredentials
    );
    h.lifecycle.login("alice@x.com", &at_limit, meta()).await.unwrap();
}

#[tokio::test]
async fn deleted_subjects_lose_sessions_and_cannot_log_in() {
    let h = harness();
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();
    let bob = h
        .lifecycle
        .register(&Registration::new("bob", "bob@x.com", "secret123"), meta())
        .await
        .unwrap();
    let id = registered.subject.id;
    h.lifecycle.login("alice@x.com", "secret123", meta()).await.unwrap();

    assert_eq!(h.lifecycle.delete_subject(id).await.unwrap(), 2);
    assert_eq!(h.lifecycle.delete_subject(id).await.unwrap_err(), AuthError::NotFound("subject"));

    assert_eq!(
        h.lifecycle.login("alice@x.com", "secret123", meta()).await.unwrap_err(),
        AuthError::InvalidCredentials
    );
    assert_eq!(
        h.lifecycle.refresh(&registered.tokens.refresh_token, meta()).await.unwrap_err(),
        AuthError::RevokedSession
    );
    assert_eq!(h.lifecycle.find_subject(id).await.unwrap(), None);
    assert_eq!(
        h.lifecycle.set_status(id, SubjectStatus::Active).await.unwrap_err(),
        AuthError::NotFound("subject")
    );
    assert_eq!(h.lifecycle.register(&alice(), meta()).await.unwrap_err(), AuthError::DuplicateSubject);

    let page = h.lifecycle.list_subjects(10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.subjects.iter().map(|s| s.id).collect::<Vec<_>>(), vec![bob.subject.id]);
}

#[tokio::test]
async fn disabling_an_account_blocks_login_and_revokes_sessions() {
    let h = harness();
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();

    h.lifecycle
        .set_status(registered.subject.id, SubjectStatus::Banned)
        .await
        .unwrap();

    assert_eq!(
        h.lifecycle.login("alice@x.com", "secret123", meta()).await.unwrap_err(),
        AuthError::AccountDisabled
    );
    assert_eq!(
        h.lifecycle.refresh(&registered.tokens.refresh_token, meta()).await.unwrap_err(),
        AuthError::RevokedSession
    );
}

#[tokio::test]
async fn refresh_tokens_are_single_use() {
    let h = harness();
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();
    let original = registered.tokens.refresh_token;

    let rotated = h.lifecycle.refresh(&original, ClientMeta::default()).await.unwrap();
    assert_ne!(rotated.refresh_token, original);

    assert_eq!(
        h.lifecycle.refresh(&original, meta()).await.unwrap_err(),
        AuthError::RevokedSession
    );
    h.lifecycle.refresh(&rotated.refresh_token, meta()).await.unwrap();
}

#[tokio::test]
async fn concurrent_refresh_of_one_token_succeeds_once() {
    let h = harness();
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let lifecycle = h.lifecycle.clone();
        let token = registered.tokens.refresh_token.clone();
        tasks.push(tokio::spawn(async move { lifecycle.refresh(&token, ClientMeta::default()).await }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e, AuthError::RevokedSession),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logout_racing_refresh_leaves_nothing_live() {
    let h = harness();
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();
    let user = registered.subject.id;

    for _ in 0..20 {
        let current = h.lifecycle.login("alice@x.com", "secret123", meta()).await.unwrap();
        let refreshing = {
            let lifecycle = h.lifecycle.clone();
            let token = current.tokens.refresh_token.clone();
            tokio::spawn(async move { lifecycle.refresh(&token, meta()).await })
        };
        let logging_out = {
            let lifecycle = h.lifecycle.clone();
            let token = current.tokens.access_token.clone();
            tokio::spawn(async move { lifecycle.logout(&token).await })
        };

        logging_out.await.unwrap().unwrap();
        if let Err(e) = refreshing.await.unwrap() {
            assert_eq!(e, AuthError::RevokedSession);
        }
        assert!(h.lifecycle.list_sessions(user).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn logout_revokes_every_session_of_the_subject() {
    let h = harness();
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();
    let second = h.lifecycle.login("alice@x.com", "secret123", meta()).await.unwrap();
    let third = h.lifecycle.login("alice@x.com", "secret123", meta()).await.unwrap();

    let revoked = h.lifecycle.logout(&second.tokens.access_token).await.unwrap();
    assert_eq!(revoked, 3);

    for token in [
        registered.tokens.refresh_token,
        second.tokens.refresh_token,
        third.tokens.refresh_token,
    ] {
        assert_eq!(h.lifecycle.refresh(&token, meta()).await.unwrap_err(), AuthError::RevokedSession);
    }
}

#[tokio::test]
async fn logout_with_a_bad_token_is_rejected() {
    let h = harness();
    assert_eq!(h.lifecycle.logout("not-a-token").await.unwrap_err(), AuthError::InvalidToken);
}

#[tokio::test]
async fn revoke_all_twice_is_not_an_error() {
    let h = harness();
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();

    assert_eq!(h.lifecycle.revoke_all(registered.subject.id).await.unwrap(), 1);
    assert_eq!(h.lifecycle.revoke_all(registered.subject.id).await.unwrap(), 0);
    assert!(h.lifecycle.list_sessions(registered.subject.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_and_expired_refresh_tokens_are_distinguished() {
    let h = harness_with(
        config().with_refresh_token_ttl(Duration::from_millis(1)),
        Arc::new(InMemorySessionStore::new()),
    );
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        h.lifecycle.refresh(&registered.tokens.refresh_token, meta()).await.unwrap_err(),
        AuthError::ExpiredSession
    );
    assert_eq!(
        h.lifecycle.refresh("deadbeef", meta()).await.unwrap_err(),
        AuthError::UnknownSession
    );
    assert_eq!(h.lifecycle.purge_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn deny_overrides_role_grant() {
    let h = harness();
    let user = h.lifecycle.register(&alice(), meta()).await.unwrap().subject.id;

    let editor = h.engine.create_role("editor", "Edits files").await.unwrap();
    let delete = h
        .engine
        .create_permission(&PermissionSpec::new("file.delete", "", "file", "delete"))
        .await
        .unwrap();
    h.engine.add_role_permission(editor.id, delete.id).await.unwrap();
    h.engine.assign_role(user, editor.id).await.unwrap();
    assert!(h.engine.check(user, Resource::File, Action::Delete).await.unwrap());

    h.engine.grant_direct(user, delete.id, true).await.unwrap();
    assert!(!h.engine.check(user, Resource::File, Action::Delete).await.unwrap());
    assert!(!h.engine.effective_permissions(user).await.unwrap().contains(delete.id));

    // A later grant overwrites the denial instead of adding a second row.
    h.engine.grant_direct(user, delete.id, false).await.unwrap();
    assert!(h.engine.check(user, Resource::File, Action::Delete).await.unwrap());
    assert_eq!(h.engine.grants(user).await.unwrap().direct.len(), 1);
}

#[tokio::test]
async fn mutations_are_visible_to_the_next_check() {
    let h = harness();
    let user = h.lifecycle.register(&alice(), meta()).await.unwrap().subject.id;
    let role = h.engine.subject_roles(user).await.unwrap().remove(0);
    let read = h
        .engine
        .create_permission(&PermissionSpec::new("job.read", "", "job", "read"))
        .await
        .unwrap();

    let before = h.engine.effective_permissions(user).await.unwrap();
    assert_eq!(before, h.engine.effective_permissions(user).await.unwrap());
    assert!(!before.contains(read.id));

    h.engine.add_role_permission(role.id, read.id).await.unwrap();
    assert!(h.engine.check(user, Resource::Job, Action::Read).await.unwrap());

    h.engine.remove_role_permission(role.id, read.id).await.unwrap();
    assert!(!h.engine.check(user, Resource::Job, Action::Read).await.unwrap());
}

#[tokio::test]
async fn role_deletion_is_blocked_while_assigned() {
    let h = harness();
    let user = h.lifecycle.register(&alice(), meta()).await.unwrap().subject.id;
    let temp = h.engine.create_role("temp", "").await.unwrap();
    h.engine.assign_role(user, temp.id).await.unwrap();

    assert_eq!(
        h.engine.assign_role(user, temp.id).await.unwrap_err(),
        AuthError::DuplicateAssignment
    );
    assert_eq!(
        h.engine.delete_role(temp.id).await.unwrap_err(),
        AuthError::RoleInUse { holders: 1 }
    );

    h.engine.remove_role(user, temp.id).await.unwrap();
    h.engine.delete_role(temp.id).await.unwrap();
    assert_eq!(h.engine.get_role(temp.id).await.unwrap_err(), AuthError::NotFound("role"));
}

#[tokio::test]
async fn invalid_permission_specs_are_rejected_before_persisting() {
    let h = harness();
    let err = h
        .engine
        .create_permission(&PermissionSpec::new("ship.fly", "", "spaceship", "fly"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidPermissionSpec(_)));
    assert!(h.engine.list_permissions(PermissionFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn role_admin_round_trip() {
    let h = harness();
    let role = h.engine.create_role("support", "Helpdesk").await.unwrap();
    assert_eq!(
        h.engine.create_role("support", "").await.unwrap_err(),
        AuthError::DuplicateRole("support".into())
    );

    let renamed = h.engine.update_role(role.id, Some("helpdesk"), None).await.unwrap();
    assert_eq!(renamed.name, "helpdesk");
    assert_eq!(renamed.description, "Helpdesk");

    h.engine.create_role("ops", "").await.unwrap();
    assert_eq!(
        h.engine.update_role(role.id, Some("ops"), None).await.unwrap_err(),
        AuthError::DuplicateRole("ops".into())
    );
    assert_eq!(h.engine.list_roles().await.unwrap().len(), 2);
}

#[tokio::test]
async fn seeding_is_idempotent_and_bootstraps_admin() {
    let h = harness_with(config(), Arc::new(InMemorySessionStore::new()));

    let first = h.engine.seed_defaults().await.unwrap();
    assert_eq!(first.permissions_created, DEFAULT_PERMISSIONS.len());
    assert_eq!(first.roles_created, 2);
    let second = h.engine.seed_defaults().await.unwrap();
    assert_eq!(second, Default::default());

    let admin = BootstrapAdmin {
        email: "admin@example.com".into(),
        username: "admin".into(),
        password: "admin123".into(),
    };
    let id = h.lifecycle.bootstrap_admin(&admin).await.unwrap().unwrap();
    assert_eq!(h.lifecycle.bootstrap_admin(&admin).await.unwrap(), None);

    assert!(h.engine.check(id, Resource::System, Action::Backup).await.unwrap());
    let grouped = h.engine.subject_role_permissions(id).await.unwrap();
    assert_eq!(grouped["admin"].len(), DEFAULT_PERMISSIONS.len());

    let user = h.lifecycle.register(&alice(), meta()).await.unwrap().subject.id;
    assert!(h.engine.check(user, Resource::File, Action::Delete).await.unwrap());
    assert!(!h.engine.check(user, Resource::System, Action::Backup).await.unwrap());

    let stats = h.engine.permission_stats().await.unwrap();
    assert_eq!(stats.total_roles, 2);
    assert_eq!(stats.total_permissions, DEFAULT_PERMISSIONS.len() as u64);
    assert_eq!(stats.by_resource.values().sum::<u64>(), stats.total_permissions);
    assert_eq!(stats.direct_grants + stats.direct_denials, 0);
}

/// Delegates to an in-memory store, stalling `get` and failing `rotate`.
struct FaultySessions {
    inner: InMemorySessionStore,
    stall_gets: bool,
}

#[async_trait]
impl SessionStore for FaultySessions {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }
    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        self.inner.create(session).await
    }
    async fn get(&self, refresh_token: &str) -> Result<Option<Session>, StoreError> {
        if self.stall_gets {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.inner.get(refresh_token).await
    }
    async fn mark_revoked(&self, refresh_token: &str) -> Result<bool, StoreError> {
        self.inner.mark_revoked(refresh_token).await
    }
    async fn rotate(&self, _: &str, _: &Session, _: DateTime<Utc>) -> Result<RotateOutcome, StoreError> {
        Err(StoreError::Unavailable("connection reset".into()))
    }
    async fn revoke_all_for_subject(&self, user: UserId) -> Result<u64, StoreError> {
        self.inner.revoke_all_for_subject(user).await
    }
    async fn list_live_for_subject(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        self.inner.list_live_for_subject(user, now).await
    }
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.purge_expired(now).await
    }
}

#[tokio::test]
async fn failed_rotation_is_fatal_and_spends_the_token() {
    let sessions = Arc::new(FaultySessions {
        inner: InMemorySessionStore::new(),
        stall_gets: false,
    });
    let h = harness_with(config(), sessions.clone());
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();

    let err = h.lifecycle.refresh(&registered.tokens.refresh_token, meta()).await.unwrap_err();
    assert_eq!(err, AuthError::RotationAborted);
    assert!(!err.is_retryable());

    let old = sessions.inner.get(&registered.tokens.refresh_token).await.unwrap().unwrap();
    assert!(old.revoked);
    assert!(sessions.inner.list_live_for_subject(registered.subject.id, Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_store_surfaces_as_retryable_unavailability() {
    let sessions = Arc::new(FaultySessions {
        inner: InMemorySessionStore::new(),
        stall_gets: true,
    });
    let h = harness_with(config().with_store_timeout(Duration::from_millis(20)), sessions);
    let registered = h.lifecycle.register(&alice(), meta()).await.unwrap();

    let err = h.lifecycle.refresh(&registered.tokens.refresh_token, meta()).await.unwrap_err();
    assert!(matches!(err, AuthError::StoreUnavailable(_)));
    assert!(err.is_retryable());
}
