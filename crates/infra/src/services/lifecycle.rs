//! Session Lifecycle Manager: register, login, refresh (rotation) and logout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use gatehouse_auth::password::{hash_password, verify_against_dummy, verify_password};
use gatehouse_auth::{
    ADMIN_ROLE, AccessClaims, AuthConfig, AuthError, BootstrapAdmin, ClientMeta, IssuedToken, Registration,
    Role, RoleAssignment, Session, Subject, SubjectStatus, TokenCodec, ValidRegistration, normalize_email,
};
use gatehouse_core::UserId;

use crate::credentials::{CredentialStore, SubjectPage};
use crate::permissions::PermissionStore;
use crate::sessions::{RotateOutcome, SessionStore};
use crate::timeout::bounded;
use crate::StoreError;

/// Credentials handed back to a client after register, login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenPair {
    fn new(access: IssuedToken, session: &Session) -> Self {
        Self {
            access_token: access.token,
            refresh_token: session.refresh_token.clone(),
            token_type: "Bearer",
            access_expires_at: access.claims.expires_at,
            refresh_expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub subject: Subject,
    pub tokens: TokenPair,
}

pub struct SessionLifecycle {
    credentials: Arc<dyn CredentialStore>,
    permissions: Arc<dyn PermissionStore>,
    sessions: Arc<dyn SessionStore>,
    codec: TokenCodec,
    refresh_ttl: chrono::Duration,
    store_timeout: Duration,
    default_role: String,
    hash_cost: u32,
}

impl SessionLifecycle {
    pub fn new(
        config: &AuthConfig,
        credentials: Arc<dyn CredentialStore>,
        permissions: Arc<dyn PermissionStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, AuthError> {
        config.validate().map_err(|e| AuthError::validation(e.to_string()))?;
        let refresh_ttl = chrono::Duration::from_std(config.refresh_token_ttl)
            .map_err(|_| AuthError::validation("refresh token TTL out of range"))?;
        Ok(Self {
            credentials,
            permissions,
            sessions,
            codec: TokenCodec::from_config(config)?,
            refresh_ttl,
            store_timeout: config.store_timeout,
            default_role: config.default_role.clone(),
            hash_cost: config.password_hash_cost,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn session_backend(&self) -> &'static str {
        self.sessions.backend_name()
    }

    async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        Ok(bounded(self.store_timeout, operation, call).await?)
    }

    /// Create a subject, give it the default role and open its first session.
    #[instrument(skip_all, fields(username = %registration.username.trim()), err)]
    pub async fn register(&self, registration: &Registration, meta: ClientMeta) -> Result<AuthOutcome, AuthError> {
        let valid = registration.validate()?;
        let subject = self.create_subject(valid).await?;

        let role = self.ensure_default_role().await?;
        self.call(
            "assign_role",
            self.permissions.assign_role(&RoleAssignment {
                user_id: subject.id,
                role_id: role.id,
                assigned_at: Utc::now(),
            }),
        )
        .await?;
        info!(user_id = %subject.id, role = %role.name, "subject registered");

        let tokens = self.open_session(&subject, &role.name, meta).await?;
        Ok(AuthOutcome { subject, tokens })
    }

    /// "No such subject", "deleted subject" and "wrong password" all yield
    /// `InvalidCredentials`.
    #[instrument(skip_all, err)]
    pub async fn login(&self, email: &str, password: &str, meta: ClientMeta) -> Result<AuthOutcome, AuthError> {
        let email = normalize_email(email);
        let Some(subject) = self.call("find_subject_by_email", self.credentials.find_by_email(&email)).await? else {
            verify_against_dummy(password, self.hash_cost).await;
            warn!("login rejected: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(password, &subject.password_hash).await? || subject.is_deleted() {
            warn!(user_id = %subject.id, "login rejected: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        }
        if !subject.status.is_active() {
            warn!(user_id = %subject.id, status = %subject.status, "login rejected: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        let role = self.primary_role(subject.id).await?;
        let tokens = self.open_session(&subject, &role, meta).await?;
        info!(user_id = %subject.id, "login succeeded");
        Ok(AuthOutcome { subject, tokens })
    }

    /// Exchange a refresh token for a new pair; the presented token is spent.
    ///
    /// If the store fails mid-rotation the presented token is revoked on a
    /// best-effort basis and the call fails with `RotationAborted`: the client
    /// must log in again rather than retry.
    #[instrument(skip_all, err)]
    pub async fn refresh(&self, refresh_token: &str, meta: ClientMeta) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let session = self
            .call("get_session", self.sessions.get(refresh_token))
            .await?
            .ok_or(AuthError::UnknownSession)?;
        if let Err(e) = session.ensure_usable(now) {
            if e == AuthError::RevokedSession {
                warn!(user_id = %session.user_id, session = session.fingerprint(), "refresh token replay rejected");
            }
            return Err(e);
        }

        let subject = self
            .call("find_subject_by_id", self.credentials.find_by_id(session.user_id))
            .await?
            .filter(|s| !s.is_deleted())
            .ok_or(AuthError::UnknownSession)?;
        if !subject.status.is_active() {
            return Err(AuthError::AccountDisabled);
        }

        let role = self.primary_role(subject.id).await?;
        let access = self.codec.issue(subject.id, subject.display_name(), &role)?;
        let meta = if meta == ClientMeta::default() {
            ClientMeta::new(session.ip_address.clone(), session.user_agent.clone())
        } else {
            meta
        };
        let replacement = Session::start(subject.id, self.refresh_ttl, meta, now);

        match bounded(
            self.store_timeout,
            "rotate_session",
            self.sessions.rotate(refresh_token, &replacement, now),
        )
        .await
        {
            Ok(RotateOutcome::Rotated) => {
                info!(user_id = %subject.id, session = replacement.fingerprint(), "session rotated");
                Ok(TokenPair::new(access, &replacement))
            }
            Ok(RotateOutcome::Revoked) => {
                warn!(user_id = %subject.id, session = session.fingerprint(), "refresh token replay rejected");
                Err(AuthError::RevokedSession)
            }
            Ok(RotateOutcome::Expired) => Err(AuthError::ExpiredSession),
            Ok(RotateOutcome::Missing) => Err(AuthError::UnknownSession),
            Err(e) => {
                error!(user_id = %subject.id, error = %e, "session rotation failed; revoking presented token");
                if let Err(revoke_err) =
                    bounded(self.store_timeout, "mark_revoked", self.sessions.mark_revoked(refresh_token)).await
                {
                    error!(user_id = %subject.id, error = %revoke_err, "could not revoke token after failed rotation");
                }
                Err(AuthError::RotationAborted)
            }
        }
    }

    /// Revoke every session of the token's subject, not just the caller's.
    #[instrument(skip_all, err)]
    pub async fn logout(&self, access_token: &str) -> Result<u64, AuthError> {
        let claims = self.verify_access_token(access_token)?;
        self.revoke_all(claims.sub).await
    }

    /// Idempotent: a second call revokes nothing and succeeds.
    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn revoke_all(&self, user: UserId) -> Result<u64, AuthError> {
        let revoked = self
            .call("revoke_all_sessions", self.sessions.revoke_all_for_subject(user))
            .await
            .inspect_err(|e| error!(user_id = %user, error = %e, "revocation fan-out failed"))?;
        info!(user_id = %user, revoked, "sessions revoked");
        Ok(revoked)
    }

    /// Change a subject's status; anything but `active` also revokes its sessions.
    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn set_status(&self, user: UserId, status: SubjectStatus) -> Result<Subject, AuthError> {
        let mut subject = self.find_subject(user).await?.ok_or(AuthError::NotFound("subject"))?;
        subject.status = status;
        subject.updated_at = Utc::now();

        if !self.call("update_subject", self.credentials.update(&subject)).await? {
            return Err(AuthError::NotFound("subject"));
        }
        info!(user_id = %user, %status, "subject status changed");

        if !status.is_active() {
            self.revoke_all(user).await?;
        }
        Ok(subject)
    }

    pub async fn list_sessions(&self, user: UserId) -> Result<Vec<Session>, AuthError> {
        self.call("list_sessions", self.sessions.list_live_for_subject(user, Utc::now()))
            .await
    }

    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        self.call("purge_expired", self.sessions.purge_expired(Utc::now())).await
    }

    /// Deleted subjects read as absent.
    pub async fn find_subject(&self, user: UserId) -> Result<Option<Subject>, AuthError> {
        Ok(self
            .call("find_subject_by_id", self.credentials.find_by_id(user))
            .await?
            .filter(|s| !s.is_deleted()))
    }

    pub async fn list_subjects(&self, limit: u32, offset: u64) -> Result<SubjectPage, AuthError> {
        self.call("list_subjects", self.credentials.list(limit, offset)).await
    }

    /// Soft-delete a subject and revoke every session it holds.
    ///
    /// The email and username stay reserved. Deleting twice is `NotFound`.
    #[instrument(skip(self), fields(user_id = %user), err)]
    pub async fn delete_subject(&self, user: UserId) -> Result<u64, AuthError> {
        if !self.call("soft_delete_subject", self.credentials.soft_delete(user, Utc::now())).await? {
            return Err(AuthError::NotFound("subject"));
        }
        info!(user_id = %user, "subject deleted");
        self.revoke_all(user).await
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.codec.verify(token)
    }

    /// Create the configured admin account unless its email is already registered.
    ///
    /// Expects the `admin` role to exist (see `PermissionEngine::seed_defaults`).
    #[instrument(skip_all, err)]
    pub async fn bootstrap_admin(&self, admin: &BootstrapAdmin) -> Result<Option<UserId>, AuthError> {
        let valid = Registration::new(&admin.username, &admin.email, &admin.password).validate()?;
        if self
            .call("find_subject_by_email", self.credentials.find_by_email(&valid.email))
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let role = self
            .call("get_role_by_name", self.permissions.get_role_by_name(ADMIN_ROLE))
            .await?
            .ok_or(AuthError::NotFound("role"))?;
        let subject = self.create_subject(valid).await?;
        self.call(
            "assign_role",
            self.permissions.assign_role(&RoleAssignment {
                user_id: subject.id,
                role_id: role.id,
                assigned_at: Utc::now(),
            }),
        )
        .await?;
        info!(user_id = %subject.id, "bootstrap admin created");
        Ok(Some(subject.id))
    }

    async fn create_subject(&self, valid: ValidRegistration) -> Result<Subject, AuthError> {
        let email_taken = self
            .call("find_subject_by_email", self.credentials.find_by_email(&valid.email))
            .await?
            .is_some();
        let username_taken = self
            .call("find_subject_by_username", self.credentials.find_by_username(&valid.username))
            .await?
            .is_some();
        if email_taken || username_taken {
            return Err(AuthError::DuplicateSubject);
        }

        let password_hash = hash_password(&valid.password, self.hash_cost).await?;
        let now = Utc::now();
        let subject = Subject {
            id: UserId::new(),
            username: valid.username,
            email: valid.email,
            password_hash,
            status: SubjectStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        match bounded(self.store_timeout, "create_subject", self.credentials.create(&subject)).await {
            Ok(()) => Ok(subject),
            Err(StoreError::Conflict(_)) => Err(AuthError::DuplicateSubject),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_default_role(&self) -> Result<Role, AuthError> {
        if let Some(role) = self
            .call("get_role_by_name", self.permissions.get_role_by_name(&self.default_role))
            .await?
        {
            return Ok(role);
        }

        let role = Role::new(&self.default_role, "Default role for registered subjects", Utc::now());
        match bounded(self.store_timeout, "create_role", self.permissions.create_role(&role)).await {
            Ok(()) => Ok(role),
            // Lost a race with a concurrent registration.
            Err(StoreError::Conflict(_)) => self
                .call("get_role_by_name", self.permissions.get_role_by_name(&self.default_role))
                .await?
                .ok_or(AuthError::NotFound("role")),
            Err(e) => Err(e.into()),
        }
    }

    /// Earliest-assigned role, or the default role when none is held.
    async fn primary_role(&self, user: UserId) -> Result<String, AuthError> {
        let roles = self.call("subject_roles", self.permissions.subject_roles(user)).await?;
        Ok(roles
            .into_iter()
            .next()
            .map(|r| r.name)
            .unwrap_or_else(|| self.default_role.clone()))
    }

    async fn open_session(&self, subject: &Subject, primary_role: &str, meta: ClientMeta) -> Result<TokenPair, AuthError> {
        let access = self.codec.issue(subject.id, subject.display_name(), primary_role)?;
        let session = Session::start(subject.id, self.refresh_ttl, meta, Utc::now());
        self.call("create_session", self.sessions.create(&session)).await?;
        Ok(TokenPair::new(access, &session))
    }
}
