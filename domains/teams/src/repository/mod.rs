//! Repository implementations for the Teams domain
//!
//! Pool-backed repositories cover single-statement reads and writes.
//! Multi-row invariants go through the `*_tx` free functions in
//! [`transactions`], which take an open transaction.

pub mod api_keys;
pub mod invites;
pub mod members;
pub mod prompts;
pub mod sessions;
pub mod teams;
pub mod transactions;
pub mod users;

use sqlx::{PgPool, Postgres, Transaction};

pub use api_keys::ApiKeyRepository;
pub use invites::InviteRepository;
pub use members::{MemberRepository, MemberWithUser};
pub use prompts::PromptRepository;
pub use sessions::{NewSession, SessionRepository};
pub use teams::{TeamRepository, TeamWithRole};
pub use users::UserRepository;

pub(crate) const USER_COLUMNS: &str = "id, external_id, email, name, password_hash, \
    terms_accepted_at, team_created_or_joined_at, teammates_invited_at, \
    onboarding_completed_at, email_confirmed_at, security_version, default_team_id, \
    default_team_slug, deleted_at, created_at, updated_at";

pub(crate) const SESSION_COLUMNS: &str = "id, user_id, external_session_id, signed_in_at, \
    last_seen_at, version, device, ip, location, expires_at, revoked_at, created_at";

pub(crate) const TEAM_COLUMNS: &str = "id, name, slug, external_org_id, stripe_customer_id, \
    created_by, subscription_id, subscription_tier_chosen_at, free_trial_at, \
    onboarding_completed_at, stripe_setup_error_code, stripe_setup_decline_code, \
    stripe_setup_error_message, current_team_invite_id, deleted_at, created_at, updated_at";

pub(crate) const MEMBER_COLUMNS: &str = "id, team_id, user_id, email, role, status, \
    external_membership_id, joined_at, left_at, removed_at, onboarded_at, created_at, updated_at";

pub(crate) const INVITE_COLUMNS: &str = "id, team_id, email, token, state, invite_type, role, \
    invited_by, max_uses, used_times, expires_at, canceled_at, accepted_at, \
    external_invite_id, team_member_id, created_at";

pub(crate) const PROMPT_COLUMNS: &str = "id, user_id, team_id, prompt_type, title, body, \
    action_label, action_url, priority, starts_at, ends_at, dismissible, dismissed_at, created_at";

pub(crate) const API_KEY_COLUMNS: &str =
    "id, user_id, name, key_prefix, key_hash, last_used_at, expires_at, revoked_at, created_at";

/// Combined repository access for the Teams domain
#[derive(Clone)]
pub struct TeamsRepositories {
    pool: PgPool,
    pub users: UserRepository,
    pub sessions: SessionRepository,
    pub teams: TeamRepository,
    pub members: MemberRepository,
    pub invites: InviteRepository,
    pub prompts: PromptRepository,
    pub api_keys: ApiKeyRepository,
}

impl TeamsRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            sessions: SessionRepository::new(pool.clone()),
            teams: TeamRepository::new(pool.clone()),
            members: MemberRepository::new(pool.clone()),
            invites: InviteRepository::new(pool.clone()),
            prompts: PromptRepository::new(pool.clone()),
            api_keys: ApiKeyRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a new database transaction.
    pub async fn begin(&self) -> std::result::Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Begin a transaction at SERIALIZABLE isolation.
    ///
    /// Callers run inside `tenantry_common::db::retry_serializable`.
    pub async fn begin_serializable(
        &self,
    ) -> std::result::Result<Transaction<'static, Postgres>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}
