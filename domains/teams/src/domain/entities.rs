//! Domain entities for the Tenantry teams domain
//!
//! Rows map one-to-one onto the tables in `migrations/`. Business rules that
//! depend only on a single row live here; rules spanning rows live in the
//! handlers and transactional repository functions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tenantry_common::{crypto, ErrorCode, StateError};
use uuid::Uuid;

pub use crate::domain::state::InviteState;
use crate::domain::state::{InviteEvent, InviteGuardContext, InviteStateMachine};

/// Days a deleted account can still be restored by logging in
pub const RESTORE_GRACE_DAYS: i64 = 60;

/// Days a single-use invite stays valid
pub const SINGLE_INVITE_TTL_DAYS: i64 = 14;

/// Most emails accepted by one invite request
pub const MAX_INVITES_PER_REQUEST: usize = 25;

// ============================================================================
// Enums
// ============================================================================

/// Team role; ordered by rank
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "member_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    #[default]
    Member,
    Admin,
    Owner,
}

impl MemberRole {
    pub fn rank(&self) -> u8 {
        match self {
            MemberRole::Member => 1,
            MemberRole::Admin => 2,
            MemberRole::Owner => 3,
        }
    }

    /// A role may act on any role of equal or lower rank
    pub fn can_act_on(&self, target: MemberRole) -> bool {
        self.rank() >= target.rank()
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, MemberRole::Owner)
    }

    pub fn is_admin_or_above(&self) -> bool {
        self.rank() >= MemberRole::Admin.rank()
    }

    /// Role slug used for organization memberships at the identity provider
    pub fn provider_slug(&self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
            MemberRole::Owner => "owner",
        }
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.provider_slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    Active,
    Left,
    Removed,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invite_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InviteType {
    Single,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "prompt_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    Upsell,
    Feature,
    Announcement,
}

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub team_created_or_joined_at: Option<DateTime<Utc>>,
    pub teammates_invited_at: Option<DateTime<Utc>>,
    pub onboarding_completed_at: Option<DateTime<Utc>>,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub security_version: Option<DateTime<Utc>>,
    pub default_team_id: Option<Uuid>,
    pub default_team_slug: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Deleted, but still inside the restore window
    pub fn is_restorable(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at
            .is_some_and(|at| now - at <= Duration::days(RESTORE_GRACE_DAYS))
    }

    pub fn is_email_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }

    /// Password login is only possible for accounts with a local hash
    pub fn verify_password(&self, candidate: &str) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|hash| crypto::verify_password(candidate, hash))
    }

    /// Credential versions strictly older than this are rejected
    pub fn security_version_millis(&self) -> i64 {
        self.security_version
            .map(|v| v.timestamp_millis())
            .unwrap_or(i64::MIN)
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip)]
    pub external_session_id: Option<String>,
    pub signed_in_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub version: DateTime<Utc>,
    pub device: Option<String>,
    pub ip: Option<String>,
    pub location: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Not revoked, not fenced by the owner's security version, not expired
    pub fn is_active(&self, user: &User, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none()
            && self.version.timestamp_millis() >= user.security_version_millis()
            && self.expires_at.is_none_or(|at| at > now)
    }
}

// ============================================================================
// Team
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(skip)]
    pub external_org_id: Option<String>,
    #[serde(skip)]
    pub stripe_customer_id: Option<String>,
    pub created_by: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub subscription_tier_chosen_at: Option<DateTime<Utc>>,
    pub free_trial_at: Option<DateTime<Utc>>,
    pub onboarding_completed_at: Option<DateTime<Utc>>,
    pub stripe_setup_error_code: Option<String>,
    pub stripe_setup_decline_code: Option<String>,
    pub stripe_setup_error_message: Option<String>,
    #[serde(skip)]
    pub current_team_invite_id: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    pub fn has_trialed(&self) -> bool {
        self.free_trial_at.is_some()
    }
}

// ============================================================================
// TeamMember
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamMember {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    #[serde(skip)]
    pub external_membership_id: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    pub onboarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Permission check for mutating `target`: active, and rank at least the target's
    pub fn can_manage(&self, target: &TeamMember) -> bool {
        self.is_active() && self.role.can_act_on(target.role)
    }

    /// May grant `role` to someone else
    pub fn can_grant(&self, role: MemberRole) -> bool {
        self.is_active() && self.role.can_act_on(role)
    }
}

// ============================================================================
// TeamInvite
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamInvite {
    pub id: Uuid,
    pub team_id: Uuid,
    pub email: String,
    #[serde(skip)]
    pub token: String,
    pub state: InviteState,
    pub invite_type: InviteType,
    pub role: MemberRole,
    pub invited_by: Option<Uuid>,
    pub max_uses: i32,
    pub used_times: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub external_invite_id: Option<String>,
    pub team_member_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TeamInvite {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// `max_uses = 0` means unlimited
    pub fn uses_exhausted(&self) -> bool {
        self.max_uses > 0 && self.used_times >= self.max_uses
    }

    pub fn is_email_scoped(&self) -> bool {
        !self.email.trim().is_empty()
    }

    /// Stored state with time- and usage-based expiry applied
    pub fn effective_state(&self, now: DateTime<Utc>) -> InviteState {
        match self.state {
            InviteState::Pending if self.is_expired(now) || self.uses_exhausted() => {
                InviteState::Expired
            }
            state => state,
        }
    }

    fn guard(&self, now: DateTime<Utc>) -> InviteGuardContext {
        InviteGuardContext {
            is_expired: self.is_expired(now),
            uses_exhausted: self.uses_exhausted(),
        }
    }

    /// Run the acceptance transition without mutating the row
    pub fn check_accept(&self, now: DateTime<Utc>) -> Result<InviteState, StateError> {
        InviteStateMachine::transition(self.state, InviteEvent::Accept, Some(&self.guard(now)))
    }

    pub fn check_cancel(&self) -> Result<InviteState, StateError> {
        InviteStateMachine::transition(self.state, InviteEvent::Cancel, None)
    }

    /// Classify why this invite cannot be used right now
    pub fn usability(&self, now: DateTime<Utc>) -> Result<(), ErrorCode> {
        match self.effective_state(now) {
            InviteState::Pending => Ok(()),
            InviteState::Expired => Err(ErrorCode::InviteExpired),
            InviteState::Canceled => Err(ErrorCode::InvalidInviteLink),
            InviteState::Accepted if self.invite_type == InviteType::Single => {
                Err(ErrorCode::InvalidInviteLink)
            }
            InviteState::Accepted => Ok(()),
        }
    }

    /// Email-scoped invites only admit the invited address
    pub fn admits_email(&self, email: &str) -> bool {
        !self.is_email_scoped() || self.email.trim().eq_ignore_ascii_case(email.trim())
    }

    pub fn new_shared(team_id: Uuid, invited_by: Option<Uuid>) -> NewInvite {
        NewInvite {
            team_id,
            email: String::new(),
            token: crypto::shared_invite_token(),
            invite_type: InviteType::Shared,
            role: MemberRole::Member,
            invited_by,
            max_uses: 0,
            expires_at: None,
            external_invite_id: None,
            team_member_id: None,
        }
    }
}

/// Insert payload for `team_invites`
#[derive(Debug, Clone)]
pub struct NewInvite {
    pub team_id: Uuid,
    pub email: String,
    pub token: String,
    pub invite_type: InviteType,
    pub role: MemberRole,
    pub invited_by: Option<Uuid>,
    pub max_uses: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub external_invite_id: Option<String>,
    pub team_member_id: Option<Uuid>,
}

// ============================================================================
// Prompt
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Prompt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub prompt_type: PromptType,
    pub title: String,
    pub body: String,
    pub action_label: Option<String>,
    pub action_url: Option<String>,
    pub priority: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub dismissible: bool,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Prompt {
    /// Inside its display window and not dismissed
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.dismissed_at.is_none()
            && self.starts_at.is_none_or(|at| at <= now)
            && self.ends_at.is_none_or(|at| at > now)
    }

    /// Non-dismissible prompts never transition to dismissed
    pub fn check_dismiss(&self) -> Result<(), StateError> {
        if !self.dismissible {
            return Err(StateError::GuardFailed(
                "Prompt is not dismissible".to_string(),
            ));
        }
        Ok(())
    }
}

/// Insert payload for `prompts`
#[derive(Debug, Clone)]
pub struct NewPrompt {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub prompt_type: PromptType,
    pub title: String,
    pub body: String,
    pub action_label: Option<String>,
    pub action_url: Option<String>,
    pub priority: i32,
    pub dismissible: bool,
}

// ============================================================================
// ApiKey
// ============================================================================

#[derive(Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip)]
    pub key_hash: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("key_prefix", &self.key_prefix)
            .field("key_hash", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("revoked_at", &self.revoked_at)
            .finish()
    }
}

impl ApiKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|at| at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(invite_type: InviteType, max_uses: i32, used_times: i32) -> TeamInvite {
        TeamInvite {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            email: String::new(),
            token: "tok".to_string(),
            state: InviteState::Pending,
            invite_type,
            role: MemberRole::Member,
            invited_by: None,
            max_uses,
            used_times,
            expires_at: None,
            canceled_at: None,
            accepted_at: None,
            external_invite_id: None,
            team_member_id: None,
            created_at: Utc::now(),
        }
    }

    fn member(role: MemberRole, status: MemberStatus) -> TeamMember {
        TeamMember {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            email: "m@example.com".to_string(),
            role,
            status,
            external_membership_id: None,
            joined_at: None,
            left_at: None,
            removed_at: None,
            onboarded_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user(security_version: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            external_id: None,
            email: "u@example.com".to_string(),
            name: None,
            password_hash: None,
            terms_accepted_at: None,
            team_created_or_joined_at: None,
            teammates_invited_at: None,
            onboarding_completed_at: None,
            email_confirmed_at: None,
            security_version,
            default_team_id: None,
            default_team_slug: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_role_hierarchy() {
        use MemberRole::*;
        let cases = [
            (Owner, Owner, true),
            (Owner, Admin, true),
            (Owner, Member, true),
            (Admin, Owner, false),
            (Admin, Admin, true),
            (Admin, Member, true),
            (Member, Owner, false),
            (Member, Admin, false),
            (Member, Member, true),
        ];
        for (actor, target, expected) in cases {
            assert_eq!(actor.can_act_on(target), expected, "{} on {}", actor, target);
        }
    }

    #[test]
    fn test_inactive_member_cannot_manage() {
        let actor = member(MemberRole::Owner, MemberStatus::Left);
        let target = member(MemberRole::Member, MemberStatus::Active);
        assert!(!actor.can_manage(&target));
        assert!(!actor.can_grant(MemberRole::Member));

        let actor = member(MemberRole::Admin, MemberStatus::Active);
        assert!(actor.can_manage(&target));
        assert!(!actor.can_grant(MemberRole::Owner));
    }

    #[test]
    fn test_invite_effective_state() {
        let now = Utc::now();

        let mut single = invite(InviteType::Single, 1, 0);
        assert_eq!(single.effective_state(now), InviteState::Pending);
        single.used_times = 1;
        assert_eq!(single.effective_state(now), InviteState::Expired);

        let mut shared = invite(InviteType::Shared, 0, 1000);
        assert_eq!(shared.effective_state(now), InviteState::Pending);
        shared.expires_at = Some(now);
        assert_eq!(shared.effective_state(now), InviteState::Expired);

        let mut canceled = invite(InviteType::Single, 1, 0);
        canceled.state = InviteState::Canceled;
        assert_eq!(canceled.effective_state(now), InviteState::Canceled);
    }

    #[test]
    fn test_invite_usability_codes() {
        let now = Utc::now();
        let cases = [
            (InviteState::Pending, None, Ok(())),
            (
                InviteState::Pending,
                Some(now - Duration::seconds(1)),
                Err(ErrorCode::InviteExpired),
            ),
            (InviteState::Expired, None, Err(ErrorCode::InviteExpired)),
            (InviteState::Canceled, None, Err(ErrorCode::InvalidInviteLink)),
            (InviteState::Accepted, None, Err(ErrorCode::InvalidInviteLink)),
        ];
        for (state, expires_at, expected) in cases {
            let mut i = invite(InviteType::Single, 1, 0);
            i.state = state;
            i.expires_at = expires_at;
            assert_eq!(i.usability(now), expected, "state {}", state);
        }
    }

    #[test]
    fn test_invite_accept_guard_respects_usage() {
        let now = Utc::now();
        let exhausted = invite(InviteType::Shared, 3, 3);
        assert!(matches!(
            exhausted.check_accept(now),
            Err(StateError::GuardFailed(_))
        ));
        let open = invite(InviteType::Shared, 3, 2);
        assert_eq!(open.check_accept(now), Ok(InviteState::Accepted));
    }

    #[test]
    fn test_email_scope() {
        let mut i = invite(InviteType::Single, 1, 0);
        assert!(i.admits_email("anyone@example.com"));
        i.email = "Invitee@Example.com".to_string();
        assert!(i.admits_email("invitee@example.com"));
        assert!(!i.admits_email("other@example.com"));
    }

    #[test]
    fn test_new_shared_invite_shape() {
        let team_id = Uuid::new_v4();
        let shared = TeamInvite::new_shared(team_id, None);
        assert_eq!(shared.invite_type, InviteType::Shared);
        assert_eq!(shared.role, MemberRole::Member);
        assert_eq!(shared.max_uses, 0);
        assert_eq!(shared.token.len(), 32);
        assert!(shared.token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_activity() {
        let now = Utc::now();
        let u = user(Some(now));
        let mut session = Session {
            id: Uuid::new_v4(),
            user_id: u.id,
            external_session_id: None,
            signed_in_at: now,
            last_seen_at: now,
            version: now,
            device: None,
            ip: None,
            location: None,
            expires_at: None,
            revoked_at: None,
            created_at: now,
        };
        assert!(session.is_active(&u, now));

        session.version = now - Duration::milliseconds(1);
        assert!(!session.is_active(&u, now));

        session.version = now;
        session.revoked_at = Some(now);
        assert!(!session.is_active(&u, now));
    }

    #[test]
    fn test_restore_window() {
        let now = Utc::now();
        let mut u = user(None);
        assert!(!u.is_restorable(now));
        u.deleted_at = Some(now - Duration::days(59));
        assert!(u.is_restorable(now));
        u.deleted_at = Some(now - Duration::days(61));
        assert!(!u.is_restorable(now));
    }

    #[test]
    fn test_non_dismissible_prompt() {
        let prompt = Prompt {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            team_id: None,
            prompt_type: PromptType::Upsell,
            title: "Add Payment Method".to_string(),
            body: String::new(),
            action_label: None,
            action_url: None,
            priority: 0,
            starts_at: None,
            ends_at: None,
            dismissible: false,
            dismissed_at: None,
            created_at: Utc::now(),
        };
        assert!(prompt.check_dismiss().is_err());
        assert!(prompt.is_visible(Utc::now()));
    }
}
