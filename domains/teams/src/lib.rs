//! Teams domain: users, sessions, teams, members, invites, prompts, API keys

pub mod api;
pub mod domain;
pub mod repository;

// Re-export domain types at the crate root for convenience
pub use domain::entities::*;
pub use domain::state::{InviteEvent, InviteGuardContext, InviteStateMachine};
// Re-export repository types
pub use repository::{
    ApiKeyRepository, InviteRepository, MemberRepository, MemberWithUser, NewSession,
    PromptRepository, SessionRepository, TeamRepository, TeamWithRole, TeamsRepositories,
    UserRepository,
};

// Re-export API types
pub use api::routes;
pub use api::{TeamsConfig, TeamsState};
