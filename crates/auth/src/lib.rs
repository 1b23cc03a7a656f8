//! Authentication gate for the Tenantry API
//!
//! Resolves API keys, internally issued HS256 tokens and provider-issued RS256
//! tokens to a `(user, session, method)` triple, enforces the per-user
//! security-version fence, manages session cookies and re-scopes provider
//! sessions across teams. Extractors work with any domain state implementing
//! `FromRef<S>` for `AuthBackend`.

mod backend;
mod claims;
mod config;
mod context;
pub mod cookies;
mod error;
mod extractors;
mod jwks;
pub mod jwt;
mod scope;
mod types;

pub use backend::{AuthBackend, API_KEY_HEADER, API_KEY_LOOKUP_LEN, API_KEY_PREFIX};
pub use claims::{InternalClaims, TokenType};
pub use config::AuthConfig;
pub use context::AuthContext;
pub use cookies::TokenPair;
pub use error::AuthError;
pub use extractors::{AuthUser, MaybeAuthUser, SessionUser};
pub use jwks::JwksCache;
pub use scope::team_scope;
pub use types::{AuthIdentity, AuthMethod, AuthSession};
