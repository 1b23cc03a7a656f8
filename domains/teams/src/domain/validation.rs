//! Validation helpers for team names, slugs, emails and passwords

use regex::Regex;
use tenantry_common::ErrorCode;
use unicode_normalization::UnicodeNormalization;

lazy_static::lazy_static! {
    /// Team name: alphanumeric at both ends, hyphen, space and underscore inside
    static ref TEAM_NAME_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9 _]*[a-zA-Z0-9]$").unwrap();

    /// Two special characters in a row
    static ref CONSECUTIVE_SPECIAL_REGEX: Regex = Regex::new(r"[-_ ]{2}").unwrap();

    /// Team slug: lowercase alphanumeric with single inner hyphens
    static ref TEAM_SLUG_REGEX: Regex =
        Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap();

    static ref NON_ALPHANUMERIC_RUN: Regex = Regex::new(r"[^a-z0-9]+").unwrap();

    pub static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").unwrap();
}

pub const TEAM_NAME_MIN_LEN: usize = 3;
pub const TEAM_NAME_MAX_LEN: usize = 32;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 72;

/// Slugs that collide with application routes
pub const RESERVED_SLUGS: &[&str] = &[
    "support",
    "help",
    "admin",
    "api",
    "dashboard",
    "settings",
    "billing",
    "login",
    "signup",
    "auth",
    "logout",
    "join",
    "invite",
    "invites",
    "onboarding",
    "account",
    "teams",
    "team",
    "users",
    "new",
    "www",
    "app",
    "static",
    "webhooks",
    "health",
];

/// Validate a team name, returning it trimmed
pub fn validate_team_name(name: &str) -> Result<String, ErrorCode> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if !(TEAM_NAME_MIN_LEN..=TEAM_NAME_MAX_LEN).contains(&len) {
        return Err(ErrorCode::TeamNameLength);
    }
    if !TEAM_NAME_REGEX.is_match(trimmed) {
        return Err(ErrorCode::TeamNameInvalid);
    }
    if CONSECUTIVE_SPECIAL_REGEX.is_match(trimmed) {
        return Err(ErrorCode::TeamNameConsecutive);
    }
    Ok(trimmed.to_string())
}

pub fn is_reserved_slug(slug: &str) -> bool {
    RESERVED_SLUGS.contains(&slug)
}

/// Well-formed and not reserved
pub fn is_valid_slug(slug: &str) -> bool {
    TEAM_SLUG_REGEX.is_match(slug) && !slug.contains("--") && !is_reserved_slug(slug)
}

/// Base slug for a team name, before uniqueness suffixes
pub fn generate_slug(name: &str) -> String {
    let folded: String = name
        .nfkd()
        .filter(char::is_ascii)
        .collect::<String>()
        .to_lowercase();
    NON_ALPHANUMERIC_RUN
        .replace_all(&folded, "-")
        .trim_matches('-')
        .to_string()
}

/// `base`, then `base-1`, `base-2`, ... for `attempt` = 0, 1, 2, ...
pub fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email.trim())
}

/// Lowercased, trimmed form used for comparisons
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Length bounds plus lowercase, uppercase, digit and symbol
pub fn validate_password(password: &str) -> Result<(), ErrorCode> {
    let len = password.chars().count();
    let strong = (PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len)
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| !c.is_alphanumeric());
    if strong {
        Ok(())
    } else {
        Err(ErrorCode::WeakPassword)
    }
}
