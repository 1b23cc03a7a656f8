//! Shared email content templates
//!
//! Plain-text and HTML bodies for transactional emails, used by both the SES
//! and mock services through the provided methods on `EmailService`.

/// Days a single-use team invite stays valid
pub const INVITE_VALID_DAYS: i64 = 14;

/// Minutes a password reset link stays valid
pub const RESET_VALID_MINUTES: i64 = 15;

fn layout(app_name: &str, heading: &str, intro: &str, action: &str, url: &str, footer: &str) -> String {
    format!(
        r#"
            <html>
            <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
                <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
                    <h2 style="color: #1f4fd6;">{heading}</h2>

                    <p>{intro}</p>

                    <div style="text-align: center; margin: 30px 0;">
                        <a href="{url}"
                           style="background-color: #1f4fd6; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block; font-weight: bold;">
                            {action}
                        </a>
                    </div>

                    <p>Or copy and paste this link in your browser:</p>
                    <p style="background-color: #f5f5f5; padding: 10px; border-radius: 4px; word-break: break-all;">
                        <a href="{url}">{url}</a>
                    </p>

                    <hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">

                    <p style="color: #666; font-size: 12px;">
                        {footer}<br>
                        Thanks, The {app_name} Team
                    </p>
                </div>
            </body>
            </html>
            "#,
        heading = heading,
        intro = intro,
        action = action,
        url = url,
        footer = footer,
        app_name = app_name,
    )
}

/// Plain-text body for a team invite
pub fn team_invite_text(
    app_name: &str,
    inviter_name: &str,
    team_name: &str,
    role: &str,
    invite_url: &str,
) -> String {
    format!(
        "Hi there!\n\n\
        {inviter_name} has invited you to join the team '{team_name}' on {app_name} as a {role}.\n\n\
        Click the link below to accept the invite:\n\
        {invite_url}\n\n\
        This invite will expire in {INVITE_VALID_DAYS} days.\n\n\
        If you don't have a {app_name} account, you'll be prompted to create one.\n\n\
        Thanks,\n\
        The {app_name} Team"
    )
}

/// HTML body for a team invite
pub fn team_invite_html(
    app_name: &str,
    inviter_name: &str,
    team_name: &str,
    role: &str,
    invite_url: &str,
) -> String {
    layout(
        app_name,
        &format!("You're invited to join {}!", team_name),
        &format!(
            "<strong>{}</strong> has invited you to join the team '<strong>{}</strong>' as a <strong>{}</strong>. This invite will expire in {} days.",
            inviter_name, team_name, role, INVITE_VALID_DAYS
        ),
        "Accept Invite",
        invite_url,
        &format!(
            "If you don't have a {} account, you'll be prompted to create one.",
            app_name
        ),
    )
}

/// Plain-text body for the signup confirmation email
pub fn confirmation_text(app_name: &str, confirm_url: &str) -> String {
    format!(
        "Welcome to {app_name}!\n\n\
        Please confirm your email address by opening the link below:\n\
        {confirm_url}\n\n\
        If you didn't create an account, you can ignore this email.\n\n\
        Thanks,\n\
        The {app_name} Team"
    )
}

/// HTML body for the signup confirmation email
pub fn confirmation_html(app_name: &str, confirm_url: &str) -> String {
    layout(
        app_name,
        &format!("Welcome to {}!", app_name),
        "Please confirm your email address to finish setting up your account.",
        "Confirm Email",
        confirm_url,
        "If you didn't create an account, you can ignore this email.",
    )
}

/// Plain-text body for a password reset email
pub fn password_reset_text(app_name: &str, reset_url: &str) -> String {
    format!(
        "Hi there!\n\n\
        We received a request to reset your {app_name} password.\n\
        Open the link below to choose a new one:\n\
        {reset_url}\n\n\
        This link will expire in {RESET_VALID_MINUTES} minutes.\n\n\
        If you didn't request a reset, you can ignore this email.\n\n\
        Thanks,\n\
        The {app_name} Team"
    )
}

/// HTML body for a password reset email
pub fn password_reset_html(app_name: &str, reset_url: &str) -> String {
    layout(
        app_name,
        "Reset your password",
        &format!(
            "We received a request to reset your {} password. This link will expire in {} minutes.",
            app_name, RESET_VALID_MINUTES
        ),
        "Reset Password",
        reset_url,
        "If you didn't request a reset, you can ignore this email.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_invite_contains_all_fields() {
        let url = "https://app.example.com/join?token=abc";
        for body in [
            team_invite_text("Tenantry", "Alice", "My Team", "admin", url),
            team_invite_html("Tenantry", "Alice", "My Team", "admin", url),
        ] {
            assert!(body.contains("Alice"));
            assert!(body.contains("My Team"));
            assert!(body.contains("admin"));
            assert!(body.contains(url));
            assert!(body.contains("14 days"));
        }
    }

    #[test]
    fn test_confirmation_contains_link() {
        let url = "https://app.example.com/auth/confirm?token=xyz";
        assert!(confirmation_text("Tenantry", url).contains(url));
        assert!(confirmation_html("Tenantry", url).contains(url));
    }

    #[test]
    fn test_password_reset_mentions_expiry() {
        let url = "https://app.example.com/auth/reset-password?token=xyz";
        let text = password_reset_text("Tenantry", url);
        assert!(text.contains(url));
        assert!(text.contains("15 minutes"));
        assert!(password_reset_html("Tenantry", url).contains("Reset Password"));
    }
}
