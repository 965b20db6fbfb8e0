//! In-process HTML templates for the three transactional mails.
//!
//! Presentation only; nothing here is safety-critical. Each template takes
//! the action link and a display name derived from the address.

/// "alice.smith@example.com" greets as "alice.smith".
#[must_use]
pub fn display_name(email: &str) -> String {
    email.split('@').next().unwrap_or("there").to_string()
}

#[must_use]
pub fn verification(link: &str, display_name: &str) -> (String, String) {
    let subject = "Verify your email address".to_string();
    let html = format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: sans-serif; color: #222;">
    <h2>Hi {display_name},</h2>
    <p>Confirm this address to activate your account.</p>
    <p><a href="{link}" style="background:#2d6cdf;color:#fff;padding:10px 18px;border-radius:4px;text-decoration:none;">Verify email</a></p>
    <p>The link is valid for 24 hours. If you did not create an account, you can ignore this message.</p>
  </body>
</html>"#
    );
    (subject, html)
}

#[must_use]
pub fn password_reset(link: &str, display_name: &str) -> (String, String) {
    let subject = "Reset your password".to_string();
    let html = format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: sans-serif; color: #222;">
    <h2>Hi {display_name},</h2>
    <p>We received a request to reset your password.</p>
    <p><a href="{link}" style="background:#2d6cdf;color:#fff;padding:10px 18px;border-radius:4px;text-decoration:none;">Choose a new password</a></p>
    <p>The link is valid for 1 hour and can be used once. Completing the reset signs you out everywhere.</p>
    <p>If you did not request this, you can ignore this message; your password is unchanged.</p>
  </body>
</html>"#
    );
    (subject, html)
}

/// The magic-link greeting differs for accounts created by this very request.
#[must_use]
pub fn magic_link(link: &str, display_name: &str, is_new_user: bool) -> (String, String) {
    let subject = if is_new_user {
        "Welcome! Your sign-in link".to_string()
    } else {
        "Your sign-in link".to_string()
    };
    let greeting = if is_new_user {
        format!("Welcome, {display_name}! Your account is ready.")
    } else {
        format!("Hi {display_name},")
    };
    let notice = if is_new_user {
        "Following the link signs you in and confirms this email address."
    } else {
        "If you did not request this link, you can ignore this message; nobody can sign in without it."
    };
    let html = format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: sans-serif; color: #222;">
    <h2>{greeting}</h2>
    <p><a href="{link}" style="background:#2d6cdf;color:#fff;padding:10px 18px;border-radius:4px;text-decoration:none;">Sign in</a></p>
    <p>The link is valid for 15 minutes and can be used once.</p>
    <p>{notice}</p>
  </body>
</html>"#
    );
    (subject, html)
}
