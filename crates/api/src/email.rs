//! Email notifications for account-security events
//!
//! Sends transactional emails via the Resend API. Delivery is best-effort
//! and out of band: reset tokens travel only through this sink, never in an
//! API response body.

/// Mail configuration
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Resend API key; empty disables sending
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Base URL links point at
    pub public_url: String,
}

impl MailConfig {
    pub fn from_env(public_url: String) -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Taskforge <noreply@localhost>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Taskforge".to_string()),
            public_url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Transactional mail service
#[derive(Clone)]
pub struct MailService {
    config: MailConfig,
    client: reqwest::Client,
}

impl MailService {
    pub fn new(config: MailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env(public_url: String) -> Self {
        Self::new(MailConfig::from_env(public_url))
    }

    /// Send an email via the Resend API
    async fn send_email(&self, to: &str, subject: &str, html: &str) {
        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "email sent");
            }
            Ok(resp) => {
                let status = resp.status();
                tracing::error!(status = %status, "failed to send email");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to send email");
            }
        }
    }

    /// Send a password-reset link carrying the plaintext reset token
    ///
    /// When mail is unconfigured the reset URL is logged instead, which
    /// keeps local development workable without an API key.
    pub async fn send_password_reset(&self, to: &str, reset_token: &str) {
        let reset_url = format!("{}/reset-password/{}", self.config.public_url, reset_token);

        if !self.config.is_enabled() {
            tracing::info!(to = %to, url = %reset_url, "mail disabled; password reset URL");
            return;
        }

        let html = format!(
            r#"<p>A password reset was requested for your {app} account.</p>
<p><a href="{url}">Reset your password</a></p>
<p>The link expires in one hour. If you didn't request this, you can ignore this email.</p>"#,
            app = self.config.app_name,
            url = reset_url,
        );

        self.send_email(to, &format!("Reset your {} password", self.config.app_name), &html)
            .await;
    }

    /// Notify the account owner that their password changed
    pub async fn send_password_changed(&self, to: &str) {
        if !self.config.is_enabled() {
            tracing::debug!(to = %to, "mail disabled; skipping password-changed notice");
            return;
        }

        let html = format!(
            r#"<p>The password for your {app} account was just changed.</p>
<p>If this wasn't you, reset your password immediately and contact support.</p>"#,
            app = self.config.app_name,
        );

        self.send_email(to, &format!("Your {} password was changed", self.config.app_name), &html)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mail_disabled_without_api_key() {
        let config = MailConfig {
            resend_api_key: String::new(),
            email_from: "Taskforge <noreply@localhost>".to_string(),
            app_name: "Taskforge".to_string(),
            public_url: "http://localhost:3000".to_string(),
        };
        assert!(!config.is_enabled());

        let config = MailConfig {
            resend_api_key: "re_test_key".to_string(),
            ..config
        };
        assert!(config.is_enabled());
    }
}
