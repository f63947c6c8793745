use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// How the SMTP connection is secured.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Implicit TLS on connect (usually port 465).
    Tls,
    /// Plaintext connect upgraded via STARTTLS (usually port 587).
    Starttls,
    /// No encryption. Only sensible against a relay on localhost.
    None,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MailerSettings {
    pub user: String,
    pub pass: String,
    pub relay: String,
    pub port: u16,
    pub security: Security,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default = "default_machine_id")]
    pub machine_id: String,
}

fn default_machine_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "ups-monitor".to_string())
}

pub struct Mailer {
    from: Mailbox,
    vec_to: Vec<Mailbox>,
    machine_id: String,
    relay: SmtpTransport,
}

impl Mailer {
    /// Build the transport and validate every configured address. Bad
    /// addresses or an unknown relay host are startup errors, not something
    /// to discover on the first power failure.
    pub fn new(settings: MailerSettings) -> Result<Mailer, MailError> {
        let builder = match settings.security {
            Security::Tls => SmtpTransport::relay(&settings.relay)?,
            Security::Starttls => SmtpTransport::starttls_relay(&settings.relay)?,
            Security::None => SmtpTransport::builder_dangerous(&settings.relay),
        };

        Ok(Mailer {
            from: settings.from.parse()?,
            vec_to: settings
                .to
                .iter()
                .map(|to| to.parse())
                .collect::<Result<_, _>>()?,
            machine_id: settings.machine_id,
            relay: builder
                .port(settings.port)
                .credentials(Credentials::new(settings.user, settings.pass))
                .build(),
        })
    }

    /// Send one notification. The transport connects, authenticates, sends
    /// and tears down per call; failures come back to the caller, which logs
    /// and carries on polling.
    pub fn send(&self, subject: &str, body: &str) -> Result<(), MailError> {
        let mut builder = Message::builder().from(self.from.clone());
        for to in &self.vec_to {
            builder = builder.to(to.clone());
        }
        let email = builder
            .subject(format!("{}: {}", self.machine_id, subject))
            .body(body.to_string())?;

        self.relay.send(&email)?;
        tracing::info!(subject, "notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MailerSettings {
        MailerSettings {
            user: "monitor@example.com".to_string(),
            pass: "secret".to_string(),
            relay: "smtp.example.com".to_string(),
            port: 587,
            security: Security::Starttls,
            from: "monitor@example.com".to_string(),
            to: vec!["ops@example.com".to_string()],
            machine_id: "rack-1".to_string(),
        }
    }

    #[test]
    fn valid_settings_build_a_mailer() {
        assert!(Mailer::new(settings()).is_ok());
    }

    #[test]
    fn bad_from_address_fails_at_construction() {
        let mut settings = settings();
        settings.from = "not an address".to_string();
        assert!(matches!(Mailer::new(settings), Err(MailError::Address(_))));
    }

    #[test]
    fn bad_recipient_fails_at_construction() {
        let mut settings = settings();
        settings.to.push("also not an address".to_string());
        assert!(matches!(Mailer::new(settings), Err(MailError::Address(_))));
    }

    #[test]
    fn machine_id_defaults_to_hostname() {
        let toml = r#"
            user = "monitor@example.com"
            pass = "secret"
            relay = "smtp.example.com"
            port = 587
            security = "starttls"
            from = "monitor@example.com"
            to = ["ops@example.com"]
        "#;
        let settings: MailerSettings = toml_settings(toml);
        assert!(!settings.machine_id.is_empty());
    }

    fn toml_settings(raw: &str) -> MailerSettings {
        use figment::providers::{Format, Toml};
        figment::Figment::new()
            .merge(Toml::string(raw))
            .extract()
            .unwrap()
    }
}
