//! Relays the exported session code back to the paired account.

use thiserror::Error;

use crate::client::{ClientError, Connection};
use crate::exporter::ExportedCredentials;
use crate::phone::PhoneNumber;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to deliver session code to {to}: {source}")]
    Delivery { to: String, source: ClientError },
}

pub struct Notifier {
    template: String,
}

impl Notifier {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Fill the template's `{phone}`, `{code}` and `{link}` placeholders.
    pub fn compose(&self, phone: &PhoneNumber, exported: &ExportedCredentials) -> String {
        self.template
            .replace("{phone}", phone.as_str())
            .replace("{code}", &exported.session_code)
            .replace("{link}", &exported.link)
    }

    /// Send the message to the account's own address.
    ///
    /// Returns the normalized recipient on success.
    pub async fn notify(
        &self,
        connection: &dyn Connection,
        user_id: &str,
        phone: &PhoneNumber,
        exported: &ExportedCredentials,
    ) -> Result<String, NotifyError> {
        let to = normalize_user_id(user_id);
        let text = self.compose(phone, exported);

        connection
            .send_text(&to, &text)
            .await
            .map_err(|source| NotifyError::Delivery {
                to: to.clone(),
                source,
            })?;

        Ok(to)
    }
}

/// Drop the device suffix from an account address: `123:4@host` becomes `123@host`.
pub fn normalize_user_id(user_id: &str) -> String {
    match user_id.split_once('@') {
        Some((user, server)) => {
            let user = user.split_once(':').map_or(user, |(user, _)| user);
            format!("{}@{}", user, server)
        }
        None => user_id
            .split_once(':')
            .map_or(user_id, |(user, _)| user)
            .to_string(),
    }
}
