//! Outcome notifications.
//!
//! The engine produces [`Notification`] events; a [`Notifier`] delivers the
//! rendered text. Delivery is fire-and-forget from the engine's point of view:
//! failures are logged and reported back as [`DeliveryStatus::Failed`], never
//! propagated as errors.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tool_store::User;
use tracing::{debug, info, warn};

/// Where a message goes: a numeric chat id or an `@handle`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    Chat(i64),
    Handle(String),
}

impl Recipient {
    /// Chat id when known, otherwise the user's handle
    pub fn for_user(user: &User) -> Option<Self> {
        if let Some(chat_id) = user.chat_id {
            return Some(Recipient::Chat(chat_id));
        }
        let handle = user.handle.trim();
        (!handle.is_empty()).then(|| Recipient::Handle(handle.to_string()))
    }
}

impl Display for Recipient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::Chat(id) => write!(f, "{id}"),
            Recipient::Handle(handle) => f.write_str(handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delivery rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Result of one delivery attempt as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
    NoRecipient,
}

impl DeliveryStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered)
    }
}

/// Outcome events produced by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    TransferRequested {
        request_id: i64,
        requester: String,
        tool_name: String,
        inventory_number: String,
        destination: String,
    },
    TransferApproved {
        tool_name: String,
        inventory_number: String,
        destination: String,
    },
    TransferRejected {
        tool_name: String,
        inventory_number: String,
    },
    RegistrationSubmitted {
        handle: String,
        name: String,
    },
    RegistrationApproved {
        site: String,
    },
    RegistrationRejected,
}

impl Notification {
    pub fn render(&self) -> String {
        match self {
            Notification::TransferRequested {
                request_id,
                requester,
                tool_name,
                inventory_number,
                destination,
            } => format!(
                "New transfer request #{request_id} from {requester}: {tool_name} (inv. #{inventory_number}) to site '{destination}'."
            ),
            Notification::TransferApproved {
                tool_name,
                inventory_number,
                destination,
            } => format!(
                "Your request for {tool_name} (inv. #{inventory_number}) was approved. The tool now belongs to site '{destination}'."
            ),
            Notification::TransferRejected {
                tool_name,
                inventory_number,
            } => format!(
                "Your request for {tool_name} (inv. #{inventory_number}) was rejected."
            ),
            Notification::RegistrationSubmitted { handle, name } => {
                format!("New registration request from {name} ({handle}).")
            }
            Notification::RegistrationApproved { site } => {
                format!("Your registration was approved. You are assigned to site '{site}'.")
            }
            Notification::RegistrationRejected => {
                "Your registration was rejected. Contact your foreman.".to_string()
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, recipient: &Recipient, message: &str) -> Result<(), DeliveryError>;
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, recipient: &Recipient, message: &str) -> Result<(), DeliveryError> {
        info!(recipient = %recipient, message = %message, "Notification");
        Ok(())
    }
}

/// Keeps every delivered message in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Recipient, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Recipient, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, recipient: &Recipient) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(r, _)| r == recipient)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, recipient: &Recipient, message: &str) -> Result<(), DeliveryError> {
        self.sent.lock().push((recipient.clone(), message.to_string()));
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a Recipient,
    text: &'a str,
}

/// Delivers through the Telegram Bot API `sendMessage` method
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, api_base: &str) -> Result<Self, DeliveryError> {
        let base = url::Url::parse(api_base)
            .map_err(|e| DeliveryError::Transport(format!("invalid api_base: {e}")))?;
        let endpoint = format!(
            "{}/bot{}/sendMessage",
            base.as_str().trim_end_matches('/'),
            bot_token
        );
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DeliveryError::Transport(format!("build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, recipient: &Recipient, message: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: recipient,
                text: message,
            })
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("<failed to read error body: {e}>"),
            };
            return Err(DeliveryError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Resolves recipients, renders events and delivers them
#[derive(Clone)]
pub struct NotificationGateway {
    notifier: Arc<dyn Notifier>,
}

impl NotificationGateway {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub async fn notify_user(&self, user: &User, event: &Notification) -> DeliveryStatus {
        let Some(recipient) = Recipient::for_user(user) else {
            debug!(user_id = %user.id, "No recipient for user, skipping notification");
            return DeliveryStatus::NoRecipient;
        };
        self.notify(&recipient, event).await
    }

    pub async fn notify(&self, recipient: &Recipient, event: &Notification) -> DeliveryStatus {
        match self.notifier.deliver(recipient, &event.render()).await {
            Ok(()) => DeliveryStatus::Delivered,
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "Notification delivery failed");
                DeliveryStatus::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tool_store::{Role, UserId};

    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Notifier for Unreachable {
        async fn deliver(&self, _: &Recipient, _: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Transport("connection refused".to_string()))
        }
    }

    fn user(chat_id: Option<i64>, handle: &str) -> User {
        User {
            id: UserId(1),
            handle: handle.to_string(),
            chat_id,
            name: None,
            role: Role::Worker,
            site_id: None,
        }
    }

    #[test]
    fn recipient_prefers_chat_id() {
        assert_eq!(
            Recipient::for_user(&user(Some(42), "@ivan")),
            Some(Recipient::Chat(42))
        );
        assert_eq!(
            Recipient::for_user(&user(None, "@ivan")),
            Some(Recipient::Handle("@ivan".to_string()))
        );
        assert_eq!(Recipient::for_user(&user(None, "  ")), None);
    }

    #[test]
    fn recipient_serializes_as_bare_value() {
        assert_eq!(serde_json::to_string(&Recipient::Chat(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&Recipient::Handle("@a".into())).unwrap(),
            r#""@a""#
        );
    }

    #[test]
    fn rendered_messages_name_the_tool() {
        let text = Notification::TransferApproved {
            tool_name: "Drill".into(),
            inventory_number: "INV-1".into(),
            destination: "River block".into(),
        }
        .render();
        assert!(text.contains("Drill"));
        assert!(text.contains("INV-1"));
        assert!(text.contains("River block"));
    }

    #[tokio::test]
    async fn gateway_reports_failure_without_error() {
        let gateway = NotificationGateway::new(Arc::new(Unreachable));
        let status = gateway
            .notify_user(&user(Some(1), "@ivan"), &Notification::RegistrationRejected)
            .await;
        assert!(matches!(status, DeliveryStatus::Failed(reason) if reason.contains("refused")));
    }

    #[tokio::test]
    async fn gateway_skips_users_without_recipient() {
        let recorder = Arc::new(RecordingNotifier::new());
        let gateway = NotificationGateway::new(recorder.clone());
        let status = gateway
            .notify_user(&user(None, ""), &Notification::RegistrationRejected)
            .await;
        assert_eq!(status, DeliveryStatus::NoRecipient);
        assert!(recorder.sent().is_empty());
    }

    #[test]
    fn telegram_endpoint_is_built_from_base() {
        let notifier = TelegramNotifier::new("123:abc", "https://api.telegram.org/").unwrap();
        assert_eq!(
            notifier.endpoint,
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert!(TelegramNotifier::new("t", "not a url").is_err());
    }
}
