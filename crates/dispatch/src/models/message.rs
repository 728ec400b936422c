//! Message record model — the unit of work for the dispatcher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DraftError;

/// Default rate cap applied when a submission declares none.
pub const DEFAULT_THROTTLE_LIMIT: u32 = 10;

/// Unique identifier for a queued message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Delivery status of a queued message
///
/// `Sent` and `Failed` are terminal: once a record leaves `Scheduled` it is
/// never revisited by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Scheduled,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Scheduled)
    }

    /// Stable string form used by the SQLite store
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Scheduled => "scheduled",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(DeliveryStatus::Scheduled),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// Reference to an attachment blob held by an `AttachmentStore`
///
/// Each message owns its own reference; cleanup after a send attempt is
/// strictly per message, never shared across a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Store-relative path of the blob
    pub path: String,
    /// Original filename, used for the Content-Disposition header and for
    /// guessing the attachment content type
    pub filename: String,
}

impl AttachmentRef {
    pub fn new(path: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filename: filename.into(),
        }
    }
}

/// A queued outbound message
///
/// `send_time` is set at enqueue time and never mutated. `status` transitions
/// only `Scheduled -> Sent` or `Scheduled -> Failed`, exactly once. A record
/// is *due* iff `status == Scheduled && send_time <= now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// When the message becomes due
    pub send_time: DateTime<Utc>,
    /// Rate cap declared by the submission; batch-group key
    pub throttle_limit: u32,
    /// Owning identity (the account the message is sent as)
    pub owner: String,
    /// Optional company/source label, kept for the analytics read path
    pub company: Option<String>,
    /// Optional attachment, deleted after the send attempt that consumes it
    pub attachment: Option<AttachmentRef>,
    pub status: DeliveryStatus,
}

impl QueuedMessage {
    pub fn builder(id: MessageId) -> QueuedMessageBuilder {
        QueuedMessageBuilder::new(id)
    }
}

/// Builder for creating QueuedMessage instances
pub struct QueuedMessageBuilder {
    id: MessageId,
    from: String,
    to: String,
    subject: String,
    body: String,
    send_time: Option<DateTime<Utc>>,
    throttle_limit: u32,
    owner: String,
    company: Option<String>,
    attachment: Option<AttachmentRef>,
    status: DeliveryStatus,
}

impl QueuedMessageBuilder {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            body: String::new(),
            send_time: None,
            throttle_limit: DEFAULT_THROTTLE_LIMIT,
            owner: String::new(),
            company: None,
            attachment: None,
            status: DeliveryStatus::Scheduled,
        }
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn send_time(mut self, send_time: DateTime<Utc>) -> Self {
        self.send_time = Some(send_time);
        self
    }

    pub fn throttle_limit(mut self, throttle_limit: u32) -> Self {
        self.throttle_limit = throttle_limit;
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn build(self) -> QueuedMessage {
        QueuedMessage {
            id: self.id,
            from: self.from,
            to: self.to,
            subject: self.subject,
            body: self.body,
            send_time: self.send_time.unwrap_or_else(Utc::now),
            throttle_limit: self.throttle_limit,
            owner: self.owner,
            company: self.company,
            attachment: self.attachment,
            status: self.status,
        }
    }
}

/// Externally generated message content, before admission to the queue
///
/// Content produced outside the process (for instance by a generative step)
/// arrives loosely typed. It is validated against an explicit required/
/// optional field contract before a record is persisted, so the queue never
/// holds a partially populated `Scheduled` record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDraft {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// The generative step labels this field `CompanyName`
    #[serde(rename = "CompanyName")]
    pub company: Option<String>,
}

/// A draft that passed validation: all required fields present and non-blank
#[derive(Debug, Clone)]
pub struct ValidDraft {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub company: Option<String>,
}

impl MessageDraft {
    /// Validate the required-field contract: `to`, `subject` and `body` must
    /// be present and non-blank. `company` stays optional.
    pub fn validate(self) -> Result<ValidDraft, DraftError> {
        let to = require(self.to, "to")?;
        let subject = require(self.subject, "subject")?;
        let body = require(self.body, "body")?;
        Ok(ValidDraft {
            to,
            subject,
            body,
            company: self.company,
        })
    }
}

fn require(value: Option<String>, field: &'static str) -> Result<String, DraftError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DraftError { field }),
    }
}

impl ValidDraft {
    /// Turn a validated draft into a scheduled record
    pub fn into_message(
        self,
        id: MessageId,
        from: impl Into<String>,
        owner: impl Into<String>,
        send_time: DateTime<Utc>,
        throttle_limit: u32,
    ) -> QueuedMessage {
        let mut builder = QueuedMessage::builder(id)
            .from(from)
            .to(self.to)
            .subject(self.subject)
            .body(self.body)
            .send_time(send_time)
            .throttle_limit(throttle_limit)
            .owner(owner);
        if let Some(company) = self.company {
            builder = builder.company(company);
        }
        builder.build()
    }
}

/// Analytics projection of a record: the externally visible outcome signal
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub company: Option<String>,
    pub to: String,
    pub status: DeliveryStatus,
    pub send_time: DateTime<Utc>,
}
