//! Domain models for queued outbound mail

mod message;

pub use message::{
    AttachmentRef, DeliveryReport, DeliveryStatus, MessageDraft, MessageId, QueuedMessage,
    QueuedMessageBuilder, ValidDraft,
};
