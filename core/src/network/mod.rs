//! Link and messaging connectivity

pub mod command;
pub mod error;
pub mod link;
pub mod messaging;
pub mod topics;

pub use command::{Command, CommandHandler};
pub use error::{DecodeError, TopicError};
pub use link::LinkOrchestrator;
pub use messaging::{
    InboundMessage, Inbox, MessagingLink, MessagingOrchestrator, SessionEvents, StatusPayload,
};
pub use topics::{format_topic, Topic, Topics};
