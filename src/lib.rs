//! Scam replier — answers unread mail with generated replies on a fixed interval.

pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod mailbox;
pub mod orchestrator;
pub mod reply;
