//! Correspondence intake for a law practice.
//!
//! Inbound messages are matched to matters, their attachments filed, their
//! obligations extracted, and trigger events cascaded into court deadlines
//! computed under the jurisdiction's counting rules. A backlog is drained in
//! bounded waves chained through a durable queue.

pub mod config;
pub mod db;
pub mod error;
pub mod intake;
pub mod legal;
pub mod providers;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;
