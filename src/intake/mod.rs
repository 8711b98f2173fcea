//! Correspondence intake: resolve each message to a matter, extract and
//! cascade obligations, file attachments, and drive the backlog through
//! bounded waves.

pub mod extractor;
pub mod filer;
pub mod matching;
pub mod message;
pub mod orchestrator;
pub mod reminders;
pub mod resolver;

use std::sync::Arc;

use crate::config::{Config, IntakeConfig, MatchingConfig};
use crate::db::Database;
use crate::legal::cascade::DeadlineCalculator;
use crate::providers::{CalendarService, ClassificationModel, MailSource, StorageProvider};

/// Everything one pipeline invocation needs. Cheap to clone.
#[derive(Clone)]
pub struct IntakeContext {
    pub db: Arc<dyn Database>,
    pub sources: Vec<Arc<dyn MailSource>>,
    pub storage: Arc<dyn StorageProvider>,
    pub calendar: Arc<dyn CalendarService>,
    pub model: Arc<dyn ClassificationModel>,
    pub calculator: DeadlineCalculator,
    pub intake: IntakeConfig,
    pub matching: MatchingConfig,
}

impl IntakeContext {
    pub fn new(
        config: &Config,
        db: Arc<dyn Database>,
        sources: Vec<Arc<dyn MailSource>>,
        storage: Arc<dyn StorageProvider>,
        calendar: Arc<dyn CalendarService>,
        model: Arc<dyn ClassificationModel>,
        calculator: DeadlineCalculator,
    ) -> Self {
        Self {
            db,
            sources,
            storage,
            calendar,
            model,
            calculator,
            intake: config.intake.clone(),
            matching: config.matching.clone(),
        }
    }

    pub(crate) fn source(&self, name: &str) -> Option<&Arc<dyn MailSource>> {
        self.sources.iter().find(|source| source.name() == name)
    }
}
