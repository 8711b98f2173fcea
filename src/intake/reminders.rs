//! Reminder scheduler.
//!
//! Each scan looks at active obligations inside the lookahead window and
//! sends one notification per `(obligation, threshold)` when the threshold
//! equals the days left. The sent record is written only after the channel
//! accepts, so a failed send is retried on the next scan.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;

use crate::config::ReminderConfig;
use crate::db::{Database, ObligationRecord};
use crate::error::{IntakeError, with_timeout};
use crate::legal::audit::{self, AuditEventKind};
use crate::providers::NotificationChannel;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub scanned: usize,
    pub dispatched: usize,
    pub failed: usize,
}

/// Thresholds (days before due) that apply to `obligation`: its own list
/// when set, else the long- or short-lead defaults by how far ahead it was
/// scheduled.
pub fn thresholds_for(obligation: &ObligationRecord, config: &ReminderConfig) -> Vec<i32> {
    if !obligation.reminder_days.is_empty() {
        return obligation.reminder_days.clone();
    }
    let lead = (obligation.due_date - obligation.created_at.date_naive()).num_days();
    if lead >= config.long_lead_days {
        config.long_lead_thresholds.clone()
    } else {
        config.short_lead_thresholds.clone()
    }
}

fn render(obligation: &ObligationRecord, days_left: i64) -> (String, String) {
    let when = match days_left {
        1 => "tomorrow".to_string(),
        n => format!("in {n} days"),
    };
    let subject = format!("[{}] {} due {}", obligation.matter_id, obligation.title, when);
    let mut body = format!(
        "{} for matter {} is due {} ({}",
        obligation.title, obligation.matter_id, obligation.due_date, when
    );
    if let Some(time) = obligation.due_time {
        body.push_str(&format!(", {}", time.format("%H:%M")));
    }
    body.push_str(").");
    if let Some(location) = &obligation.location {
        body.push_str(&format!("\nLocation: {location}"));
    }
    if let Some(citation) = &obligation.rule_citation {
        body.push_str(&format!("\nRule: {citation}"));
    }
    if let Some(description) = &obligation.description {
        body.push_str(&format!("\n{description}"));
    }
    (subject, body)
}

pub struct ReminderScheduler {
    db: Arc<dyn Database>,
    channel: Arc<dyn NotificationChannel>,
    config: ReminderConfig,
    call_timeout: Duration,
}

impl ReminderScheduler {
    pub fn new(
        db: Arc<dyn Database>,
        channel: Arc<dyn NotificationChannel>,
        config: ReminderConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            db,
            channel,
            config,
            call_timeout,
        }
    }

    /// One scan as of `today`.
    pub async fn run_once(&self, today: NaiveDate) -> Result<ReminderReport, IntakeError> {
        let mut report = ReminderReport::default();
        if self.config.recipients.is_empty() {
            tracing::warn!("No reminder recipients configured; skipping scan");
            return Ok(report);
        }
        let horizon = today
            .checked_add_days(Days::new(self.config.lookahead_days.max(0) as u64))
            .unwrap_or(NaiveDate::MAX);
        let due = self
            .db
            .list_active_obligations_due_between(today, horizon)
            .await?;

        for obligation in &due {
            report.scanned += 1;
            let days_left = (obligation.due_date - today).num_days();
            let Ok(days_left_i32) = i32::try_from(days_left) else {
                continue;
            };
            if !thresholds_for(obligation, &self.config).contains(&days_left_i32) {
                continue;
            }
            if self.db.reminder_sent(obligation.id, days_left_i32).await? {
                continue;
            }

            let (subject, body) = render(obligation, days_left);
            if self.dispatch(&subject, &body).await {
                self.db
                    .record_reminder_sent(obligation.id, days_left_i32)
                    .await?;
                report.dispatched += 1;
                tracing::info!(
                    obligation = %obligation.id,
                    matter = %obligation.matter_id,
                    threshold = days_left_i32,
                    "Reminder dispatched"
                );
                audit::record(
                    AuditEventKind::ReminderDispatched,
                    json!({
                        "obligation_id": obligation.id.to_string(),
                        "matter_id": obligation.matter_id,
                        "threshold": days_left_i32,
                        "due_date": obligation.due_date.to_string(),
                    }),
                );
            } else {
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// True when at least one recipient's channel accepted.
    async fn dispatch(&self, subject: &str, body: &str) -> bool {
        let mut accepted = false;
        for recipient in &self.config.recipients {
            match with_timeout(
                "notify",
                self.call_timeout,
                self.channel.send(recipient, subject, body),
            )
            .await
            {
                Ok(true) => accepted = true,
                Ok(false) => tracing::warn!(recipient = %recipient, "Reminder rejected"),
                Err(e) => tracing::warn!(recipient = %recipient, error = %e, "Reminder send failed"),
            }
        }
        accepted
    }

    /// Scan on the configured interval until the task is dropped.
    pub async fn watch(&self) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_once(Utc::now().date_naive()).await {
                Ok(report) => tracing::info!(
                    scanned = report.scanned,
                    dispatched = report.dispatched,
                    failed = report.failed,
                    "Reminder scan finished"
                ),
                Err(e) => tracing::error!(error = %e, "Reminder scan failed"),
            }
        }
    }
}
