use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use clerk::config::Config;
use clerk::db::{self, Database, ProcessedStatus, UpsertMatterParams};
use clerk::intake::IntakeContext;
use clerk::intake::orchestrator::Orchestrator;
use clerk::intake::reminders::ReminderScheduler;
use clerk::legal::audit;
use clerk::legal::cascade::{CascadeRequest, DeadlineCalculator, cascade};
use clerk::legal::dates::{Direction, ServiceType, compute_due_date};
use clerk::legal::holidays::HolidayTable;
use clerk::legal::rules::RuleTable;
use clerk::legal::timeline::{build_timeline, persist_timeline};
use clerk::providers::{
    HttpModel, LocalStorage, LogNotifier, MailSource, MarkdownCalendar, NotificationChannel,
    SpoolMailSource, WebhookNotifier,
};
use clerk::settings::{DEFAULT_SETTINGS_FILE, Settings};

/// clerk - correspondence intake and court deadline docketing
#[derive(Parser, Debug)]
#[command(name = "clerk")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, env = "CLERK_CONFIG", default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the backlog, queue it and run the first wave
    StartBatch,

    /// Run the next wave of a queued batch
    ContinueBatch {
        batch_id: Uuid,
        wave: u32,
    },

    /// Start a batch and run every wave
    Run,

    /// Send due reminders
    Remind {
        /// Keep scanning on the configured interval
        #[arg(long)]
        watch: bool,
    },

    /// Compute a single due date
    DueDate {
        trigger: NaiveDate,
        days: u32,
        /// Count backward from the trigger
        #[arg(long)]
        before: bool,
        /// Service by mail
        #[arg(long)]
        mail: bool,
        /// Extra days added for mail service
        #[arg(long, default_value_t = 7)]
        mail_offset: u32,
    },

    /// Generate every deadline a trigger event sets running
    Cascade {
        matter: String,
        event: String,
        date: NaiveDate,
        #[arg(long)]
        mail: bool,
    },

    /// List what must happen before an anchor event
    Timeline {
        matter: String,
        event: String,
        date: NaiveDate,
        /// Store the entries as obligations
        #[arg(long)]
        persist: bool,
        #[arg(long)]
        mail: bool,
    },

    /// List messages waiting for manual matter assignment
    Unmatched {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Load matters from a TOML file (`[[matters]]` tables)
    SeedMatters { file: PathBuf },
}

#[derive(Debug, Deserialize)]
struct MatterSeedFile {
    #[serde(default)]
    matters: Vec<UpsertMatterParams>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clerk=info"));
    let json = std::env::var("CLERK_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn service(mail: bool) -> ServiceType {
    if mail {
        ServiceType::Mail
    } else {
        ServiceType::Electronic
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn calculator(config: &Config) -> Result<DeadlineCalculator> {
    let rules = RuleTable::load(config.rules.rule_table_path.as_deref())
        .context("failed to load rule table")?;
    let holidays = HolidayTable::from_config(&config.rules).context("invalid jurisdiction")?;
    Ok(DeadlineCalculator::new(Arc::new(rules), Arc::new(holidays)))
}

fn intake_context(config: &Config, db: Arc<dyn Database>) -> Result<IntakeContext> {
    let sources: Vec<Arc<dyn MailSource>> = config
        .mail
        .spools
        .iter()
        .map(|path| Arc::new(SpoolMailSource::new(path.clone())) as Arc<dyn MailSource>)
        .collect();
    if sources.is_empty() {
        tracing::warn!("No mail spools configured (CLERK_MAIL_SPOOLS)");
    }
    let root = PathBuf::from(&config.intake.storage_root);
    Ok(IntakeContext::new(
        config,
        db,
        sources,
        Arc::new(LocalStorage::new(root.clone())),
        Arc::new(MarkdownCalendar::new(root)),
        Arc::new(HttpModel::new(&config.model)),
        calculator(config)?,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let config = Config::resolve(&settings).context("invalid configuration")?;
    audit::init(&config.audit);

    if let Commands::DueDate {
        trigger,
        days,
        before,
        mail,
        mail_offset,
    } = &cli.command
    {
        let holidays = HolidayTable::from_config(&config.rules)?;
        let direction = if *before {
            Direction::Before
        } else {
            Direction::After
        };
        let due = compute_due_date(*trigger, *days, direction, service(*mail), *mail_offset, &holidays)?;
        return print_json(&due);
    }

    let db = db::connect_from_config(&config.database)
        .await
        .context("failed to open database")?;

    match cli.command {
        Commands::StartBatch => {
            let orchestrator = Orchestrator::new(intake_context(&config, db)?);
            print_json(&orchestrator.start_batch().await?)
        }
        Commands::ContinueBatch { batch_id, wave } => {
            let orchestrator = Orchestrator::new(intake_context(&config, db)?);
            print_json(&orchestrator.continue_batch(batch_id, wave).await?)
        }
        Commands::Run => {
            let orchestrator = Orchestrator::new(intake_context(&config, db)?);
            print_json(&orchestrator.run_to_completion().await?)
        }
        Commands::Remind { watch } => {
            let channel: Arc<dyn NotificationChannel> = match &config.notify.webhook_url {
                Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
                None => Arc::new(LogNotifier),
            };
            let scheduler = ReminderScheduler::new(
                db,
                channel,
                config.reminders.clone(),
                config.intake.call_timeout,
            );
            if watch {
                tokio::select! {
                    _ = scheduler.watch() => {}
                    _ = tokio::signal::ctrl_c() => tracing::info!("Stopping reminder watch"),
                }
                Ok(())
            } else {
                print_json(&scheduler.run_once(chrono::Utc::now().date_naive()).await?)
            }
        }
        Commands::Cascade {
            matter,
            event,
            date,
            mail,
        } => {
            let calculator = calculator(&config)?;
            let outcome = cascade(
                db.as_ref(),
                &calculator,
                &CascadeRequest {
                    matter_id: &matter,
                    event: &event,
                    trigger_date: date,
                    service: service(mail),
                    message_id: None,
                },
            )
            .await?;
            print_json(&outcome)
        }
        Commands::Timeline {
            matter,
            event,
            date,
            persist,
            mail,
        } => {
            let calculator = calculator(&config)?;
            let timeline =
                build_timeline(db.as_ref(), &calculator, &matter, &event, date, service(mail))
                    .await?;
            if persist {
                let (group_id, created) =
                    persist_timeline(db.as_ref(), &timeline, service(mail)).await?;
                tracing::info!(%group_id, created, "Timeline stored");
            }
            print_json(&timeline)
        }
        Commands::Unmatched { limit } => {
            let rows = db
                .list_processed_by_status(ProcessedStatus::Unmatched, limit)
                .await?;
            print_json(&rows)
        }
        Commands::SeedMatters { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let seed: MatterSeedFile =
                toml::from_str(&raw).with_context(|| format!("invalid {}", file.display()))?;
            for matter in &seed.matters {
                let stored = db.upsert_matter(matter).await?;
                tracing::info!(matter = %stored.matter_id, client = %stored.client_name, "Matter seeded");
            }
            println!("seeded {} matters", seed.matters.len());
            Ok(())
        }
        Commands::DueDate { .. } => Ok(()),
    }
}
