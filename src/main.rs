use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::info;

use timeline_relay::bot::{self, ChatIds, Handlers};
use timeline_relay::config::Config;
use timeline_relay::correlation::CorrelationCache;
use timeline_relay::db::{self, Database};
use timeline_relay::feed::client::{XClient, DEFAULT_API_URL};
use timeline_relay::feed::FeedClient;
use timeline_relay::pipeline::{self, Ingestor};
use timeline_relay::relay::media::MediaFetcher;
use timeline_relay::relay::{self, Notifier, RelayWorker, Transport};
use timeline_relay::similar::{NoticeQueue, NoticeWorker};
use timeline_relay::telegram::TelegramClient;

/// timeline-relay: relay popular timeline media to a Telegram channel.
///
/// Watches the home timelines of a logged-in account, admits items whose
/// engagement outpaces their age, and republishes them with paced delivery.
#[derive(Parser)]
#[command(name = "timeline-relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run the relay: ingestion passes, relay worker and operator bot
    Run,

    /// Run a single ingestion pass, wait for the relay queue to drain, exit
    Pass,

    /// Delete relay records and fingerprints past their retention
    Sweep,

    /// Show system status (row counts, last relay)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("timeline_relay=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing database...");
            let config = Config::load()?;
            let db = db::initialize(&config.database_url).await?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.database_url);
            println!("Tables created: {table_count}");
            println!("\nNext step: fill in your .env file");
            println!("  (see .env.example for required variables)");
            println!("\nThen run: cargo run -- run");
        }

        Commands::Run => {
            let config = Config::load()?;
            config.require_relay()?;
            run(&config).await?;
        }

        Commands::Pass => {
            let config = Config::load()?;
            config.require_relay()?;
            let parts = Parts::build(&config).await?;

            let (queue, rx) = relay::channel();
            let worker = parts.relay_worker(&config);
            let worker = tokio::spawn(worker.run(rx));

            let ingestor = parts.ingestor(&config, queue);
            let relayed = ingestor.run_pass().await?;

            // Dropping the ingestor closes the queue; the worker exits once drained.
            drop(ingestor);
            worker.await?;
            println!("{} item(s) relayed", relayed.to_string().green());
        }

        Commands::Sweep => {
            let config = Config::load()?;
            let db = db::open(&config.database_url).await?;
            let (relays, fingerprints) = pipeline::sweep(db.as_ref(), config.retention()?).await?;
            println!("Deleted {relays} relay record(s) and {fingerprints} fingerprint(s)");
        }

        Commands::Status => {
            let config = Config::load()?;
            let db = db::open(&config.database_url).await?;
            timeline_relay::status::show(db.as_ref(), &config.database_url).await?;
        }
    }

    Ok(())
}

/// Long-lived collaborators shared by `run` and `pass`.
struct Parts {
    db: Arc<dyn Database>,
    feed: Arc<dyn FeedClient>,
    telegram: Arc<TelegramClient>,
    transport: Arc<dyn Transport>,
    cache: CorrelationCache,
    fetcher: MediaFetcher,
}

impl Parts {
    async fn build(config: &Config) -> Result<Self> {
        let db = db::initialize(&config.database_url).await?;
        let feed: Arc<dyn FeedClient> = Arc::new(XClient::new(
            DEFAULT_API_URL,
            &config.twitter_cookie,
            &config.xcsrf_token,
        )?);
        let telegram = Arc::new(TelegramClient::new(
            &config.bot_api_url,
            &config.telegram_bot_token,
        )?);
        let transport: Arc<dyn Transport> = telegram.clone();

        Ok(Self {
            db,
            feed,
            telegram,
            transport,
            cache: CorrelationCache::new(),
            fetcher: MediaFetcher::new()?,
        })
    }

    fn notifier(&self, config: &Config) -> Notifier {
        Notifier::new(self.transport.clone(), config.owner_id)
    }

    fn relay_worker(&self, config: &Config) -> RelayWorker {
        RelayWorker::new(
            self.transport.clone(),
            config.channel_chat_id,
            self.cache.clone(),
            self.notifier(config),
        )
        .with_pacing(config.relay_pacing)
    }

    fn ingestor(&self, config: &Config, queue: relay::RelayQueue) -> Ingestor {
        Ingestor::new(
            self.feed.clone(),
            self.db.clone(),
            config.admission_policy(),
            queue,
            self.notifier(config),
        )
        .with_fetcher(self.fetcher.clone())
    }
}

async fn run(config: &Config) -> Result<()> {
    let parts = Parts::build(config).await?;

    let (queue, rx) = relay::channel();
    tokio::spawn(parts.relay_worker(config).run(rx));

    let mut handlers = Handlers::new(
        parts.transport.clone(),
        parts.feed.clone(),
        parts.db.clone(),
        parts.cache.clone(),
        ChatIds {
            owner_id: config.owner_id,
            channel_id: config.channel_chat_id,
            group_id: config.group_chat_id,
        },
    )
    .with_fetcher(parts.fetcher.clone());

    if let Some((channel_id, group_id)) = config.similar_chats() {
        let (notices, notice_rx) = NoticeQueue::channel();
        tokio::spawn(NoticeWorker::new(parts.transport.clone(), group_id).run(notice_rx));
        handlers = handlers.with_similar_channel(channel_id, notices);
        info!(channel_id = channel_id, group_id = group_id, "Similar-image detection enabled");
    }

    let ingestor = parts.ingestor(config, queue);
    let retention = config.retention()?;
    let schedule = config.schedule();

    println!("{}", "timeline-relay running".bold());
    tokio::select! {
        result = bot::run_polling(parts.telegram.clone(), Arc::new(handlers)) => result,
        _ = pipeline::run_forever(&ingestor, parts.db.as_ref(), retention, schedule) => Ok(()),
    }
}
