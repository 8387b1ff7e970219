use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use powerdial::clock::{Clock, SystemClock};
use powerdial::config::LoggingConfig;
use powerdial::models::read_contacts;
use powerdial::prelude::*;

#[derive(Parser)]
#[command(
    name = "powerdial",
    version,
    about = "Outbound calling campaigns with caller-ID rotation and contact throttling",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides `logging.format`
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a campaign against the simulated provider
    Run {
        /// JSON array of contacts
        #[arg(long)]
        contacts: PathBuf,

        /// Seconds before a simulated pickup
        #[arg(long, default_value = "5")]
        ring_secs: u64,

        /// Seconds a simulated conversation lasts
        #[arg(long, default_value = "30")]
        talk_secs: u64,

        /// Phone numbers that never pick up
        #[arg(long = "no-answer")]
        no_answer: Vec<String>,

        /// Phone numbers answered by a machine
        #[arg(long)]
        voicemail: Vec<String>,

        /// Phone numbers that fail with a carrier error
        #[arg(long)]
        fail: Vec<String>,

        /// Print campaign events as JSON lines
        #[arg(long, default_value = "false")]
        events: bool,

        /// Print Prometheus metrics after the report
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// Show (and optionally record) a contact's throttle status
    Throttle {
        /// Contact ID
        #[arg(long)]
        contact: String,

        /// Channel (voice, text)
        #[arg(long, default_value = "voice")]
        channel: String,

        /// Record a contact now before reporting
        #[arg(long, default_value = "false")]
        record: bool,
    },

    /// Show caller-ID pool usage
    Carousel {
        /// Draw this many caller IDs for the configured agent
        #[arg(short, long, default_value = "0")]
        select: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
        config.validate()?;
    }

    setup_tracing(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Run {
            contacts,
            ring_secs,
            talk_secs,
            no_answer,
            voicemail,
            fail,
            events,
            metrics,
        } => {
            let provider = SimulatedProvider::new().with_default_script(CallScript::answer(
                Duration::from_secs(ring_secs),
                Duration::from_secs(talk_secs),
            ));
            let provider = no_answer.into_iter().fold(provider, |p, phone| {
                p.with_script(phone, CallScript::NoAnswer)
            });
            let provider = voicemail.into_iter().fold(provider, |p, phone| {
                p.with_script(
                    phone,
                    CallScript::voicemail(Duration::from_secs(ring_secs), Duration::from_secs(10)),
                )
            });
            let provider = fail.into_iter().fold(provider, |p, phone| {
                p.with_script(
                    phone,
                    CallScript::Fail {
                        after: Duration::from_secs(2),
                        message: "carrier rejected the call".into(),
                    },
                )
            });

            run(&config, &contacts, provider, events, metrics).await?;
        }
        Commands::Throttle {
            contact,
            channel,
            record,
        } => {
            throttle(&config, &contact, &channel, record).await?;
        }
        Commands::Carousel { select } => {
            carousel(&config, select).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(logging.filter_directive(verbose));

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

async fn run(
    config: &Config,
    contacts_path: &std::path::Path,
    provider: SimulatedProvider,
    print_events: bool,
    print_metrics: bool,
) -> Result<()> {
    if let Err(e) = powerdial::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    let contacts = read_contacts(contacts_path)
        .with_context(|| format!("Failed to load contacts from {}", contacts_path.display()))?;
    tracing::info!(count = contacts.len(), "Loaded contacts");

    let throttle = config.throttle.open().await?;
    let carousel = config.carousel.open().await?;

    // The CLI owns this provider, so hanging up everything on interrupt is safe
    let provider = Arc::new(provider);
    let mut dialer = Dialer::new(
        config.agent.id.clone(),
        provider.clone(),
        Arc::new(carousel),
        Arc::new(throttle),
    );
    if let Some(alternate) = &config.carousel.alternate_identifier {
        dialer = dialer.with_alternate_caller_id(alternate.clone());
    }

    let campaign = dialer.start(&contacts, config.dialer.clone()).await?;
    println!("Campaign {} started", campaign.campaign_id());

    if print_events {
        let mut events = campaign.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                    },
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Event printer fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let mut snapshots = campaign.watch();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Interrupted, stopping campaign");
            if let Err(e) = campaign.stop().await {
                tracing::debug!(error = %e, "Campaign already finished");
            }
            provider.disconnect_all().await;
        }
        _ = snapshots.wait_for(|s| s.state == DialerState::Stopped) => {}
    }

    let report = campaign.wait().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if print_metrics {
        match powerdial::metrics::encode_metrics() {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    Ok(())
}

async fn throttle(config: &Config, contact: &str, channel: &str, record: bool) -> Result<()> {
    let channel = Channel::parse(channel)
        .with_context(|| format!("Unknown channel '{channel}' (expected voice or text)"))?;
    let throttle = config.throttle.open().await?;
    let now = SystemClock.now();

    if record {
        throttle
            .record(contact, channel, now, Some(config.agent.id.as_str()))
            .await?;
        println!("Recorded {channel} contact with {contact}");
    }

    let summary = throttle.summary(contact, channel, now).await?;
    println!("Contact: {contact}");
    println!("  Channel: {channel}");
    match summary.days_since {
        Some(days) => println!("  Last contacted: {days} day(s) ago"),
        None => println!("  Last contacted: never"),
    }
    println!("  {}", summary.recommendation);

    Ok(())
}

async fn carousel(config: &Config, select: usize) -> Result<()> {
    let carousel = config.carousel.open().await?;

    for _ in 0..select {
        let selection = carousel.select_for_agent(&config.agent.id).await?;
        println!("{} ({})", selection.identifier, selection.source);
    }

    let stats = carousel.pool_stats().await?;
    println!("Pool size: {}", stats.size);
    println!("  Never used: {}", stats.never_used);
    println!("  Calls per number: {}..{}", stats.min_calls, stats.max_calls);

    for number in carousel.numbers().await? {
        let last_used = number
            .last_used_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("  {}  calls={}  last_used={}", number.identifier, number.call_count, last_used);
    }

    Ok(())
}
