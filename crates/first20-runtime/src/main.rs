//! First 20 Hours
//!
//! Command line entry point: runs the timer runtime against the in-process
//! backend and manages the configuration file.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use first20_core::models::{Config, Timer};
use first20_core::storage::{init_data_dir, MemoryStore};
use first20_runtime::{ConfigManager, Runtime, RuntimeEvent, TimerEventType};
use std::fs;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "first20")]
#[command(about = "First 20 Hours - practice timers for learning new skills", long_about = None)]
struct Args {
    /// Log level, overrides the configured one
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign up a demo user, create a timer and run its countdown
    Demo {
        /// How long to let the countdown run
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Tick period, overrides the configured one
        #[arg(long)]
        tick_millis: Option<u64>,
    },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Reset,
    SetTick { millis: u64 },
    SetLogLevel { level: String },
    SetBackend {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        anon_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::new().context("Failed to load configuration")?;
    let config = config_manager.get().await;

    let log_level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&log_level)?;

    match args.command {
        Command::Demo {
            seconds,
            tick_millis,
        } => {
            let mut config = config;
            if let Some(millis) = tick_millis {
                if millis == 0 {
                    bail!("Tick interval must be greater than 0");
                }
                config.countdown.tick_millis = millis;
            }
            run_demo(config, seconds).await
        }
        Command::Config { action } => run_config(&config_manager, action).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let data_dir = init_data_dir()?;
    let log_file_path = data_dir.join("first20.log");

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
        .with_context(|| format!("Failed to open {}", log_file_path.display()))?;

    // stdout stays readable, the file gets everything
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    let stdout_writer = std::io::stdout.with_max_level(tracing::Level::INFO);
    let file_writer = log_file.with_max_level(tracing::Level::DEBUG);

    tracing_subscriber::fmt()
        .with_writer(stdout_writer.and(file_writer))
        .with_env_filter(level)
        .with_ansi(false)
        .init();

    tracing::debug!("Log file: {}", log_file_path.display());
    Ok(())
}

async fn run_config(manager: &ConfigManager, action: ConfigAction) -> Result<()> {
    let config = match action {
        ConfigAction::Show => manager.get().await,
        ConfigAction::Reset => manager.reset_to_default().await?,
        ConfigAction::SetTick { millis } => manager.set_tick_millis(millis).await?,
        ConfigAction::SetLogLevel { level } => manager.set_log_level(level).await?,
        ConfigAction::SetBackend { url, anon_key } => manager.set_backend(url, anon_key).await?,
    };

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn run_demo(config: Config, seconds: u64) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let runtime = Runtime::new(store.clone(), &config);
    let mut events = runtime.subscribe();

    runtime.start().await?;

    let user = runtime
        .session()
        .register("Demo learner", "demo@first20.local", "practice", None)
        .await?;
    tracing::info!("Signed in as {} {}", user.emoji, user.name);
    let rt = &runtime;
    wait_until(move || async move { rt.collection().user_id().await.is_some() }).await?;

    let timer = Timer::new(
        "Learn Rust".to_string(),
        "Write a small CLI tool without looking things up".to_string(),
        vec![
            "Ownership and borrowing".to_string(),
            "Error handling".to_string(),
            "Async with tokio".to_string(),
        ],
        "The Rust Book, Rust by Example".to_string(),
    )?;
    let timer = runtime.collection().add(timer).await?;
    let timer_id = timer.id.as_str();
    wait_until(move || async move { rt.countdowns().is_mounted(timer_id).await }).await?;

    runtime.countdowns().start(&timer.id).await?;
    let deadline = Instant::now() + Duration::from_secs(seconds);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            event = events.recv() => {
                if let Ok(RuntimeEvent::Timer(event)) = event {
                    if let TimerEventType::Tick { time_left } = event.event_type {
                        let snapshot = runtime.countdowns().snapshot(&event.timer_id).await?;
                        println!("{}  {}s left", snapshot.display.as_clock(), time_left);
                    }
                }
            }
        }
    }

    runtime.countdowns().pause(&timer.id).await?;
    let stored = runtime
        .collection()
        .require(&timer.id)
        .await
        .context("Timer vanished from the collection")?;
    println!(
        "Paused \"{}\" with {} remaining ({} practiced)",
        stored.title,
        stored.format_short(),
        stored.practiced_seconds()
    );

    runtime.shutdown().await;
    Ok(())
}

async fn wait_until<F, Fut>(mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    bail!("Timed out waiting for the runtime")
}
