use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use readybot_config::ConfigLoader;
use readybot_core::ReadyBotBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;

#[derive(Parser)]
#[command(name = "readybot")]
#[command(about = "Marks READY upstream orders as FULL_READY", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(
		short,
		long,
		value_name = "FILE",
		env = "READYBOT_CONFIG",
		default_value = "config/readybot.toml"
	)]
	config: PathBuf,

	#[arg(long, env = "READYBOT_LOG_LEVEL", default_value = "info")]
	log_level: String,

	#[arg(long, value_enum, env = "READYBOT_LOG_FORMAT", default_value = "pretty")]
	log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the bot and its HTTP API
	Start,
	/// Validate the configuration file
	Validate,
	/// Run a single bulk sweep and print its summary
	ProcessOnce,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
	Pretty,
	Json,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level, cli.log_format)?;
	install_panic_hook();

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
		Some(Commands::ProcessOnce) => process_once(cli).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting ready-order bot");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration loaded successfully");
	info!("Service name: {}", config.service.name);
	info!("HTTP listener: {}:{}", config.service.http_host, config.service.http_port);

	let bot = ReadyBotBuilder::new()
		.with_config(config.clone())
		.build()
		.await
		.context("Failed to build bot")?;
	let bot = Arc::new(bot);

	bot.start();

	let server = api::ApiServer::new(config.service.http_host.clone(), config.service.http_port, bot.clone());
	let http_handle = tokio::spawn(async move {
		if let Err(e) = server.run().await {
			error!("API server failed: {:#}", e);
		}
	});

	info!("Ready-order bot started successfully");

	setup_shutdown_signal().await;

	info!("Shutdown signal received, stopping services...");

	bot.shutdown();
	http_handle.abort();

	info!("Service stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Upstream: {} ({}/{})", config.upstream.base_url, config.upstream.brand, config.upstream.country);
	info!("Storage: {:?} at {:?}", config.storage.backend, config.storage.path);
	info!(
		"Schedule: {} '{}' ({})",
		if config.schedule.enabled { "enabled" } else { "disabled" },
		config.schedule.cron_pattern,
		config.schedule.timezone
	);
	info!("Monitor interval: {}ms", config.monitor.interval_ms);
	for site in &config.sites.restaurants {
		info!("  Restaurant: {} ({})", site.code, site.name);
	}

	Ok(())
}

async fn process_once(cli: Cli) -> Result<()> {
	let bot = ReadyBotBuilder::new()
		.with_config_file(cli.config.to_string_lossy())
		.build()
		.await
		.context("Failed to build bot")?;

	let summary = bot.process_orders().await;
	println!("{}", serde_json::to_string_pretty(&summary)?);

	if !summary.success {
		anyhow::bail!("Bulk sweep failed: {}", summary.message);
	}
	Ok(())
}

fn setup_tracing(log_level: &str, format: LogFormat) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	let registry = tracing_subscriber::registry().with(env_filter);
	match format {
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json())
			.try_init(),
	}
	.context("Failed to initialize tracing")?;

	Ok(())
}

/// A panic anywhere is fatal; the supervisor restarts the process.
fn install_panic_hook() {
	std::panic::set_hook(Box::new(|info| {
		error!("Unrecoverable panic: {}", info);
		std::process::exit(1);
	}));
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {}", e);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				error!("Failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
