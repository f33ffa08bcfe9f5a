//! llm-relay - OpenAI-compatible reverse proxy for a single upstream LLM service
//!
//! Normalizes bearer credentials, relays streamed responses as they arrive
//! and retries transient upstream failures.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_relay::config::Config;

#[derive(Parser)]
#[command(name = "llm-relay")]
#[command(about = "OpenAI-compatible reverse proxy for a single upstream LLM service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Optional TOML configuration file; environment variables override it
        #[arg(short, long)]
        config: Option<String>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and print a summary
    Check {
        /// Optional TOML configuration file; environment variables override it
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file_with_env(path)?,
        None => Config::from_env()?,
    };
    Ok(config)
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("llm_relay={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let mut config = load_config(config.as_deref())?;
            init_tracing(&config.logging.level);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }
            if config.upstream.static_api_key.is_none() {
                tracing::warn!(
                    "No static API key configured - requests without Authorization will be rejected"
                );
            }

            llm_relay::proxy::run_server(config).await
        }

        Commands::Check { config } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.logging.level);

            let upstream = &config.upstream;
            tracing::info!(
                listen = %config.server.listen,
                upstream = %upstream.base_url,
                static_api_key = upstream.static_api_key.is_some(),
                connect_timeout_secs = upstream.connect_timeout,
                read_timeout_secs = upstream.read_timeout,
                max_keepalive = upstream.max_keepalive,
                max_connections = upstream.max_connections,
                retry_times = upstream.retry_times,
                "Configuration is valid"
            );
            Ok(())
        }
    }
}
