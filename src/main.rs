use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use agent_bridge::{commands, logging, EnvConfig};
use agent_provider::{AgentContext, CancelSignal};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_hub::HANDLER_SOCKET_PATH;
use tracing::warn;

#[derive(Parser)]
#[command(name = "agent-bridge")]
#[command(version)]
#[command(about = "Stream coding-agent invocations with resumable sessions")]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a handler behind the local HTTP endpoint
    Serve {
        /// Handler to host
        #[arg(long)]
        provider: Option<String>,

        /// Host to bind to
        #[arg(long)]
        host: Option<IpAddr>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run a relay hub
    Relay {
        /// Host to bind to
        #[arg(long)]
        host: Option<IpAddr>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Register a handler with a remote relay hub
    Connect {
        /// Relay base URL, e.g. ws://127.0.0.1:4722
        #[arg(long)]
        relay_url: Option<String>,

        /// Handler to register
        #[arg(long)]
        provider: Option<String>,
    },

    /// Start a new session against a running endpoint
    Send {
        /// Prompt text
        #[arg(short, long)]
        prompt: String,

        /// Context fragment, repeatable
        #[arg(short, long)]
        content: Vec<String>,

        /// Session id to use instead of a generated one
        #[arg(long)]
        session_id: Option<String>,

        /// Endpoint base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Session store file
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Resume a stored session
    Resume {
        session_id: String,

        /// Endpoint base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Session store file
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = EnvConfig::from_env();
    logging::init(cli.log_json || config.log_json);

    match cli.command {
        Commands::Serve {
            provider,
            host,
            port,
        } => {
            if let Some(provider) = provider {
                config.provider = provider;
            }
            let addr = SocketAddr::new(host.unwrap_or(config.host), port.unwrap_or(config.port));
            commands::serve_endpoint(&config, addr, shutdown_signal()).await?;
        }
        Commands::Relay { host, port } => {
            let addr = SocketAddr::new(
                host.unwrap_or(config.host),
                port.unwrap_or(config.relay_port),
            );
            commands::serve_relay(addr, shutdown_signal()).await?;
        }
        Commands::Connect {
            relay_url,
            provider,
        } => {
            if let Some(provider) = provider {
                config.provider = provider;
            }
            let base = relay_url
                .or_else(|| config.relay_url.clone())
                .context("a relay url is required (--relay-url or AGENT_BRIDGE_RELAY_URL)")?;
            let url = handler_socket_url(&base);

            let cancel = CancelSignal::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                on_signal.cancel();
            });
            commands::connect_relay(&config, &url, cancel).await?;
        }
        Commands::Send {
            prompt,
            content,
            session_id,
            endpoint,
            store,
        } => {
            let controller = commands::session_controller(
                endpoint.as_deref().unwrap_or(&config.endpoint_url),
                &store.unwrap_or(config.store_path),
            )?;
            let mut context = AgentContext::new(content, prompt);
            if let Some(session_id) = session_id {
                context = context.with_session_id(session_id);
            }
            let mut stdout = std::io::stdout();
            commands::send_prompt(&controller, context, &mut stdout).await?;
        }
        Commands::Resume {
            session_id,
            endpoint,
            store,
        } => {
            let controller = commands::session_controller(
                endpoint.as_deref().unwrap_or(&config.endpoint_url),
                &store.unwrap_or(config.store_path),
            )?;
            let mut stdout = std::io::stdout();
            commands::resume_session(&controller, &session_id, &mut stdout).await?;
        }
    }

    Ok(())
}

fn handler_socket_url(base: &str) -> String {
    if base.ends_with(HANDLER_SOCKET_PATH) {
        base.to_string()
    } else {
        format!("{}{HANDLER_SOCKET_PATH}", base.trim_end_matches('/'))
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
