//! Command runners behind the `agent-bridge` binary.

use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use agent_client::{ClientConfig, ProviderClient, SessionController, SessionRun};
use agent_endpoint::{EndpointConfig, EndpointState};
use agent_provider::{AgentContext, CancelSignal};
use anyhow::{anyhow, Context, Result};
use relay_hub::{HubHandle, RelayConnector};
use session_store::{FileStorage, SessionStore};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::EnvConfig;
use crate::providers::handler_for_id;

/// Hosts the selected handler behind the local HTTP endpoint.
pub async fn serve_endpoint<F>(config: &EnvConfig, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handler = handler_for_id(&config.provider, config).map_err(|error| anyhow!(error))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind endpoint on {addr}"))?;

    let endpoint = EndpointConfig::default()
        .with_host(addr.ip())
        .with_port(addr.port());
    agent_endpoint::serve(listener, EndpointState::new(handler, endpoint), shutdown)
        .await
        .context("endpoint server failed")
}

/// Runs a relay hub until `shutdown` resolves.
pub async fn serve_relay<F>(addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind relay on {addr}"))?;
    let (hub, _task) = HubHandle::spawn();
    relay_hub::serve_relay(listener, hub, shutdown)
        .await
        .context("relay server failed")
}

/// Registers the selected handler with a remote relay hub.
pub async fn connect_relay(config: &EnvConfig, relay_url: &str, cancel: CancelSignal) -> Result<()> {
    let handler = handler_for_id(&config.provider, config).map_err(|error| anyhow!(error))?;
    let connector = RelayConnector::new(relay_url, handler);
    info!(relay_url, agent_id = %connector.agent_id(), "connecting handler to relay");
    connector
        .run(cancel)
        .await
        .with_context(|| format!("relay connection to {relay_url} failed"))
}

/// Builds a session controller over the durable store at `store_path`.
pub fn session_controller(endpoint_url: &str, store_path: &Path) -> Result<SessionController> {
    let client = ProviderClient::new(ClientConfig::new(endpoint_url))
        .with_context(|| format!("invalid endpoint url {endpoint_url}"))?;
    let storage = FileStorage::open(store_path)
        .with_context(|| format!("failed to open session store {}", store_path.display()))?;
    let store = SessionStore::new(Arc::new(storage));
    Ok(SessionController::new(Arc::new(client), Arc::new(store)))
}

/// Starts a new session and writes each status as one line to `out`.
pub async fn send_prompt(
    controller: &SessionController,
    context: AgentContext,
    out: &mut (dyn Write + Send),
) -> Result<String> {
    let run = controller.start(context).await?;
    let session_id = run.session_id().to_string();
    writeln!(out, "session {session_id}")?;
    print_run(run, out).await?;
    Ok(session_id)
}

/// Re-attaches to a stored session and writes its statuses to `out`.
pub async fn resume_session(
    controller: &SessionController,
    session_id: &str,
    out: &mut (dyn Write + Send),
) -> Result<()> {
    let run = controller.resume(session_id).await?;
    print_run(run, out).await
}

async fn print_run(mut run: SessionRun, out: &mut (dyn Write + Send)) -> Result<()> {
    while let Some(status) = run.next_status().await {
        writeln!(out, "{}", status?)?;
    }
    if let Some(message) = run.completion_message() {
        writeln!(out, "{message}")?;
    }
    Ok(())
}
