use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docchat::api::{self, AppState};
use docchat::chat::build_provider;
use docchat::config::{init_tracing, Cli};
use docchat::session::{SessionStore, PURGE_INTERVAL};
use docchat::{DocumentStore, Embedder, OpenAiEmbedder, TextSplitter};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "docchat-server",
    about = "HTTP API for document upload, similarity search and chat sessions"
)]
struct ServerCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "DOCCHAT_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Deployment environment; document reset is only allowed in `development`.
    #[arg(long, env = "ENV", default_value = "development")]
    environment: String,

    /// Minutes of inactivity before a chat session expires.
    #[arg(long, env = "DOCCHAT_SESSION_TIMEOUT_MINS", default_value_t = 30)]
    session_timeout_mins: u64,

    /// Messages of history sent with each chat turn.
    #[arg(long, env = "DOCCHAT_HISTORY_LIMIT", default_value_t = 20)]
    history_limit: usize,

    #[command(flatten)]
    common: Cli,
}

fn main() -> Result<()> {
    init_tracing("info");
    let cli = ServerCli::parse();

    // Blocking HTTP clients must be built outside the async runtime.
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
        &cli.common.embedding_settings()?,
    )?);
    let chat = build_provider(&cli.common.chat_settings()?)?;
    let store = Arc::new(DocumentStore::open(
        cli.common.store_path(),
        TextSplitter::new(cli.common.chunker_config()),
        embedder,
    ));
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(
        cli.session_timeout_mins.max(1) * 60,
    )));
    let state = AppState {
        store,
        chat,
        sessions,
        history_limit: cli.history_limit.max(1),
        allow_reset: cli.environment == "development",
    };
    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let result = runtime.block_on(serve(addr, state.clone()));
    // The last handle to the blocking clients is released after the runtime.
    drop(runtime);
    drop(state);
    result
}

async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            sessions.purge_expired();
        }
    });

    info!(
        documents = state.store.list_documents().len(),
        chunks = state.store.chunk_count(),
        "loaded document store"
    );
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("docchat-server listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}
