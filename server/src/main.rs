use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

use chat_server::config::{generate_config_template, Config};
use chat_server::store::{SharedStore, SqliteMessageStore};
use chat_server::{auth, db, routes, shutdown, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chat_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    // Shared secret from config, else a random key kept in data_dir
    let jwt_secret = auth::jwt::resolve_jwt_secret(config.jwt_secret.as_deref(), &config.data_dir)?;

    // Handle --issue-token: print a token for local testing and exit
    if let Some(user_id) = config.issue_token {
        let token = auth::jwt::issue_access_token(
            &jwt_secret,
            user_id,
            &format!("user{user_id}"),
            auth::jwt::ACCESS_TOKEN_TTL_SECS,
        )?;
        println!("{token}");
        return Ok(());
    }

    tracing::info!("Chat server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;
    let store: SharedStore = Arc::new(SqliteMessageStore::new(db));

    let app_state = state::AppState::new(jwt_secret, store, config.ws.clone());
    let registry = app_state.chat.registry().clone();

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Upgraded sockets outlive axum's graceful shutdown, so the drain runs
    // alongside it and the process waits for both.
    let (drained_tx, mut drained_rx) = watch::channel(false);
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown::shutdown_signal().await;
        tokio::spawn(async move {
            shutdown::drain_connections(&registry, shutdown_timeout).await;
            let _ = drained_tx.send(true);
        });
    });

    serve.await?;

    // A connection that ignores the close frame must not hold the process
    let _ = tokio::time::timeout(shutdown_timeout, drained_rx.wait_for(|done| *done)).await;

    tracing::info!("Chat server stopped");
    Ok(())
}
