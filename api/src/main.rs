use bench_api::context::EntityContext;
use bench_api::helpers;
use bench_api::AppState;
use log::{info, warn, LevelFilter};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

async fn connect_database_with_retry(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY_SECS: u64 = 6;

    let mut options = ConnectOptions::new(database_url.to_string());
    options.sqlx_logging_level(LevelFilter::Debug);

    let mut attempt = 0;
    loop {
        match Database::connect(options.clone()).await {
            Ok(db) => return Ok(db),
            Err(err) if attempt < MAX_RETRIES => {
                warn!(
                    "Failed to connect to database (attempt {}/{}): {}; retrying in {}s",
                    attempt + 1,
                    MAX_RETRIES + 1,
                    err,
                    RETRY_DELAY_SECS
                );
                attempt += 1;
                sleep(Duration::from_secs(RETRY_DELAY_SECS)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv().ok();

    let log_level = helpers::resolve_log_level();
    let log_file = helpers::resolve_log_file();
    bench_core::initialize_logger(log_level, log_file.as_deref())?;

    info!(
        "Benchmark API starting (level={}, logfile={})",
        log_level,
        log_file.as_deref().unwrap_or("none")
    );

    // sqlx and axum-server may both pull in rustls; pin the provider once.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let database_url = helpers::resolve_database_url();
    let sql_config: tokio_postgres::Config = database_url.parse()?;
    let db = Arc::new(connect_database_with_retry(&database_url).await?);
    info!(
        "Connected to database {}",
        sql_config.get_dbname().unwrap_or("<default>")
    );

    if helpers::resolve_ensure_schema() {
        EntityContext::new(db.clone()).ensure_created().await?;
        info!("Table \"MyEntities\" is present");
    }

    let app = bench_api::app(AppState::new(db, sql_config));

    let bind_address = format!(
        "{}:{}",
        helpers::resolve_api_bind_addr(),
        helpers::resolve_api_port()
    );
    info!("Listening on {}{}", bind_address, bench_api::ROUTE_PREFIX);

    match helpers::resolve_tls_paths() {
        Some((cert_path, key_path)) => {
            info!("HTTPS enabled (cert={}, key={})", cert_path, key_path);
            let tls_config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert_path, &key_path)
                    .await
                    .map_err(|e| format!("Failed to load TLS cert/key: {e}"))?;
            let addr: SocketAddr = bind_address
                .parse()
                .map_err(|e| format!("Invalid bind address: {e}"))?;
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(&bind_address).await?;
            axum::serve(listener, app).await?;
        }
    }

    info!("Server shutdown");
    Ok(())
}
