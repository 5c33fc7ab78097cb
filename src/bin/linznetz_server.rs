use linznetz::{
    import_router, init_logging, log_app_bind, log_app_start, logging_config_from_env,
    ImportService, ServerConfig, SqliteStatisticsStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("linznetz_server", &logging_cfg);

    let cfg = ServerConfig::from_env()?;
    let store = SqliteStatisticsStore::open(&cfg.db_path)?;
    let service = ImportService::new(store, cfg.meter.clone());
    let app = import_router(service);

    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr, &cfg.db_path);
    axum::serve(listener, app).await?;

    Ok(())
}
