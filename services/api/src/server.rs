use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_permit_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use permit_sync::config::AppConfig;
use permit_sync::error::AppError;
use permit_sync::permit::FileRecordStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) fn run(config: AppConfig, args: ServeArgs) -> Result<(), AppError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, args))
}

async fn serve(mut config: AppConfig, mut args: ServeArgs) -> Result<(), AppError> {
    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(FileRecordStore::new(&config.storage.data_dir));
    let app = with_permit_routes(store)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        data_dir = %config.storage.data_dir.display(),
        "permit history service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
