//! Wires configuration into a storage driver, event bus, KV interlock,
//! projection cache and worker pool, then serves the HTTP gateway
//! alongside the reconciliation loop until a shutdown signal arrives.

use std::{process::ExitCode, sync::Arc};

use castore::{
    cli::{Args, Command},
    config::Config,
    converters::{ConverterRegistry, image, procedure, shell},
    engine::EngineLimits,
    events::{open_event_bus, worker::WorkerPool},
    facade::{ObjectFacade, ObjectService},
    kv::open_interlock,
    projection::{MemoryProjection, Projection},
    server::http,
    storage::{open_driver, path::PathGenerator},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn build_registry() -> ConverterRegistry {
    let mut registry = ConverterRegistry::new();
    image::register_defaults(&mut registry);
    registry.register(Box::new(shell::ShellConverter));
    registry.register(Box::new(procedure::ProcedureConverter::new("/etc/castore/procedures")));
    registry
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let result = match args.command {
        Command::Serve { config } => serve(config),
        Command::SetManifest { config, group, file } => set_manifest(config, &group, &file),
        Command::GetManifest { config, group } => get_manifest(config, &group),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("castored: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<std::path::PathBuf>) -> Result<Config, castore::StoreError> {
    Config::load(path.as_deref())
}

fn set_manifest(config: Option<std::path::PathBuf>, group: &str, file: &std::path::Path) -> Result<(), castore::StoreError> {
    let cfg = load_config(config)?;
    let path_generator = PathGenerator::new(cfg.path_generator.template.clone(), cfg.path_generator.max_attempts);
    let driver = open_driver(&cfg.storage.url, path_generator)?;
    let data = std::fs::read_to_string(file)?;
    let manifest: castore::model::Manifest = serde_json::from_str(&data)?;
    driver.update_manifest(group, &manifest)
}

fn get_manifest(config: Option<std::path::PathBuf>, group: &str) -> Result<(), castore::StoreError> {
    let cfg = load_config(config)?;
    let path_generator = PathGenerator::new(cfg.path_generator.template.clone(), cfg.path_generator.max_attempts);
    let driver = open_driver(&cfg.storage.url, path_generator)?;
    let manifest = driver.read_manifest(group)?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

fn serve(config: Option<std::path::PathBuf>) -> Result<(), castore::StoreError> {
    let cfg = load_config(config)?;

    let runtime = tokio::runtime::Runtime::new().map_err(castore::StoreError::Io)?;
    runtime.block_on(async move {
        let path_generator = PathGenerator::new(cfg.path_generator.template.clone(), cfg.path_generator.max_attempts);
        let driver: Arc<dyn castore::storage::StorageDriver> = Arc::from(open_driver(&cfg.storage.url, path_generator)?);
        let bus = open_event_bus(&cfg.events.url)?;
        let lease = std::time::Duration::from_secs(cfg.interlock.lease_seconds);
        let interlock: Arc<dyn castore::kv::Interlock> = Arc::from(open_interlock(&cfg.interlock.url, lease)?);
        let projection: Arc<dyn Projection> = Arc::new(MemoryProjection::new());
        let registry = Arc::new(build_registry());

        let facade: Arc<dyn ObjectService> =
            Arc::new(ObjectFacade::new(driver.clone(), bus.clone(), interlock.clone(), projection.clone()));

        let limits = EngineLimits {
            max_tasks: cfg.engine.max_tasks,
            max_stages: cfg.engine.max_stages,
            max_retries: cfg.engine.max_retries,
        };
        let pool = Arc::new(WorkerPool {
            bus: bus.clone(),
            driver: driver.clone(),
            registry,
            interlock,
            projection,
            limits,
        });

        let shutdown = CancellationToken::new();
        let worker_shutdown = shutdown.clone();
        let worker_handle = tokio::spawn(async move {
            pool.run(Some(cfg.engine.effective_worker_pool_size()), worker_shutdown).await;
        });

        let app = http::router(facade);
        let listener = tokio::net::TcpListener::bind(cfg.server.http_addr).await.map_err(castore::StoreError::Io)?;
        info!(addr = %cfg.server.http_addr, "listening");

        let server_shutdown = shutdown.clone();
        let serve_result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                server_shutdown.cancel();
            })
            .await;

        shutdown.cancel();
        let _ = worker_handle.await;
        serve_result.map_err(castore::StoreError::Io)
    })
}
