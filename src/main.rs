mod api;
mod blockchain;
mod config;
mod miner;
mod state;
mod store;
mod transaction;
mod util;
mod vm;
mod wallet;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

use api::AppState;
use blockchain::Blockchain;
use config::{Config, DbKind};
use store::{DocumentStore, FileStore, MemoryStore};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };

    if let Some(miner) = config.miner {
        miner::run(miner).await;
        return Ok(());
    }

    let store: Arc<dyn DocumentStore> = match &config.db {
        DbKind::Memory => Arc::new(MemoryStore::new()),
        DbKind::File(path) => Arc::new(FileStore::open(path).await.map_err(std::io::Error::other)?),
    };

    let chain = Arc::new(Blockchain::new(store));
    if !chain
        .init(&config.genesis)
        .await
        .map_err(std::io::Error::other)?
    {
        info!("resuming existing chain");
    }

    let (host, port) = (config.host, config.port);
    info!("⛓️ Starting pool API at http://{host}:{port}");

    let state = web::Data::new(AppState::new(chain));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
