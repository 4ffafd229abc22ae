// src/main.rs

use env_logger::Env;
use log::{error, info};

use trip_track::{AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Bootstrapping Trip Track store: backend={:?} database={}",
        config.store_backend, config.database_name
    );

    let state = AppState::connect(config).await?;
    info!(
        "Store ready (bcrypt cost {}); services: users, routes, conversations, messages",
        state.config.bcrypt_cost
    );
    Ok(())
}
