use std::sync::Arc;

use log::info;

use crate::config::{Config, StoreBackend};
use crate::error::StoreError;
use crate::services::{ConversationService, MessageService, RouteService, UserService};
use crate::store::{MemoryStore, MongoStore, Store};

/// The four services over one shared store.
#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub routes: RouteService,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        AppState {
            users: UserService::new(store.clone(), config.bcrypt_cost),
            routes: RouteService::new(store.clone()),
            conversations: ConversationService::new(store.clone()),
            messages: MessageService::new(store),
            config,
        }
    }

    /// Opens the configured backend; MongoDB gets its indexes ensured first.
    pub async fn connect(config: Config) -> Result<Self, StoreError> {
        let store: Arc<dyn Store> = match config.store_backend {
            StoreBackend::Mongo => {
                let mongo = MongoStore::connect(&config.mongo_uri, &config.database_name).await?;
                mongo.ensure_indexes().await?;
                info!("Connected to MongoDB database {}", config.database_name);
                Arc::new(mongo)
            }
            StoreBackend::Memory => {
                info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(AppState::new(store, config))
    }
}
