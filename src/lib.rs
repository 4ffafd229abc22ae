//! Trip Track core: users and their follow graph, routes with likes,
//! comments and bookmarks, and direct-message conversations.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod pagination;
pub mod services;
pub mod store;

pub use app_state::AppState;
pub use config::Config;
pub use error::{FieldErrors, ServiceError, StoreError};
pub use pagination::{PageQuery, Paginated};
