pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod listing;
pub mod models;
pub mod services;
pub mod state;

pub use catalog::{Catalog, InstanceFilter};
pub use config::ClientConfig;
pub use error::{ApiError, AppError, ErrorKind};
pub use state::ClientContext;
