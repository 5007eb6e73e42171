pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod state;
pub mod store;
pub mod workers;

pub use workers::{default_handlers, Worker};
