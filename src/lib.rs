pub mod app;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod middleware;
pub mod seed;
pub mod state;
pub mod users;

pub use error::AppError;
