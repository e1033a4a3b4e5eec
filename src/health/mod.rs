use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;

pub use dto::{DatabaseHealth, HealthReport};

pub fn router() -> Router<AppState> {
    handlers::health_routes()
}
