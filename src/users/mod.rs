use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod images;
pub mod repo;
pub mod repo_types;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::me_routes())
        .merge(handlers::image_routes())
}
