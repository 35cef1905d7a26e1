//! HTTP surface: shared state, error mapping and the `/api` router

mod error;
mod state;

use axum::Router;

pub use error::ApiErrorResponse;
pub use state::{AppState, AppStats};

use crate::case::case_routes;
use crate::interactive::interactive_routes;
use crate::job::job_routes;
use crate::render::render_routes;

/// All API routes, to be nested under `/api`
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .merge(case_routes(state.clone()))
        .merge(job_routes(state.clone()))
        .merge(interactive_routes(state.clone()))
        .merge(render_routes(state))
}
