//! HTTP surface of the agents

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::route_catalog;
pub use server::{AppState, build_router, serve, serve_on};
