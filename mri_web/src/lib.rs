mod error;
mod multipart;
mod routes;
mod templates;

pub mod app;
pub mod config;
pub mod server;
pub mod telemetry;
pub mod uploads;

pub use app::start_app;
pub use server::{build_router, SharedState};
