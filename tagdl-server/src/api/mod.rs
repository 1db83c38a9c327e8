//! HTTP API handlers for tagdl-server

pub mod download;
pub mod files;
pub mod health;

pub use download::download_routes;
pub use files::files_routes;
pub use health::health_routes;
