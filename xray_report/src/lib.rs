mod diagnosis;
mod html;
mod routes;
mod server;
mod uploads;

pub mod app;
pub mod config;
pub mod report;
pub mod telemetry;

pub use app::start_app;
