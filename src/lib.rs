pub mod alerts;
pub mod behavior;
pub mod config;
pub mod db;
pub mod detect;
pub mod geometry;
pub mod pipeline;
pub mod state;
pub mod stats;
pub mod timesync;
pub mod utils;

pub use config::AppConfig;
pub use state::SharedState;
