//! MQTT relay viewer library (used by main and tests).

pub mod cli;
pub mod payload;
pub mod relay_client;
pub mod render;
pub mod session;
pub mod state;
