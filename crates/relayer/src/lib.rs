//! MQTT relayer: broker session, payload transforms, viewer fan-out, publish pipeline.

pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod publish;
pub mod relay;
pub mod snapshot;
