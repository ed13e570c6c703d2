//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "viewer")]
#[command(about = "MQTT relay viewer: live topic mirror, subscriptions, publishing")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Payload given inline or read from a file.
#[derive(Args, Debug, Clone)]
pub struct PayloadArgs {
    /// JSON payload; an array publishes each element separately
    #[arg(value_name = "PAYLOAD")]
    pub payload: Option<String>,

    /// Read the payload from a file instead
    #[arg(long, short, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow the relayer and show the latest message per topic [default]
    Run,

    /// Connect the relayer to a broker
    Connect {
        #[arg(value_name = "HOST")]
        host: String,

        #[arg(value_name = "PORT")]
        port: i32,

        /// MQTT client id the relayer presents to the broker
        #[arg(value_name = "CLIENT_ID")]
        client_id: String,

        #[arg(long, default_value = "")]
        username: String,

        #[arg(long, default_value = "")]
        password: String,
    },

    /// Disconnect the relayer from its broker and forget local subscriptions
    Disconnect,

    /// Show broker connection state and subscriptions
    Status,

    /// Subscribe to a topic
    Subscribe {
        #[arg(value_name = "TOPIC")]
        topic: String,
    },

    /// Unsubscribe from a topic
    Unsubscribe {
        #[arg(value_name = "TOPIC")]
        topic: String,
    },

    /// Subscribe to every predefined topic
    SubscribeAll,

    /// Unsubscribe from every subscribed topic
    UnsubscribeAll,

    /// Publish a payload and follow its progress
    Publish {
        #[arg(value_name = "TOPIC")]
        topic: String,

        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Check that a payload is valid JSON and count its items
    Validate {
        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Pretty-print a payload
    Format {
        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Show recent publish results
    Results {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the relayer's latest message per topic
    Latest,
}
