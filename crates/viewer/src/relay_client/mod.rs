//! Relayer client: HTTP control API and the `/ws` event stream.

mod http;
mod ws;

pub use http::RelayerApi;
pub use ws::{dispatch, publish_and_follow, run_ws_client, Dispatch};

use std::env;

/// Where the relayer lives and who this viewer is.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relayer_url: String,
    pub ws_url: String,
    pub client_id: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let relayer_url = env::var("RELAYER_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();
        let ws_url = env::var("RELAYER_WS_URL").unwrap_or_else(|_| ws_url_for(&relayer_url));
        let client_id = env::var("VIEWER_CLIENT_ID").unwrap_or_else(|_| "viewer".to_string());
        Self {
            relayer_url,
            ws_url,
            client_id,
        }
    }
}

/// `http(s)://host` → `ws(s)://host/ws`.
pub fn ws_url_for(http_url: &str) -> String {
    let base = http_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{}/ws", base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_is_derived_from_http_url() {
        assert_eq!(ws_url_for("http://localhost:8080"), "ws://localhost:8080/ws");
        assert_eq!(ws_url_for("https://relay.example/"), "wss://relay.example/ws");
    }
}
