//! HTTP calls to the relayer control API.

use anyhow::Result;
use serde::de::DeserializeOwned;
use shared::{
    BrokerConnection, BrokerStatusResponse, PublishAccepted, PublishRequest, PublishResultEntry,
    RelayMessage, TopicRequest,
};
use uuid::Uuid;

use crate::session::BrokerControl;

#[derive(Debug, Clone)]
pub struct RelayerApi {
    base_url: String,
    client: reqwest::Client,
}

impl RelayerApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(res: reqwest::Response) -> Result<T> {
        let status = res.status();
        if !status.is_success() {
            let err = res.text().await.unwrap_or_default();
            anyhow::bail!("relayer returned {}: {}", status, err);
        }
        Ok(res.json().await?)
    }

    pub async fn connect(&self, connection: &BrokerConnection) -> Result<BrokerStatusResponse> {
        let res = self
            .client
            .post(self.url("/broker/connect"))
            .json(connection)
            .send()
            .await?;
        Self::read(res).await
    }

    pub async fn disconnect(&self) -> Result<BrokerStatusResponse> {
        let res = self.client.post(self.url("/broker/disconnect")).send().await?;
        Self::read(res).await
    }

    pub async fn status(&self) -> Result<BrokerStatusResponse> {
        let res = self.client.get(self.url("/broker/status")).send().await?;
        Self::read(res).await
    }

    async fn topic_request(&self, path: &str, topic: &str) -> Result<BrokerStatusResponse> {
        let res = self
            .client
            .post(self.url(path))
            .json(&TopicRequest {
                topic: topic.to_string(),
            })
            .send()
            .await?;
        Self::read(res).await
    }

    /// Start a publish job; progress is delivered to `viewer_id` over `/ws`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        viewer_id: Option<Uuid>,
    ) -> Result<PublishAccepted> {
        let res = self
            .client
            .post(self.url("/publish"))
            .json(&PublishRequest {
                topic: topic.to_string(),
                payload: payload.to_string(),
                viewer_id,
            })
            .send()
            .await?;
        Self::read(res).await
    }

    pub async fn recent_results(&self, limit: usize) -> Result<Vec<PublishResultEntry>> {
        let res = self
            .client
            .get(self.url("/publish/results"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        Self::read(res).await
    }

    pub async fn stored_connection(&self) -> Result<Option<BrokerConnection>> {
        let res = self.client.get(self.url("/connection")).send().await?;
        Self::read(res).await
    }

    /// Snapshot of the newest message per topic for the current broker session.
    pub async fn latest_messages(&self) -> Result<Vec<RelayMessage>> {
        let res = self.client.get(self.url("/messages/latest")).send().await?;
        Self::read(res).await
    }
}

impl BrokerControl for RelayerApi {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.topic_request("/broker/subscribe", topic).await.map(|_| ())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.topic_request("/broker/unsubscribe", topic)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_rooted_under_api() {
        let api = RelayerApi::new("http://localhost:8080/");
        assert_eq!(
            api.url("/broker/status"),
            "http://localhost:8080/api/broker/status"
        );
    }
}
