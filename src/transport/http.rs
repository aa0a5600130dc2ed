//! HTTP API client on reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::message::ServerMessage;
use crate::core::constants::{CONFIG_PATH, ROUTES_PATH, STATE_PATH};
use crate::core::{Api, ApiError};
use crate::sync::{Block, Record};

/// [`Api`] over HTTP, rooted at one event's base URL.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    /// Client for the event at `base`.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    /// Base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `<base>/<path>`.
    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|()| ApiError::Request(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .push(path);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        debug!(url = %url, ?query, "GET");
        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn state(&self) -> Result<ServerMessage, ApiError> {
        self.get_json(STATE_PATH, &[]).await
    }

    async fn config(&self, hash: &str) -> Result<Value, ApiError> {
        self.get_json(CONFIG_PATH, &[("hash", hash)]).await
    }

    async fn routes(&self, hash: &str) -> Result<Value, ApiError> {
        self.get_json(ROUTES_PATH, &[("hash", hash)]).await
    }

    async fn block(&self, topic: &str, entity: &str, block: &Block) -> Result<Vec<Record>, ApiError> {
        let start = block.start_index.to_string();
        let end = block.end_index.to_string();
        self.get_json(
            topic,
            &[
                ("name", entity),
                ("start_index", &start),
                ("end_index", &end),
                ("end_hash", &block.end_hash),
            ],
        )
        .await
    }

    async fn pull(&self, topic: &str, entity: Option<&str>) -> Result<Value, ApiError> {
        match entity {
            Some(entity) => self.get_json(topic, &[("name", entity)]).await,
            None => self.get_json(topic, &[]).await,
        }
    }
}
