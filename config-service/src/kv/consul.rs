use super::{KvClient, KvError, KvPair};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulKvPair {
    key: String,
    // Consul reports an empty value as null
    value: Option<String>,
}

impl TryFrom<ConsulKvPair> for KvPair {
    type Error = KvError;

    fn try_from(pair: ConsulKvPair) -> Result<Self, Self::Error> {
        let value = match pair.value {
            Some(encoded) => Bytes::from(STANDARD.decode(encoded)?),
            None => Bytes::new(),
        };
        Ok(KvPair {
            key: pair.key,
            value,
        })
    }
}

/// Client for the Consul KV HTTP API (`/v1/kv`).
pub struct ConsulKv {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    datacenter: Option<String>,
}

impl ConsulKv {
    pub fn new(
        base_url: Url,
        token: Option<String>,
        datacenter: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, KvError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(ConsulKv {
            client,
            base_url,
            token,
            datacenter,
        })
    }

    fn key_url(&self, key: &str, params: &[(&str, &str)]) -> Result<Url, KvError> {
        // The url crate resolves dot segments, which would address another key
        if key.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(KvError::InvalidKey(key.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| KvError::InvalidKey(format!("cannot append {key} to {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "kv"])
            .extend(key.split('/'));

        {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
            if let Some(dc) = &self.datacenter {
                query.append_pair("dc", dc);
            }
        }
        // Drop the dangling '?' left behind when no parameter was appended
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, KvError> {
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        Ok(request.send().await?)
    }

    async fn read_pairs(&self, url: Url) -> Result<Vec<KvPair>, KvError> {
        let response = self.send(Method::GET, url, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => response
                .json::<Vec<ConsulKvPair>>()
                .await?
                .into_iter()
                .map(KvPair::try_from)
                .collect(),
            status => Err(status_error(status, response).await),
        }
    }

    async fn write(&self, url: Url, value: Bytes) -> Result<bool, KvError> {
        let response = self.send(Method::PUT, url, Some(value)).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), response).await);
        }
        Ok(response.json::<bool>().await?)
    }

    async fn remove(&self, url: Url) -> Result<(), KvError> {
        let response = self.send(Method::DELETE, url, None).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), response).await);
        }
        Ok(())
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> KvError {
    let body = response.text().await.unwrap_or_default();
    KvError::Status {
        status,
        body: body.trim().to_string(),
    }
}

#[async_trait]
impl KvClient for ConsulKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        let url = self.key_url(key, &[])?;
        // Without recurse the backend answers with the exact key only
        let pair = self.read_pairs(url).await?.into_iter().next();
        Ok(pair.map(|p| p.value))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        let url = self.key_url(key, &[])?;
        if !self.write(url, value).await? {
            // A plain put only reports false when the backend refused the write
            return Err(KvError::Status {
                status: StatusCode::CONFLICT,
                body: format!("write to {key} was rejected"),
            });
        }
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Bytes) -> Result<bool, KvError> {
        // cas=0 only succeeds if the key does not exist yet
        let url = self.key_url(key, &[("cas", "0")])?;
        self.write(url, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let url = self.key_url(key, &[])?;
        self.remove(url).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, KvError> {
        let url = self.key_url(prefix, &[("recurse", "true")])?;
        self.read_pairs(url).await
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), KvError> {
        let url = self.key_url(prefix, &[("recurse", "true")])?;
        self.remove(url).await
    }
}
