//! Remote KV store
//!
//! Binds the store operations to a Synap server's StreamableHTTP command
//! endpoint. Every call is a single `POST api/v1/command`:
//! ```json
//! {
//!   "command": "kv.get",
//!   "request_id": "uuid",
//!   "payload": { "key": "..." }
//! }
//! ```
//! Values travel as JSON. TTLs travel as whole seconds, rounded up.

use super::Store;
use crate::error::{CacheError, Result};
use crate::ttl;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Remote store connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the Synap server
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Optional bearer token
    pub auth_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:15500".to_string(),
            timeout_ms: 5_000,
            auth_token: None,
        }
    }
}

impl RemoteConfig {
    /// Create a new configuration with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the timeout for requests
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Store backed by a remote Synap KV service
pub struct RemoteStore<V> {
    http_client: Client,
    endpoint: Arc<Url>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for RemoteStore<V> {
    fn clone(&self) -> Self {
        Self {
            http_client: self.http_client.clone(),
            endpoint: Arc::clone(&self.endpoint),
            _marker: PhantomData,
        }
    }
}

impl<V> RemoteStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a new remote store client
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let endpoint = base_url.join("api/v1/command")?;

        let mut builder = Client::builder().timeout(Duration::from_millis(config.timeout_ms));

        if let Some(ref token) = config.auth_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value: reqwest::header::HeaderValue = format!("Bearer {}", token)
                .parse()
                .map_err(|_| CacheError::Remote("Invalid auth token".to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        info!("Remote store targeting {}", endpoint);

        Ok(Self {
            http_client: builder.build()?,
            endpoint: Arc::new(endpoint),
            _marker: PhantomData,
        })
    }

    /// Command endpoint this store talks to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send_command(&self, command: &str, payload: Value) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!("Remote command: {} (request_id={})", command, request_id);

        let body = json!({
            "command": command,
            "request_id": request_id,
            "payload": payload,
        });

        let response = self
            .http_client
            .post(self.endpoint.as_str())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CacheError::Remote(error_text));
        }

        let result: Value = response.json().await?;

        if !result["success"].as_bool().unwrap_or(false) {
            let error_msg = result["error"]
                .as_str()
                .unwrap_or("Unknown error")
                .to_string();
            return Err(CacheError::Remote(error_msg));
        }

        Ok(result["payload"].clone())
    }

    /// The server stores the JSON encoding of a value and hands it back as text
    fn decode(key: &str, payload: Value) -> Result<V> {
        let decoded = match payload {
            Value::Null => return Err(CacheError::KeyNotFound(key.to_string())),
            Value::String(text) => serde_json::from_str(&text)
                .or_else(|_| serde_json::from_value(Value::String(text))),
            other => serde_json::from_value(other),
        };

        decoded.map_err(|_| CacheError::ConversionMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<V>(),
        })
    }

    async fn fetch(&self, key: &str) -> Result<V> {
        let payload = self.send_command("kv.get", json!({ "key": key })).await?;
        Self::decode(key, payload)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let response = self
            .send_command("kv.ttl", json!({ "key": key }))
            .await
            .map_err(|e| match e {
                CacheError::Remote(msg) if msg.to_lowercase().contains("not found") => {
                    CacheError::KeyNotFound(key.to_string())
                }
                other => other,
            })?;

        Ok(response["ttl"].as_u64().map(Duration::from_secs))
    }

    async fn store(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        let payload = json!({
            "key": key,
            "value": serde_json::to_value(&value)?,
            "ttl": ttl::as_wire_secs(ttl),
        });

        self.send_command("kv.set", payload).await?;
        Ok(())
    }
}

#[async_trait]
impl<V> Store<V> for RemoteStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<V> {
        self.fetch(key).await
    }

    /// Two round trips; the TTL is read after the value and may be slightly
    /// shorter than at the moment of the read
    async fn get_with_ttl(&self, key: &str) -> Result<(V, Option<Duration>)> {
        let value = self.fetch(key).await?;
        let remaining = self.remaining_ttl(key).await?;
        Ok((value, remaining))
    }

    async fn set(&self, key: &str, value: V) -> Result<()> {
        self.store(key, value, Duration::ZERO).await
    }

    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        self.store(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.send_command("kv.del", json!({ "key": key })).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let response = self.send_command("kv.flushdb", json!({})).await?;
        debug!("Remote FLUSHDB ({} keys)", response["flushed"]);
        Ok(())
    }

    /// Writes are acknowledged synchronously, nothing to wait for
    async fn wait(&self) -> Result<()> {
        Ok(())
    }
}
