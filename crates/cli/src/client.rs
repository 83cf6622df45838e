//! Thin REST client for the daemon API

use anyhow::{Context, Result};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    data: Option<Value>,
    error: Option<ErrorBody>,
    call_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Send a request and decode the envelope's `data`
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let envelope: Envelope = request
            .send()
            .await
            .context("Failed to connect to daemon")?
            .json()
            .await
            .context("Failed to parse response")?;

        if !envelope.ok {
            match envelope.error {
                Some(error) => anyhow::bail!(
                    "{} ({}, call {})",
                    error.message,
                    error.code,
                    envelope.call_id.as_deref().unwrap_or("-")
                ),
                None => anyhow::bail!("Request failed without error details"),
            }
        }

        let data = envelope.data.unwrap_or(Value::Null);
        serde_json::from_value(data).context("Unexpected response shape")
    }
}
