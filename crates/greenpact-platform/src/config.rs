use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_MODEL_URL: &str = "http://127.0.0.1:3000/models";
const DEFAULT_DESCRIPTOR_PATH: &str = ".greenpact/face_descriptor.json";
const DEFAULT_APPROVAL_ACK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 8;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub backend_url: String,
    pub websocket_url: String,
    pub access_token: Option<String>,
    pub username: Option<String>,
    pub model_url: String,
    pub face_inference_url: Option<String>,
    pub descriptor_path: PathBuf,
    pub approval_ack_timeout: Duration,
    pub request_timeout: Duration,
    pub reconnect_max_attempts: u32,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend_url = var("GREENPACT_BACKEND_URL").context("GREENPACT_BACKEND_URL is required")?;
        let websocket_url =
            var("GREENPACT_WEBSOCKET_URL").context("GREENPACT_WEBSOCKET_URL is required")?;

        let approval_ack_timeout = Duration::from_millis(parse_or(
            var("GREENPACT_APPROVAL_ACK_TIMEOUT_MS"),
            "GREENPACT_APPROVAL_ACK_TIMEOUT_MS",
            DEFAULT_APPROVAL_ACK_TIMEOUT_MS,
        )?);
        let request_timeout = Duration::from_millis(parse_or(
            var("GREENPACT_REQUEST_TIMEOUT_MS"),
            "GREENPACT_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?);
        let reconnect_max_attempts = parse_or(
            var("GREENPACT_RECONNECT_MAX_ATTEMPTS"),
            "GREENPACT_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?;

        Ok(Self {
            backend_url: backend_url.trim_end_matches('/').to_string(),
            websocket_url: websocket_url.trim_end_matches('/').to_string(),
            access_token: var("GREENPACT_ACCESS_TOKEN"),
            username: var("GREENPACT_USERNAME"),
            model_url: var("GREENPACT_MODEL_URL").unwrap_or_else(|| DEFAULT_MODEL_URL.to_string()),
            face_inference_url: var("GREENPACT_FACE_INFERENCE_URL"),
            descriptor_path: var("GREENPACT_DESCRIPTOR_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DESCRIPTOR_PATH)),
            approval_ack_timeout,
            request_timeout,
            reconnect_max_attempts,
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
        None => Ok(default),
    }
}
