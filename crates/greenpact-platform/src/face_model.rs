use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use greenpact_core::{CapturedImage, FACE_MODELS, FaceDescriptor, FaceModel, ModelError};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct WeightGroup {
    paths: Vec<String>,
    #[serde(default)]
    weights: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    descriptor: Option<Vec<f32>>,
}

pub struct RemoteFaceModel {
    client: Client,
    inference_url: Option<String>,
}

impl RemoteFaceModel {
    pub fn new(inference_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            inference_url,
        })
    }

    async fn fetch_manifest(&self, location: &str, name: &str) -> Result<Vec<u8>, ModelError> {
        let file = format!("{name}-weights_manifest.json");
        let missing = |reason: String| ModelError::Missing {
            name: name.to_string(),
            reason,
        };

        if location.starts_with("http://") || location.starts_with("https://") {
            let url = format!("{}/{file}", location.trim_end_matches('/'));
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|err| missing(err.to_string()))?;
            if !response.status().is_success() {
                return Err(missing(format!("{url} returned {}", response.status())));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|err| missing(err.to_string()))?;
            Ok(bytes.to_vec())
        } else {
            let path = std::path::Path::new(location).join(&file);
            tokio::fs::read(&path)
                .await
                .map_err(|err| missing(format!("{}: {err}", path.display())))
        }
    }
}

#[async_trait]
impl FaceModel for RemoteFaceModel {
    async fn load(&self, location: &str) -> Result<(), ModelError> {
        for name in FACE_MODELS {
            let bytes = self.fetch_manifest(location, name).await?;
            let groups: Vec<WeightGroup> =
                serde_json::from_slice(&bytes).map_err(|err| ModelError::Invalid {
                    name: name.to_string(),
                    reason: err.to_string(),
                })?;
            let shards: usize = groups.iter().map(|group| group.paths.len()).sum();
            if shards == 0 {
                return Err(ModelError::Invalid {
                    name: name.to_string(),
                    reason: "manifest lists no weight shards".to_string(),
                });
            }
            let tensors: usize = groups.iter().map(|group| group.weights.len()).sum();
            debug!(model = name, shards, tensors, "model manifest loaded");
        }
        info!("face model manifests loaded from {location}");
        Ok(())
    }

    async fn describe(&self, image: &CapturedImage) -> Result<Option<FaceDescriptor>, ModelError> {
        let Some(url) = self.inference_url.as_deref() else {
            return Err(ModelError::Unavailable(
                "no inference endpoint configured".to_string(),
            ));
        };

        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)
            .map_err(|err| ModelError::Inference(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .multipart(Form::new().part("image", part))
            .send()
            .await
            .map_err(|err| ModelError::Inference(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ModelError::Inference(format!(
                "inference endpoint returned {}",
                response.status()
            )));
        }

        let body: DescribeResponse = response
            .json()
            .await
            .map_err(|err| ModelError::Inference(err.to_string()))?;
        body.descriptor
            .map(FaceDescriptor::try_from)
            .transpose()
            .map_err(|err| ModelError::Inference(err.to_string()))
    }
}
