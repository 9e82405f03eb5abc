use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use greenpact_core::{
    BackendError, ContractId, ContractUpdate, ContractsApi, Profile, ProfileApi, ProfileUpdate,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ProfileEnvelope {
    data: Profile,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn json_body(response: Response) -> Result<Value, BackendError> {
        let body = response
            .text()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| BackendError::Decode(err.to_string()))
    }
}

#[async_trait]
impl ContractsApi for HttpBackend {
    async fn update_contract(
        &self,
        contract_id: &ContractId,
        update: &ContractUpdate,
    ) -> Result<Value, BackendError> {
        debug!(%contract_id, "updating contract");
        let request = self
            .client
            .put(self.url(&format!("contracts/{contract_id}/")))
            .json(update);
        let response = self.execute(request).await?;
        Self::json_body(response).await
    }

    async fn delete_contract(&self, contract_id: &ContractId) -> Result<(), BackendError> {
        debug!(%contract_id, "deleting contract");
        let request = self
            .client
            .delete(self.url(&format!("contracts/{contract_id}/")));
        self.execute(request).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileApi for HttpBackend {
    async fn get_profile(&self, username: &str) -> Result<Profile, BackendError> {
        let request = self
            .client
            .get(self.url(&format!("user/profile/{username}/")));
        let body = Self::json_body(self.execute(request).await?).await?;
        let envelope: ProfileEnvelope =
            serde_json::from_value(body).map_err(|err| BackendError::Decode(err.to_string()))?;

        let mut profile = envelope.data;
        if profile.username.is_none() {
            profile.username = Some(username.to_string());
        }
        Ok(profile)
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, BackendError> {
        let mut form = Form::new();
        for (name, value) in update.fields {
            form = form.text(name, value);
        }
        if let Some(image) = update.qr_code_image {
            let part = Part::bytes(image.bytes)
                .file_name(image.file_name)
                .mime_str(&image.content_type)
                .map_err(|err| BackendError::Transport(err.to_string()))?;
            form = form.part("qr_code_image", part);
        }

        let request = self.client.put(self.url("user/profile/")).multipart(form);
        let body = Self::json_body(self.execute(request).await?).await?;
        serde_json::from_value(body).map_err(|err| BackendError::Decode(err.to_string()))
    }
}
