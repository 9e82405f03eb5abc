use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BackendError;
use crate::models::{ContractId, ContractUpdate, Profile, ProfileUpdate};

#[async_trait]
pub trait ContractsApi: Send + Sync {
    async fn update_contract(
        &self,
        contract_id: &ContractId,
        update: &ContractUpdate,
    ) -> Result<Value, BackendError>;

    async fn delete_contract(&self, contract_id: &ContractId) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn get_profile(&self, username: &str) -> Result<Profile, BackendError>;
    async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, BackendError>;
}

#[async_trait]
impl<T: ContractsApi + ?Sized> ContractsApi for Arc<T> {
    async fn update_contract(
        &self,
        contract_id: &ContractId,
        update: &ContractUpdate,
    ) -> Result<Value, BackendError> {
        (**self).update_contract(contract_id, update).await
    }

    async fn delete_contract(&self, contract_id: &ContractId) -> Result<(), BackendError> {
        (**self).delete_contract(contract_id).await
    }
}

#[async_trait]
impl<T: ProfileApi + ?Sized> ProfileApi for Arc<T> {
    async fn get_profile(&self, username: &str) -> Result<Profile, BackendError> {
        (**self).get_profile(username).await
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, BackendError> {
        (**self).update_profile(update).await
    }
}
