mod approval;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use greenpact_core::{
    ChannelRequest, Confirmer, ContractForm, ContractId, ContractStatus, ContractUpdate,
    ContractsApi, ImageFile, Notice, Notifier, ProfileApi, ProfileUpdate, VerificationStatus,
};
use greenpact_realtime::RealtimeLink;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalTracker, InFlight};

pub const DEFAULT_APPROVAL_ACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DELETE_PROMPT: &str = "Are you sure you want to delete this contract?";

#[derive(Debug, Clone, Copy)]
pub struct OpsConfig {
    pub approval_ack_timeout: Duration,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            approval_ack_timeout: DEFAULT_APPROVAL_ACK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Cancelled,
    Deleted,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("face verification must succeed before approving")]
    VerificationRequired,
    #[error("a payment QR code must be uploaded before approving")]
    QrCodeRequired,
    #[error("contract {0} already has an approval in flight")]
    AlreadyApproving(ContractId),
    #[error("contract channel is not open")]
    ChannelUnavailable,
}

#[derive(Debug, Default)]
struct QrState {
    existing: Option<String>,
    uploaded: bool,
    uploading: bool,
}

pub struct ContractOperations<L> {
    link: L,
    contracts: Arc<dyn ContractsApi>,
    profiles: Arc<dyn ProfileApi>,
    notifier: Arc<dyn Notifier>,
    confirmer: Arc<dyn Confirmer>,
    deleting: InFlight,
    approving: InFlight,
    qr: RwLock<QrState>,
    tracker: ApprovalTracker,
}

impl<L: RealtimeLink> ContractOperations<L> {
    /// Must be called inside a tokio runtime; approvals are settled by a
    /// background task that lives as long as the returned value.
    pub fn new(
        link: L,
        contracts: Arc<dyn ContractsApi>,
        profiles: Arc<dyn ProfileApi>,
        notifier: Arc<dyn Notifier>,
        confirmer: Arc<dyn Confirmer>,
        config: OpsConfig,
    ) -> Self {
        let approving = InFlight::default();
        let tracker = ApprovalTracker::spawn(
            link.subscribe(),
            approving.clone(),
            notifier.clone(),
            config.approval_ack_timeout,
        );
        Self {
            link,
            contracts,
            profiles,
            notifier,
            confirmer,
            deleting: InFlight::default(),
            approving,
            qr: RwLock::new(QrState::default()),
            tracker,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub async fn update(
        &self,
        contract_id: &ContractId,
        form: &ContractForm,
        delivery_date: NaiveDate,
        current_status: ContractStatus,
    ) -> bool {
        let update = ContractUpdate::compose(form, delivery_date, current_status);

        if !self.link.send(ChannelRequest::UpdateContract {
            contract_id: contract_id.clone(),
            data: update.clone(),
        }) {
            debug!(%contract_id, "channel closed, update goes through backend only");
        }

        match self.contracts.update_contract(contract_id, &update).await {
            Ok(_) => {
                info!(%contract_id, "contract updated");
                self.notifier.notify(
                    Notice::success("Contract Updated")
                        .with_description("Contract has been successfully updated"),
                );
                true
            }
            Err(err) => {
                warn!(%contract_id, error = %err, "contract update failed");
                self.notifier.notify(
                    Notice::error("Update Failed")
                        .with_description("There was an error updating the contract"),
                );
                false
            }
        }
    }

    pub async fn delete(&self, contract_id: &ContractId) -> DeleteOutcome {
        if !self.confirmer.confirm(DELETE_PROMPT).await {
            debug!(%contract_id, "delete cancelled");
            return DeleteOutcome::Cancelled;
        }

        self.deleting.write().await.insert(contract_id.clone());

        if !self.link.send(ChannelRequest::DeleteContract {
            contract_id: contract_id.clone(),
        }) {
            debug!(%contract_id, "channel closed, delete goes through backend only");
        }
        let result = self.contracts.delete_contract(contract_id).await;

        self.deleting.write().await.remove(contract_id);

        match result {
            Ok(()) => {
                info!(%contract_id, "contract deleted");
                self.notifier.notify(
                    Notice::success("Contract Deleted")
                        .with_description("Contract has been successfully deleted"),
                );
                DeleteOutcome::Deleted
            }
            Err(err) => {
                warn!(%contract_id, error = %err, "contract delete failed");
                self.notifier.notify(
                    Notice::error("Delete Failed")
                        .with_description("There was an error deleting the contract"),
                );
                DeleteOutcome::Failed
            }
        }
    }

    pub async fn approve(
        &self,
        contract_id: &ContractId,
        verification: VerificationStatus,
        qr_code_uploaded: bool,
        on_success: impl FnOnce() + Send,
    ) -> Result<(), ApprovalError> {
        if !verification.is_matched() {
            self.notifier
                .notify(Notice::error("Please complete verification first"));
            return Err(ApprovalError::VerificationRequired);
        }
        if !qr_code_uploaded && !self.has_existing_qr_code().await {
            self.notifier
                .notify(Notice::error("Please upload QR code first"));
            return Err(ApprovalError::QrCodeRequired);
        }

        let mut approving = self.approving.write().await;
        if approving.contains(contract_id) {
            return Err(ApprovalError::AlreadyApproving(contract_id.clone()));
        }
        // Tracked before sending so an immediate reply finds its approval.
        approving.insert(contract_id.clone());
        self.tracker.track(contract_id.clone()).await;
        if !self.link.send(ChannelRequest::ApproveContract {
            contract_id: contract_id.clone(),
        }) {
            self.tracker.untrack(contract_id).await;
            approving.remove(contract_id);
            warn!(%contract_id, "approval not sent, channel is not open");
            self.notifier.notify(
                Notice::error("Approval Failed")
                    .with_description("Not connected to the contract server"),
            );
            return Err(ApprovalError::ChannelUnavailable);
        }
        drop(approving);

        info!(%contract_id, "approval sent");
        self.notifier.notify(
            Notice::success("Contract Approved")
                .with_description("Contract has been successfully approved"),
        );
        on_success();
        Ok(())
    }

    pub async fn upload_qr_code(&self, image: ImageFile) -> bool {
        self.qr.write().await.uploading = true;
        let result = self
            .profiles
            .update_profile(ProfileUpdate::qr_code(image))
            .await;

        let mut qr = self.qr.write().await;
        qr.uploading = false;
        match result {
            Ok(profile) => {
                qr.uploaded = true;
                if profile.has_qr_code() {
                    qr.existing = profile.qr_code_image;
                }
                info!("payment QR code uploaded");
                self.notifier
                    .notify(Notice::success("QR code uploaded successfully"));
                true
            }
            Err(err) => {
                warn!(error = %err, "QR code upload failed");
                self.notifier
                    .notify(Notice::error("Failed to upload QR code"));
                false
            }
        }
    }

    pub async fn refresh_profile(&self, username: &str) -> bool {
        match self.profiles.get_profile(username).await {
            Ok(profile) => {
                let existing = profile
                    .has_qr_code()
                    .then_some(profile.qr_code_image)
                    .flatten();
                debug!(username, has_qr_code = existing.is_some(), "profile loaded");
                self.qr.write().await.existing = existing;
                true
            }
            Err(err) => {
                warn!(username, error = %err, "could not load profile");
                false
            }
        }
    }

    pub async fn existing_qr_code(&self) -> Option<String> {
        self.qr.read().await.existing.clone()
    }

    pub async fn has_existing_qr_code(&self) -> bool {
        self.qr.read().await.existing.is_some()
    }

    pub async fn qr_code_uploaded(&self) -> bool {
        self.qr.read().await.uploaded
    }

    pub async fn qr_code_uploading(&self) -> bool {
        self.qr.read().await.uploading
    }

    pub async fn reset_qr_code(&self) {
        self.qr.write().await.uploaded = false;
    }

    pub async fn deleting_ids(&self) -> BTreeSet<ContractId> {
        self.deleting.read().await.clone()
    }

    pub async fn approving_ids(&self) -> BTreeSet<ContractId> {
        self.approving.read().await.clone()
    }

    pub async fn is_deleting(&self, contract_id: &ContractId) -> bool {
        self.deleting.read().await.contains(contract_id)
    }

    pub async fn is_approving(&self, contract_id: &ContractId) -> bool {
        self.approving.read().await.contains(contract_id)
    }
}
