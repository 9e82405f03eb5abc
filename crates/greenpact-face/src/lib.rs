use std::sync::Arc;

use greenpact_core::{
    CapturedImage, DescriptorStore, FaceDescriptor, FaceModel, ModelError, Notice, Notifier,
    StoreError, VerificationStatus,
};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MODEL_LOCATION: &str = "/models";

#[derive(Debug, Clone)]
pub struct FaceConfig {
    pub model_location: String,
    pub match_threshold: f32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            model_location: DEFAULT_MODEL_LOCATION.to_string(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPhase {
    NotLoaded,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoCapture,
    Captured,
    Verifying,
    Matched,
    Rejected,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("face models are not loaded")]
    ModelsNotReady,
    #[error("no image has been captured")]
    NothingCaptured,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face detection failed: {0}")]
    Detection(#[from] ModelError),
    #[error("descriptor comparison produced distance {0}")]
    Comparison(f32),
    #[error("could not persist descriptor: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
struct VerificationSession {
    id: Uuid,
    captured: Option<CapturedImage>,
    status: VerificationStatus,
    distance: Option<f32>,
    verifying: bool,
}

impl VerificationSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            captured: None,
            status: VerificationStatus::Unknown,
            distance: None,
            verifying: false,
        }
    }
}

pub struct FaceVerifier<M, S> {
    model: M,
    store: S,
    notifier: Arc<dyn Notifier>,
    config: FaceConfig,
    phase: ModelPhase,
    enrolled: Option<FaceDescriptor>,
    session: VerificationSession,
}

impl<M, S> FaceVerifier<M, S>
where
    M: FaceModel,
    S: DescriptorStore,
{
    pub fn new(model: M, store: S, notifier: Arc<dyn Notifier>, config: FaceConfig) -> Self {
        Self {
            model,
            store,
            notifier,
            config,
            phase: ModelPhase::NotLoaded,
            enrolled: None,
            session: VerificationSession::new(),
        }
    }

    pub async fn load_models(&mut self) -> Result<(), ModelError> {
        if self.phase == ModelPhase::Ready {
            return Ok(());
        }

        self.phase = ModelPhase::Loading;
        if let Err(err) = self.model.load(&self.config.model_location).await {
            self.phase = ModelPhase::NotLoaded;
            error!("failed to load face models: {err}");
            self.notifier
                .notify(Notice::error("Failed to load face recognition models"));
            return Err(err);
        }

        self.phase = ModelPhase::Ready;
        info!("face models loaded from {}", self.config.model_location);

        self.enrolled = match self.store.load().await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!("ignoring unreadable face descriptor: {err}");
                None
            }
        };
        Ok(())
    }

    pub fn capture(&mut self, image: CapturedImage) {
        self.session.captured = Some(image);
        self.session.status = VerificationStatus::Unknown;
        self.session.distance = None;
        self.session.verifying = false;
    }

    pub async fn verify(&mut self) -> Result<VerificationStatus, VerifyError> {
        let precondition = if self.phase != ModelPhase::Ready {
            Some(VerifyError::ModelsNotReady)
        } else if self.session.captured.is_none() {
            Some(VerifyError::NothingCaptured)
        } else {
            None
        };
        if let Some(err) = precondition {
            self.notifier.notify(Notice::error(
                "Please wait for models to load or capture an image",
            ));
            return Err(err);
        }

        let span = info_span!("face_verification", session = %self.session.id);
        self.session.verifying = true;
        let outcome = self.compare_captured().instrument(span).await;
        self.session.verifying = false;

        match outcome {
            Ok(status) => {
                self.session.status = status;
                Ok(status)
            }
            Err(err) => {
                self.session.status = VerificationStatus::Rejected;
                match &err {
                    VerifyError::NoFaceDetected => {
                        self.notifier
                            .notify(Notice::error("No face detected. Please try again."));
                    }
                    other => {
                        error!("face verification error: {other}");
                        self.notifier
                            .notify(Notice::error("Verification failed. Please try again."));
                    }
                }
                Err(err)
            }
        }
    }

    async fn compare_captured(&mut self) -> Result<VerificationStatus, VerifyError> {
        let image = self
            .session
            .captured
            .as_ref()
            .ok_or(VerifyError::NothingCaptured)?;
        let descriptor = self
            .model
            .describe(image)
            .await?
            .ok_or(VerifyError::NoFaceDetected)?;

        let Some(enrolled) = self.enrolled.as_ref() else {
            self.store.save(&descriptor).await?;
            self.enrolled = Some(descriptor);
            info!("face enrolled");
            self.notifier
                .notify(Notice::success("Face registered successfully!"));
            return Ok(VerificationStatus::Matched);
        };

        let distance = enrolled.euclidean_distance(&descriptor);
        if !distance.is_finite() {
            return Err(VerifyError::Comparison(distance));
        }
        self.session.distance = Some(distance);
        debug!(distance, "face comparison");

        if distance < self.config.match_threshold {
            self.notifier
                .notify(Notice::success("Face verification successful!"));
            Ok(VerificationStatus::Matched)
        } else {
            self.notifier.notify(
                Notice::error("Face doesn't match")
                    .with_description(format!("Distance: {distance:.2}")),
            );
            Ok(VerificationStatus::Rejected)
        }
    }

    pub fn retry(&mut self) {
        self.session = VerificationSession::new();
    }

    pub async fn reset_enrollment(&mut self) -> Result<(), StoreError> {
        self.store.clear().await?;
        self.enrolled = None;
        info!("face enrollment reset");
        self.notifier
            .notify(Notice::success("Face data reset successfully"));
        Ok(())
    }

    pub fn model_phase(&self) -> ModelPhase {
        self.phase
    }

    pub fn models_ready(&self) -> bool {
        self.phase == ModelPhase::Ready
    }

    pub fn session_phase(&self) -> SessionPhase {
        if self.session.verifying {
            return SessionPhase::Verifying;
        }
        match (self.session.status, self.session.captured.is_some()) {
            (VerificationStatus::Matched, _) => SessionPhase::Matched,
            (VerificationStatus::Rejected, _) => SessionPhase::Rejected,
            (VerificationStatus::Unknown, true) => SessionPhase::Captured,
            (VerificationStatus::Unknown, false) => SessionPhase::NoCapture,
        }
    }

    pub fn status(&self) -> VerificationStatus {
        self.session.status
    }

    pub fn last_distance(&self) -> Option<f32> {
        self.session.distance
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    pub fn is_enrolled(&self) -> bool {
        self.enrolled.is_some()
    }
}
