use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ModelError, StoreError};
use crate::models::{CapturedImage, FaceDescriptor};

#[async_trait]
pub trait DescriptorStore: Send + Sync {
    async fn load(&self) -> Result<Option<FaceDescriptor>, StoreError>;
    async fn save(&self, descriptor: &FaceDescriptor) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

pub const FACE_MODELS: [&str; 4] = [
    "tiny_face_detector_model",
    "face_landmark_68_model",
    "face_recognition_model",
    "face_expression_model",
];

#[async_trait]
pub trait FaceModel: Send + Sync {
    async fn load(&self, location: &str) -> Result<(), ModelError>;

    /// Detects a single face and returns its descriptor, `None` when no face
    /// is found in the frame.
    async fn describe(&self, image: &CapturedImage) -> Result<Option<FaceDescriptor>, ModelError>;
}

#[async_trait]
impl<T: DescriptorStore + ?Sized> DescriptorStore for Arc<T> {
    async fn load(&self) -> Result<Option<FaceDescriptor>, StoreError> {
        (**self).load().await
    }

    async fn save(&self, descriptor: &FaceDescriptor) -> Result<(), StoreError> {
        (**self).save(descriptor).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}

#[async_trait]
impl<T: FaceModel + ?Sized> FaceModel for Arc<T> {
    async fn load(&self, location: &str) -> Result<(), ModelError> {
        (**self).load(location).await
    }

    async fn describe(&self, image: &CapturedImage) -> Result<Option<FaceDescriptor>, ModelError> {
        (**self).describe(image).await
    }
}

#[derive(Default)]
pub struct MemoryDescriptorStore {
    slot: std::sync::Mutex<Option<FaceDescriptor>>,
}

impl MemoryDescriptorStore {
    pub fn with_descriptor(descriptor: FaceDescriptor) -> Self {
        Self {
            slot: std::sync::Mutex::new(Some(descriptor)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<FaceDescriptor>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DescriptorStore for MemoryDescriptorStore {
    async fn load(&self) -> Result<Option<FaceDescriptor>, StoreError> {
        Ok(self.slot().clone())
    }

    async fn save(&self, descriptor: &FaceDescriptor) -> Result<(), StoreError> {
        *self.slot() = Some(descriptor.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}
