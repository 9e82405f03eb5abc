pub mod backend;
pub mod error;
pub mod events;
pub mod feedback;
pub mod models;
pub mod storage;

pub use backend::{ContractsApi, ProfileApi};
pub use error::{BackendError, DescriptorError, FormError, ModelError, StoreError};
pub use events::{ChannelRequest, InboundMessage, ServerContract, project_snapshot};
pub use feedback::{
    Confirmer, FixedConfirmer, Notice, NoticeLevel, Notifier, RecordingNotifier, TracingNotifier,
};
pub use models::{
    CapturedImage, Contract, ContractForm, ContractId, ContractStatus, ContractUpdate,
    DESCRIPTOR_LEN, FaceDescriptor, ImageFile, Profile, ProfileUpdate, VerificationStatus,
};
pub use storage::{DescriptorStore, FACE_MODELS, FaceModel, MemoryDescriptorStore};
