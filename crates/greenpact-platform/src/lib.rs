pub mod config;
pub mod descriptor_file;
pub mod face_model;
pub mod http;

pub use config::ClientConfig;
pub use descriptor_file::FileDescriptorStore;
pub use face_model::RemoteFaceModel;
pub use http::HttpBackend;
