// DoodStream API 模块

pub mod client;
pub mod credential;
pub mod types;

pub use client::{
    ApiClient, UploadTransport, DEFAULT_API_BASE, DEFAULT_USER_AGENT, DISCOVERY_TIMEOUT_SECS,
    UPLOAD_TIMEOUT_SECS,
};
pub use credential::{ApiCredential, MIN_CREDENTIAL_LEN};
pub use types::{
    CallKind, EndpointInfo, TransportError, TransportErrorKind, UploadResponse,
    UploadServerResponse, UploadedFileInfo,
};
