//! tessera-transfer: the chunked transfer and verification protocol
//!
//! - `uploader`: one fragment onto `replicas` nodes under a finality policy
//! - `orchestrator`: source stream → ordered session of committed fragments
//! - `retrieval`: fetch by root and verify before returning bytes
//! - `session` / `manifest`: the session report and the download manifest

pub mod manifest;
pub mod orchestrator;
pub mod retrieval;
pub mod session;
pub mod settings;
pub mod uploader;

pub use manifest::TransferManifest;
pub use orchestrator::{ProgressFn, TransferOrchestrator};
pub use retrieval::RetrievalVerifier;
pub use session::{SessionStatus, TransferSession, UploadRecord};
pub use settings::TransferSettings;
pub use uploader::{FragmentUploader, UploadReceipt};
