use thiserror::Error;

pub mod backend;
pub mod config_file;
pub mod documents;
pub mod kb;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod state;

// Re-export for convenience
pub use backend::http::{
    ChatAnswer, ChatRequest, ChatSource, CollectionInfo, DEFAULT_API_URL, HttpBackend, ModelInfo,
    ServiceHealth,
};
pub use backend::mock::{MockBackend, MockCall};
pub use backend::{
    DeleteAck, DeleteRequest, KbBackend, KbDocumentEntry, UploadReceipt, UploadRequest,
};
pub use config_file::Settings;
pub use documents::KbDocumentView;
pub use kb::{KbMode, KbTarget, KnowledgeBaseRef, display_name_of};
pub use orchestrator::{
    BatchReport, CompletedUpload, FailedUpload, IngestionOrchestrator, IngestionTarget, StepOutcome,
};
pub use queue::{AddOutcome, FileCandidate, FileId, FileQueue, FileState, QueueCounts, TrackedFile};
pub use resolver::KnowledgeBaseResolver;
pub use state::{AppState, IngestEvent};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A local precondition failed before any network call was made.
    #[error("{0}")]
    Validation(String),
    /// A backend call failed. Carries the server-provided message when there
    /// was one, otherwise the transport error text.
    #[error("{0}")]
    Transport(String),
    #[error("a batch is being processed; wait for it to finish")]
    Busy,
    #[error("no file {0} in the queue")]
    UnknownFile(FileId),
    #[error("file {0} is being uploaded")]
    FileInFlight(FileId),
    #[error("file {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: FileId,
        from: &'static str,
        to: &'static str,
    },
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Transport(e.to_string())
    }
}

/// Per-batch processing switches forwarded to the ingestion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub ocr: bool,
    pub image_summary: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            ocr: false,
            image_summary: true,
        }
    }
}
