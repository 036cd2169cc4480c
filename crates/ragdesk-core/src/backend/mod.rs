//! The four backend operations the ingestion core depends on, and their
//! request/response types.

pub mod http;
pub mod mock;

use std::future::Future;
use std::pin::Pin;

use crate::CoreError;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send + 'a>>;

/// One file upload. `kb_name` is the knowledge base's display name; the server
/// maps it to an existing folder or mints a new server id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub filename: String,
    pub payload: Vec<u8>,
    pub collection: String,
    pub kb_name: String,
    pub ocr: bool,
    pub image_summary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub document_id: String,
    /// Full server id of the knowledge base the file landed in.
    pub kb_server_id: String,
    /// Filename as echoed by the server, when it sends one.
    pub filename: Option<String>,
}

/// A document held by the backend, as listed for one knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbDocumentEntry {
    pub filename: String,
    pub document_id: String,
    pub kb_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub document_id: String,
    pub filename: String,
    pub kb_name: String,
    pub collection: String,
}

impl DeleteRequest {
    pub fn for_entry(entry: &KbDocumentEntry, collection: &str) -> Self {
        Self {
            document_id: entry.document_id.clone(),
            filename: entry.filename.clone(),
            kb_name: entry.kb_id.clone(),
            collection: collection.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteAck {
    pub message: String,
}

/// Backend operations the ingestion core is written against.
pub trait KbBackend: Send + Sync {
    /// Ingest one file into a knowledge base.
    fn upload<'a>(&'a self, request: UploadRequest) -> BackendFuture<'a, UploadReceipt>;

    /// Server ids of the knowledge bases in `collection`.
    fn list_knowledge_bases<'a>(&'a self, collection: &'a str) -> BackendFuture<'a, Vec<String>>;

    fn list_documents<'a>(
        &'a self,
        collection: &'a str,
        kb_id: &'a str,
    ) -> BackendFuture<'a, Vec<KbDocumentEntry>>;

    fn delete_document<'a>(&'a self, request: &'a DeleteRequest) -> BackendFuture<'a, DeleteAck>;
}
