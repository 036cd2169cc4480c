//! In-memory backend for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{
    BackendFuture, DeleteAck, DeleteRequest, KbBackend, KbDocumentEntry, UploadReceipt,
    UploadRequest,
};
use crate::CoreError;
use crate::kb::KB_ID_DELIMITER;

/// One backend call, as recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Upload {
        filename: String,
        collection: String,
        kb_name: String,
        ocr: bool,
        image_summary: bool,
    },
    ListKnowledgeBases {
        collection: String,
    },
    ListDocuments {
        collection: String,
        kb_id: String,
    },
    Delete {
        document_id: String,
        kb_name: String,
    },
}

#[derive(Debug, Default)]
struct MockState {
    /// Knowledge-base server ids per collection, in creation order.
    knowledge_bases: BTreeMap<String, Vec<String>>,
    /// (collection, entry) for every stored document.
    documents: Vec<(String, KbDocumentEntry)>,
    next_id: u64,
    upload_failures: HashMap<String, String>,
    fail_list_knowledge_bases: Option<String>,
    fail_list_documents: Option<String>,
    fail_delete: Option<String>,
    calls: Vec<MockCall>,
}

/// A stateful stand-in for the document QA service.
///
/// Behaves like the real server where the ingestion core can observe it:
/// uploads go into the first knowledge base whose server id starts with
/// `{name}_`, else mint a `{name}_{8 hex digits}` id. Listings reflect prior
/// uploads and deletes. Failures are injected per filename or for the next call of a kind.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_knowledge_base(self, collection: &str, server_id: &str) -> Self {
        {
            let mut state = self.lock();
            let kbs = state
                .knowledge_bases
                .entry(collection.to_string())
                .or_default();
            if !kbs.iter().any(|id| id == server_id) {
                kbs.push(server_id.to_string());
            }
        }
        self
    }

    pub fn with_document(
        self,
        collection: &str,
        kb_id: &str,
        filename: &str,
        document_id: &str,
    ) -> Self {
        let this = self.with_knowledge_base(collection, kb_id);
        this.lock().documents.push((
            collection.to_string(),
            KbDocumentEntry {
                filename: filename.to_string(),
                document_id: document_id.to_string(),
                kb_id: kb_id.to_string(),
            },
        ));
        this
    }

    /// Every upload of `filename` fails with `message`.
    pub fn fail_upload(&self, filename: &str, message: &str) {
        self.lock()
            .upload_failures
            .insert(filename.to_string(), message.to_string());
    }

    pub fn fail_next_list_knowledge_bases(&self, message: &str) {
        self.lock().fail_list_knowledge_bases = Some(message.to_string());
    }

    pub fn fail_next_list_documents(&self, message: &str) {
        self.lock().fail_list_documents = Some(message.to_string());
    }

    pub fn fail_next_delete(&self, message: &str) {
        self.lock().fail_delete = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Upload { .. }))
    }

    pub fn list_knowledge_bases_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::ListKnowledgeBases { .. }))
    }

    pub fn list_documents_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::ListDocuments { .. }))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Delete { .. }))
    }

    /// Documents currently stored under `kb_id`.
    pub fn documents_in(&self, collection: &str, kb_id: &str) -> Vec<KbDocumentEntry> {
        self.lock()
            .documents
            .iter()
            .filter(|(c, e)| c == collection && e.kb_id == kb_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn do_upload(&self, request: UploadRequest) -> Result<UploadReceipt, CoreError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Upload {
            filename: request.filename.clone(),
            collection: request.collection.clone(),
            kb_name: request.kb_name.clone(),
            ocr: request.ocr,
            image_summary: request.image_summary,
        });
        if let Some(message) = state.upload_failures.get(&request.filename) {
            return Err(CoreError::Transport(message.clone()));
        }
        if request.kb_name.is_empty() {
            return Err(CoreError::Transport("knowledge base name is empty".into()));
        }

        state.next_id += 1;
        let serial = state.next_id;
        let kbs = state
            .knowledge_bases
            .entry(request.collection.clone())
            .or_default();
        let prefix = format!("{}{KB_ID_DELIMITER}", request.kb_name);
        let kb_server_id = match kbs.iter().find(|id| id.starts_with(&prefix)) {
            Some(existing) => existing.clone(),
            None => {
                let minted = format!("{}_{:08x}", request.kb_name, 0xa000_0000_u64 + serial);
                kbs.push(minted.clone());
                minted
            }
        };
        let document_id = format!("{serial:08x}");
        state.documents.push((
            request.collection,
            KbDocumentEntry {
                filename: request.filename.clone(),
                document_id: document_id.clone(),
                kb_id: kb_server_id.clone(),
            },
        ));
        Ok(UploadReceipt {
            document_id,
            kb_server_id,
            filename: Some(request.filename),
        })
    }

    fn do_list_knowledge_bases(&self, collection: &str) -> Result<Vec<String>, CoreError> {
        let mut state = self.lock();
        state.calls.push(MockCall::ListKnowledgeBases {
            collection: collection.to_string(),
        });
        if let Some(message) = state.fail_list_knowledge_bases.take() {
            return Err(CoreError::Transport(message));
        }
        Ok(state
            .knowledge_bases
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    fn do_list_documents(
        &self,
        collection: &str,
        kb_id: &str,
    ) -> Result<Vec<KbDocumentEntry>, CoreError> {
        let mut state = self.lock();
        state.calls.push(MockCall::ListDocuments {
            collection: collection.to_string(),
            kb_id: kb_id.to_string(),
        });
        if let Some(message) = state.fail_list_documents.take() {
            return Err(CoreError::Transport(message));
        }
        Ok(state
            .documents
            .iter()
            .filter(|(c, e)| c == collection && e.kb_id == kb_id)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn do_delete(&self, request: &DeleteRequest) -> Result<DeleteAck, CoreError> {
        let mut state = self.lock();
        state.calls.push(MockCall::Delete {
            document_id: request.document_id.clone(),
            kb_name: request.kb_name.clone(),
        });
        if let Some(message) = state.fail_delete.take() {
            return Err(CoreError::Transport(message));
        }
        let before = state.documents.len();
        state.documents.retain(|(c, e)| {
            !(c == &request.collection
                && e.document_id == request.document_id
                && e.kb_id == request.kb_name)
        });
        if state.documents.len() == before {
            return Err(CoreError::Transport("document id not found".into()));
        }
        Ok(DeleteAck {
            message: format!("deleted {}", request.filename),
        })
    }
}

impl KbBackend for MockBackend {
    fn upload<'a>(&'a self, request: UploadRequest) -> BackendFuture<'a, UploadReceipt> {
        let result = self.do_upload(request);
        Box::pin(async move { result })
    }

    fn list_knowledge_bases<'a>(&'a self, collection: &'a str) -> BackendFuture<'a, Vec<String>> {
        let result = self.do_list_knowledge_bases(collection);
        Box::pin(async move { result })
    }

    fn list_documents<'a>(
        &'a self,
        collection: &'a str,
        kb_id: &'a str,
    ) -> BackendFuture<'a, Vec<KbDocumentEntry>> {
        let result = self.do_list_documents(collection, kb_id);
        Box::pin(async move { result })
    }

    fn delete_document<'a>(&'a self, request: &'a DeleteRequest) -> BackendFuture<'a, DeleteAck> {
        let result = self.do_delete(request);
        Box::pin(async move { result })
    }
}
