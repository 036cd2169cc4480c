//! Cached listing of the documents in the selected knowledge base, and the
//! two-step delete flow.

use crate::CoreError;
use crate::backend::{DeleteAck, DeleteRequest, KbBackend, KbDocumentEntry};

#[derive(Debug, Clone, Default)]
pub struct KbDocumentView {
    kb_id: Option<String>,
    entries: Vec<KbDocumentEntry>,
    refresh_error: Option<String>,
    delete_error: Option<String>,
    pending_delete: Option<KbDocumentEntry>,
    loaded: bool,
}

impl KbDocumentView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Knowledge base the cached entries belong to.
    pub fn kb_id(&self) -> Option<&str> {
        self.kb_id.as_deref()
    }

    pub fn entries(&self) -> &[KbDocumentEntry] {
        &self.entries
    }

    /// Set when the last refresh failed; the entries are then last-known-good.
    pub fn refresh_error(&self) -> Option<&str> {
        self.refresh_error.as_deref()
    }

    pub fn delete_error(&self) -> Option<&str> {
        self.delete_error.as_deref()
    }

    pub fn pending_delete(&self) -> Option<&KbDocumentEntry> {
        self.pending_delete.as_ref()
    }

    /// True once a listing for `kb_id` has been received.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Forget everything, e.g. when the collection changes.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Install a listing result for `kb_id`. Success replaces the list
    /// wholesale; failure keeps the previous list and flags it stale.
    pub fn apply_refresh(&mut self, kb_id: &str, result: Result<Vec<KbDocumentEntry>, CoreError>) {
        match result {
            Ok(entries) => {
                tracing::debug!(kb = %kb_id, documents = entries.len(), "document list refreshed");
                self.kb_id = Some(kb_id.to_string());
                self.entries = entries;
                self.refresh_error = None;
                self.loaded = true;
                if let Some(pending) = &self.pending_delete
                    && !self.entries.contains(pending)
                {
                    self.pending_delete = None;
                }
            }
            Err(e) => {
                tracing::warn!(kb = %kb_id, error = %e, "document list refresh failed");
                self.refresh_error = Some(e.to_string());
            }
        }
    }

    /// Fetch the listing for `kb_id` and apply it. Returns whether it succeeded.
    pub async fn refresh<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
        collection: &str,
        kb_id: &str,
    ) -> bool {
        let result = backend.list_documents(collection, kb_id).await;
        let ok = result.is_ok();
        self.apply_refresh(kb_id, result);
        ok
    }

    /// First step of a delete: remember the entry awaiting confirmation.
    pub fn request_delete(&mut self, entry: &KbDocumentEntry) -> Result<(), CoreError> {
        if !self.entries.contains(entry) {
            return Err(CoreError::Validation(format!(
                "'{}' is not in the current document list",
                entry.filename
            )));
        }
        self.delete_error = None;
        self.pending_delete = Some(entry.clone());
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    /// Second step: issue the delete. On success the owning knowledge base is
    /// refreshed once; on failure the list is left as it was and the error is
    /// kept for display.
    pub async fn confirm_delete<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
        collection: &str,
    ) -> Result<DeleteAck, CoreError> {
        let entry = self.pending_delete.take().ok_or_else(|| {
            CoreError::Validation("no delete is awaiting confirmation".to_string())
        })?;
        let request = DeleteRequest::for_entry(&entry, collection);
        match backend.delete_document(&request).await {
            Ok(ack) => {
                tracing::info!(
                    document_id = %entry.document_id,
                    kb = %entry.kb_id,
                    "document deleted"
                );
                self.delete_error = None;
                self.refresh(backend, collection, &entry.kb_id).await;
                Ok(ack)
            }
            Err(e) => {
                tracing::warn!(document_id = %entry.document_id, error = %e, "delete failed");
                self.delete_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
