//! The application state root.
//!
//! [`AppState`] is the single owner of every piece of ingestion state. Front
//! ends read it through accessors and change it only through the methods
//! below, which refuse to touch the selection, the options or the queue while
//! a batch is being processed.

use crate::backend::{DeleteAck, KbBackend, KbDocumentEntry, UploadReceipt, UploadRequest};
use crate::documents::KbDocumentView;
use crate::kb::{KbMode, KnowledgeBaseRef};
use crate::orchestrator::{BatchReport, IngestionOrchestrator, StepOutcome};
use crate::queue::{AddOutcome, FileCandidate, FileId, FileQueue, TrackedFile};
use crate::resolver::KnowledgeBaseResolver;
use crate::{CoreError, ProcessingOptions};

/// Progress notifications emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    FileStarted {
        file_id: FileId,
        filename: String,
        index: usize,
        total: usize,
    },
    FileCompleted {
        file_id: FileId,
        filename: String,
        receipt: UploadReceipt,
        index: usize,
        total: usize,
    },
    FileFailed {
        file_id: FileId,
        filename: String,
        message: String,
        index: usize,
        total: usize,
    },
    DocumentsRefreshed {
        kb_id: String,
        count: usize,
    },
    /// A refresh failed; the previous document list is still shown.
    DocumentsStale {
        kb_id: String,
        message: String,
    },
    /// The batch minted a new knowledge base; the listing is re-fetched.
    KnowledgeBaseCreated {
        server_id: String,
    },
    BatchComplete {
        completed: usize,
        failed: usize,
    },
}

#[derive(Debug, Default)]
pub struct AppState {
    collection: Option<String>,
    options: ProcessingOptions,
    queue: FileQueue,
    resolver: KnowledgeBaseResolver,
    documents: KbDocumentView,
    batch: Option<IngestionOrchestrator>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ProcessingOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn options(&self) -> ProcessingOptions {
        self.options
    }

    pub fn queue(&self) -> &FileQueue {
        &self.queue
    }

    pub fn resolver(&self) -> &KnowledgeBaseResolver {
        &self.resolver
    }

    pub fn knowledge_bases(&self) -> Vec<KnowledgeBaseRef> {
        self.resolver.knowledge_bases()
    }

    pub fn documents(&self) -> &KbDocumentView {
        &self.documents
    }

    pub fn batch(&self) -> Option<&IngestionOrchestrator> {
        self.batch.as_ref()
    }

    pub fn is_processing(&self) -> bool {
        self.batch.is_some()
    }

    fn ensure_idle(&self) -> Result<(), CoreError> {
        if self.is_processing() {
            return Err(CoreError::Busy);
        }
        Ok(())
    }

    fn require_collection(&self) -> Result<String, CoreError> {
        self.collection
            .clone()
            .ok_or_else(|| CoreError::Validation("select a collection first".to_string()))
    }

    // --- selection ---

    /// Switch collections. Invalidates the resolved target and the cached
    /// documents, then lists the new collection's knowledge bases.
    pub async fn select_collection<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
        collection: Option<String>,
    ) -> Result<(), CoreError> {
        self.ensure_idle()?;
        let collection = collection
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if collection != self.collection {
            tracing::debug!(collection = ?collection, "collection changed");
            self.resolver.set_collection(collection.clone());
            self.documents.clear();
            self.collection = collection;
        }
        if self.collection.is_some() {
            self.refresh_knowledge_bases(backend).await?;
        }
        Ok(())
    }

    /// Re-fetch the knowledge-base listing. A failed listing is recorded on
    /// the resolver, not returned, and leaves the document view as it was.
    pub async fn refresh_knowledge_bases<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
    ) -> Result<(), CoreError> {
        self.ensure_idle()?;
        let collection = self.require_collection()?;
        let listing = backend.list_knowledge_bases(&collection).await;
        let listed = listing.is_ok();
        self.resolver.apply_listing(listing);
        if listed {
            self.sync_documents(backend).await;
        }
        Ok(())
    }

    pub async fn set_kb_mode<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
        mode: KbMode,
    ) -> Result<(), CoreError> {
        self.ensure_idle()?;
        self.resolver.set_mode(mode);
        self.sync_documents(backend).await;
        Ok(())
    }

    pub async fn select_knowledge_base<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
        server_id: &str,
    ) -> Result<(), CoreError> {
        self.ensure_idle()?;
        self.resolver.select(server_id)?;
        self.sync_documents(backend).await;
        Ok(())
    }

    /// Update the create-mode name. A name matching an existing knowledge
    /// base loads that knowledge base's documents.
    pub async fn set_kb_name<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
        name: &str,
    ) -> Result<(), CoreError> {
        self.ensure_idle()?;
        self.resolver.set_typed_name(name);
        self.sync_documents(backend).await;
        Ok(())
    }

    /// Point the document view at the resolver's current target, fetching
    /// only when the target changed.
    async fn sync_documents<B: KbBackend + ?Sized>(&mut self, backend: &B) {
        let target = self.resolver.documents_target().map(str::to_string);
        match (target, self.collection.clone()) {
            (Some(kb_id), Some(collection)) => {
                if self.documents.kb_id() == Some(kb_id.as_str()) && self.documents.is_loaded() {
                    return;
                }
                self.documents.clear();
                self.documents.refresh(backend, &collection, &kb_id).await;
            }
            _ => {
                if self.documents.kb_id().is_some() || self.documents.is_loaded() {
                    self.documents.clear();
                }
            }
        }
    }

    // --- queue ---

    pub fn add_files(
        &mut self,
        candidates: impl IntoIterator<Item = FileCandidate>,
    ) -> Result<AddOutcome, CoreError> {
        self.ensure_idle()?;
        let outcome = self.queue.add(candidates);
        if !outcome.rejected.is_empty() {
            tracing::warn!(
                rejected = ?outcome.rejected,
                "only PDF files can be uploaded; other files were skipped"
            );
        }
        Ok(outcome)
    }

    pub fn remove_file(&mut self, id: FileId) -> Result<TrackedFile, CoreError> {
        self.ensure_idle()?;
        self.queue.remove(id)
    }

    pub fn clear_files(&mut self) -> Result<(), CoreError> {
        self.ensure_idle()?;
        self.queue.clear();
        Ok(())
    }

    pub fn set_options(&mut self, options: ProcessingOptions) -> Result<(), CoreError> {
        self.ensure_idle()?;
        self.options = options;
        Ok(())
    }

    // --- batch stepping ---

    /// Resolve the target and start a batch over the current Pending files.
    pub fn begin_batch(&mut self) -> Result<(), CoreError> {
        self.ensure_idle()?;
        let orchestrator = IngestionOrchestrator::confirm_batch(
            &self.queue,
            self.collection.as_deref(),
            self.resolver.resolve(),
            self.options,
        )?;
        self.batch = Some(orchestrator);
        Ok(())
    }

    pub fn next_upload(&mut self) -> Result<Option<(FileId, UploadRequest)>, CoreError> {
        let batch = self.batch.as_mut().ok_or_else(no_batch)?;
        batch.next_upload(&mut self.queue)
    }

    /// Record an upload result. The first success of a create-mode batch
    /// moves the resolver onto the newly minted knowledge base.
    pub fn complete_upload(
        &mut self,
        result: Result<UploadReceipt, CoreError>,
    ) -> Result<StepOutcome, CoreError> {
        let batch = self.batch.as_mut().ok_or_else(no_batch)?;
        let first_created = batch.report().created_kb.is_none();
        let outcome = batch.record_outcome(&mut self.queue, result)?;
        if first_created && let Some(server_id) = batch.report().created_kb.clone() {
            self.resolver.adopt_created(&server_id);
        }
        Ok(outcome)
    }

    /// End a batch whose files have all been processed.
    pub fn finish_batch(&mut self) -> Result<BatchReport, CoreError> {
        match self.batch.take() {
            Some(batch) if batch.is_finished() => Ok(batch.into_report()),
            Some(batch) => {
                self.batch = Some(batch);
                Err(CoreError::Busy)
            }
            None => Err(no_batch()),
        }
    }

    /// Upload every Pending file, one at a time, into the resolved knowledge
    /// base. Per-file failures are recorded in the report, not returned.
    pub async fn confirm_batch<B, F>(
        &mut self,
        backend: &B,
        mut on_event: F,
    ) -> Result<BatchReport, CoreError>
    where
        B: KbBackend + ?Sized,
        F: FnMut(&IngestEvent),
    {
        self.begin_batch()?;
        if let Err(e) = self.drive_batch(backend, &mut on_event).await {
            tracing::error!(error = %e, "batch aborted");
            self.batch = None;
            return Err(e);
        }
        let report = self.finish_batch()?;

        if let Some(server_id) = &report.created_kb {
            on_event(&IngestEvent::KnowledgeBaseCreated {
                server_id: server_id.clone(),
            });
            self.refresh_knowledge_bases(backend).await?;
        }
        tracing::info!(
            completed = report.completed.len(),
            failed = report.failures.len(),
            "batch complete"
        );
        on_event(&IngestEvent::BatchComplete {
            completed: report.completed.len(),
            failed: report.failures.len(),
        });
        Ok(report)
    }

    async fn drive_batch<B, F>(&mut self, backend: &B, on_event: &mut F) -> Result<(), CoreError>
    where
        B: KbBackend + ?Sized,
        F: FnMut(&IngestEvent),
    {
        while let Some((file_id, request)) = self.next_upload()? {
            let (index, total) = self
                .batch
                .as_ref()
                .map(|b| (b.done() + 1, b.total()))
                .unwrap_or_default();
            let filename = request.filename.clone();
            on_event(&IngestEvent::FileStarted {
                file_id,
                filename: filename.clone(),
                index,
                total,
            });

            let result = backend.upload(request).await;
            match self.complete_upload(result)? {
                StepOutcome::Completed {
                    file_id,
                    receipt,
                    refresh_kb,
                } => {
                    on_event(&IngestEvent::FileCompleted {
                        file_id,
                        filename,
                        receipt,
                        index,
                        total,
                    });
                    self.reload_documents(backend, &refresh_kb, on_event).await;
                }
                StepOutcome::Failed { file_id, message } => {
                    on_event(&IngestEvent::FileFailed {
                        file_id,
                        filename,
                        message,
                        index,
                        total,
                    });
                }
            }
        }
        Ok(())
    }

    async fn reload_documents<B, F>(&mut self, backend: &B, kb_id: &str, on_event: &mut F)
    where
        B: KbBackend + ?Sized,
        F: FnMut(&IngestEvent),
    {
        let Some(collection) = self.collection.clone() else {
            return;
        };
        if self.documents.kb_id().is_some_and(|current| current != kb_id) {
            self.documents.clear();
        }
        if self.documents.refresh(backend, &collection, kb_id).await {
            on_event(&IngestEvent::DocumentsRefreshed {
                kb_id: kb_id.to_string(),
                count: self.documents.entries().len(),
            });
        } else {
            on_event(&IngestEvent::DocumentsStale {
                kb_id: kb_id.to_string(),
                message: self.documents.refresh_error().unwrap_or_default().to_string(),
            });
        }
    }

    // --- documents ---

    /// Manually re-fetch the documents of the current target.
    pub async fn refresh_documents<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
    ) -> Result<(), CoreError> {
        let collection = self.require_collection()?;
        let kb_id = self
            .resolver
            .documents_target()
            .map(str::to_string)
            .ok_or_else(|| CoreError::Validation("no knowledge base selected".to_string()))?;
        if self.documents.kb_id().is_some_and(|current| current != kb_id) {
            self.documents.clear();
        }
        if !self.documents.refresh(backend, &collection, &kb_id).await {
            let message = self.documents.refresh_error().unwrap_or_default();
            return Err(CoreError::Transport(message.to_string()));
        }
        Ok(())
    }

    pub fn request_delete(&mut self, entry: &KbDocumentEntry) -> Result<(), CoreError> {
        self.documents.request_delete(entry)
    }

    pub fn cancel_delete(&mut self) {
        self.documents.cancel_delete();
    }

    pub async fn confirm_delete<B: KbBackend + ?Sized>(
        &mut self,
        backend: &B,
    ) -> Result<DeleteAck, CoreError> {
        let collection = self.require_collection()?;
        self.documents.confirm_delete(backend, &collection).await
    }
}

fn no_batch() -> CoreError {
    CoreError::Validation("no batch is being processed".to_string())
}
