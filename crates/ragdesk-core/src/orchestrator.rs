//! Step-wise driver for one confirmed upload batch.
//!
//! The orchestrator never performs I/O. The caller asks for the next upload,
//! awaits the backend, and hands the result back, so at most one upload is in
//! flight and tests can step a batch deterministically.

use std::collections::VecDeque;

use crate::backend::{UploadReceipt, UploadRequest};
use crate::kb::KbTarget;
use crate::queue::{FileId, FileQueue, FileState};
use crate::{CoreError, ProcessingOptions};

/// Resolved destination and options for a batch; fixed once the batch starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionTarget {
    pub collection: String,
    pub kb: KbTarget,
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub file_id: FileId,
    pub filename: String,
    pub document_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub file_id: FileId,
    pub filename: String,
    pub message: String,
}

/// What happened to a batch, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: Vec<CompletedUpload>,
    pub failures: Vec<FailedUpload>,
    /// Server id minted for a create-mode batch by its first successful upload.
    pub created_kb: Option<String>,
    /// Files that left the Pending state or the queue before their turn.
    pub skipped: usize,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of recording one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed {
        file_id: FileId,
        receipt: UploadReceipt,
        /// Knowledge base whose document listing should be re-fetched.
        refresh_kb: String,
    },
    Failed {
        file_id: FileId,
        message: String,
    },
}

#[derive(Debug)]
pub struct IngestionOrchestrator {
    target: IngestionTarget,
    work: VecDeque<FileId>,
    /// The file whose upload is in flight, with its name.
    current: Option<(FileId, String)>,
    total: usize,
    report: BatchReport,
}

impl IngestionOrchestrator {
    /// Check the batch preconditions and snapshot the Pending files.
    ///
    /// Fails with a validation error, before any network call, when there is
    /// nothing pending, no usable knowledge base name, or no collection.
    pub fn confirm_batch(
        queue: &FileQueue,
        collection: Option<&str>,
        kb: Result<KbTarget, CoreError>,
        options: ProcessingOptions,
    ) -> Result<Self, CoreError> {
        let work: VecDeque<FileId> = queue.pending_ids().into();
        if work.is_empty() {
            return Err(CoreError::Validation(
                "add at least one PDF before uploading".to_string(),
            ));
        }
        let kb = kb?;
        if kb.upload_name().trim().is_empty() {
            return Err(CoreError::Validation(
                "knowledge base name is empty".to_string(),
            ));
        }
        let collection = match collection.map(str::trim) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => {
                return Err(CoreError::Validation(
                    "select a collection first".to_string(),
                ));
            }
        };

        tracing::info!(
            files = work.len(),
            collection = %collection,
            kb = %kb,
            "batch confirmed"
        );
        Ok(Self {
            total: work.len(),
            target: IngestionTarget {
                collection,
                kb,
                options,
            },
            work,
            current: None,
            report: BatchReport::default(),
        })
    }

    pub fn target(&self) -> &IngestionTarget {
        &self.target
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Uploads recorded so far, successful or not.
    pub fn done(&self) -> usize {
        self.report.attempted()
    }

    pub fn current(&self) -> Option<FileId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    pub fn report(&self) -> &BatchReport {
        &self.report
    }

    /// Claim the next Pending file and build its upload request.
    ///
    /// Returns `Ok(None)` once the work list is exhausted. Files removed from
    /// the queue since confirmation are skipped.
    pub fn next_upload(
        &mut self,
        queue: &mut FileQueue,
    ) -> Result<Option<(FileId, UploadRequest)>, CoreError> {
        if let Some((id, _)) = &self.current {
            return Err(CoreError::FileInFlight(*id));
        }
        while let Some(id) = self.work.pop_front() {
            let filename = match queue.get(id) {
                Some(file) if file.state() == &FileState::Pending => file.name().to_string(),
                _ => {
                    tracing::debug!(file = %id, "skipping file no longer pending");
                    self.report.skipped += 1;
                    continue;
                }
            };
            let payload = queue.claim(id)?;
            tracing::debug!(file = %id, filename = %filename, "uploading");
            let request = UploadRequest {
                filename: filename.clone(),
                payload,
                collection: self.target.collection.clone(),
                kb_name: self.target.kb.upload_name().to_string(),
                ocr: self.target.options.ocr,
                image_summary: self.target.options.image_summary,
            };
            self.current = Some((id, filename));
            return Ok(Some((id, request)));
        }
        Ok(None)
    }

    /// Record the result of the in-flight upload and advance.
    ///
    /// A failed upload marks only that file as Error; the batch continues.
    pub fn record_outcome(
        &mut self,
        queue: &mut FileQueue,
        result: Result<UploadReceipt, CoreError>,
    ) -> Result<StepOutcome, CoreError> {
        let (file_id, filename) = self.current.take().ok_or_else(|| {
            CoreError::Validation("no upload is in flight".to_string())
        })?;

        match result {
            Ok(receipt) => {
                queue.set_state(
                    file_id,
                    FileState::Completed {
                        document_id: receipt.document_id.clone(),
                    },
                )?;
                let refresh_kb = match &self.target.kb {
                    KbTarget::Select { server_id } => server_id.clone(),
                    KbTarget::CreateNewMatched { matched_id, .. } => matched_id.clone(),
                    KbTarget::CreateNew { .. } => receipt.kb_server_id.clone(),
                };
                if matches!(self.target.kb, KbTarget::CreateNew { .. })
                    && self.report.created_kb.is_none()
                {
                    tracing::info!(server_id = %receipt.kb_server_id, "knowledge base created");
                    self.report.created_kb = Some(receipt.kb_server_id.clone());
                }
                tracing::info!(
                    file = %file_id,
                    filename = %filename,
                    document_id = %receipt.document_id,
                    "upload complete"
                );
                self.report.completed.push(CompletedUpload {
                    file_id,
                    filename,
                    document_id: receipt.document_id.clone(),
                });
                Ok(StepOutcome::Completed {
                    file_id,
                    receipt,
                    refresh_kb,
                })
            }
            Err(e) => {
                let message = e.to_string();
                queue.set_state(
                    file_id,
                    FileState::Error {
                        detail: message.clone(),
                    },
                )?;
                tracing::warn!(
                    file = %file_id,
                    filename = %filename,
                    error = %message,
                    "upload failed"
                );
                self.report.failures.push(FailedUpload {
                    file_id,
                    filename,
                    message: message.clone(),
                });
                Ok(StepOutcome::Failed { file_id, message })
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none() && self.work.is_empty()
    }

    pub fn into_report(self) -> BatchReport {
        self.report
    }
}
