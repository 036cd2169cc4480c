//! The upload queue: candidate files and their per-file processing state.

use std::fmt;

use crate::CoreError;

/// Session-unique handle for a queued file. Never reused, even after the
/// file is removed or the queue is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A file offered for admission, before the PDF filter runs.
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    /// Declared media type, e.g. `application/pdf`.
    pub media_type: String,
    pub payload: Vec<u8>,
}

impl FileCandidate {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            payload,
        }
    }

    pub fn is_pdf(&self) -> bool {
        is_pdf_media_type(&self.media_type)
    }
}

/// Admission rule: the declared media type mentions "pdf". No content sniffing.
pub fn is_pdf_media_type(media_type: &str) -> bool {
    media_type.to_ascii_lowercase().contains("pdf")
}

/// Processing state of a queued file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Uploading { progress: u8 },
    Completed { document_id: String },
    Error { detail: String },
}

impl FileState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Uploading { .. } => "Uploading",
            Self::Completed { .. } => "Completed",
            Self::Error { .. } => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    /// Pending → Uploading → {Completed | Error}. Progress within Uploading
    /// goes through [`FileQueue::set_progress`], not a transition.
    pub fn can_transition_to(&self, next: &FileState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Uploading { .. })
                | (Self::Uploading { .. }, Self::Completed { .. })
                | (Self::Uploading { .. }, Self::Error { .. })
        )
    }
}

/// One user-selected file and its processing state.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    id: FileId,
    name: String,
    media_type: String,
    /// Emptied when the orchestrator claims the file for upload.
    payload: Vec<u8>,
    state: FileState,
}

impl TrackedFile {
    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn state(&self) -> &FileState {
        &self.state
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// 0–100. Only meaningful while uploading; completed files report 100.
    pub fn progress_percent(&self) -> u8 {
        match &self.state {
            FileState::Uploading { progress } => *progress,
            FileState::Completed { .. } => 100,
            _ => 0,
        }
    }

    pub fn server_document_id(&self) -> Option<&str> {
        match &self.state {
            FileState::Completed { document_id } => Some(document_id),
            _ => None,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.state {
            FileState::Error { detail } => Some(detail),
            _ => None,
        }
    }
}

/// Result of [`FileQueue::add`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub admitted: Vec<FileId>,
    /// Names of candidates dropped by the PDF filter, for a user-visible notice.
    pub rejected: Vec<String>,
}

/// Per-state tallies for the queue header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.uploading + self.completed + self.failed
    }
}

/// Files in insertion order.
#[derive(Debug, Default)]
pub struct FileQueue {
    files: Vec<TrackedFile>,
    next_id: u64,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit every PDF candidate as Pending; everything else is dropped and
    /// reported by name.
    pub fn add(&mut self, candidates: impl IntoIterator<Item = FileCandidate>) -> AddOutcome {
        let mut outcome = AddOutcome::default();
        for candidate in candidates {
            if !candidate.is_pdf() {
                outcome.rejected.push(candidate.name);
                continue;
            }
            self.next_id += 1;
            let id = FileId(self.next_id);
            self.files.push(TrackedFile {
                id,
                name: candidate.name,
                media_type: candidate.media_type,
                payload: candidate.payload,
                state: FileState::Pending,
            });
            outcome.admitted.push(id);
        }
        outcome
    }

    pub fn get(&self, id: FileId) -> Option<&TrackedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Pending files in insertion order.
    pub fn pending_ids(&self) -> Vec<FileId> {
        self.files
            .iter()
            .filter(|f| f.state == FileState::Pending)
            .map(|f| f.id)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.counts().pending
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for file in &self.files {
            match file.state {
                FileState::Pending => counts.pending += 1,
                FileState::Uploading { .. } => counts.uploading += 1,
                FileState::Completed { .. } => counts.completed += 1,
                FileState::Error { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// Move a file to `next`, rejecting anything outside the state machine.
    pub fn set_state(&mut self, id: FileId, next: FileState) -> Result<(), CoreError> {
        let file = self
            .files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(CoreError::UnknownFile(id))?;
        if !file.state.can_transition_to(&next) {
            return Err(CoreError::InvalidTransition {
                id,
                from: file.state.label(),
                to: next.label(),
            });
        }
        file.state = match next {
            FileState::Uploading { progress } => FileState::Uploading {
                progress: progress.min(100),
            },
            other => other,
        };
        Ok(())
    }

    /// Update the progress of an uploading file, clamped to 100.
    pub fn set_progress(&mut self, id: FileId, progress: u8) -> Result<(), CoreError> {
        let file = self
            .files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(CoreError::UnknownFile(id))?;
        match &mut file.state {
            FileState::Uploading { progress: current } => {
                *current = progress.min(100);
                Ok(())
            }
            other => Err(CoreError::InvalidTransition {
                id,
                from: other.label(),
                to: "Uploading",
            }),
        }
    }

    /// Pending → Uploading, handing the file's bytes to the caller.
    pub(crate) fn claim(&mut self, id: FileId) -> Result<Vec<u8>, CoreError> {
        self.set_state(id, FileState::Uploading { progress: 0 })?;
        let file = self
            .files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(CoreError::UnknownFile(id))?;
        Ok(std::mem::take(&mut file.payload))
    }

    /// Drop a file from the queue. Refused while the file is uploading.
    pub fn remove(&mut self, id: FileId) -> Result<TrackedFile, CoreError> {
        let pos = self
            .files
            .iter()
            .position(|f| f.id == id)
            .ok_or(CoreError::UnknownFile(id))?;
        if matches!(self.files[pos].state, FileState::Uploading { .. }) {
            return Err(CoreError::FileInFlight(id));
        }
        Ok(self.files.remove(pos))
    }

    /// Empty the whole queue, whatever state each file is in.
    pub fn clear(&mut self) {
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;

    fn pdf(name: &str) -> FileCandidate {
        FileCandidate::new(name, "application/pdf", name.as_bytes().to_vec())
    }

    #[test]
    fn add_admits_only_pdf_media_types() {
        let mut queue = FileQueue::new();
        let outcome = queue.add(vec![
            pdf("a.pdf"),
            FileCandidate::new("b.png", "image/png", vec![1]),
            FileCandidate::new("c.pdf", "APPLICATION/PDF", vec![2]),
            FileCandidate::new("d", "", vec![3]),
            FileCandidate::new("e.pdf", "application/x-pdf", vec![4]),
        ]);

        assert_eq!(outcome.admitted.len(), 3);
        assert_eq!(outcome.rejected, vec!["b.png".to_string(), "d".to_string()]);
        assert!(queue.iter().all(|f| is_pdf_media_type(f.media_type())));
        assert!(queue.iter().all(|f| f.state() == &FileState::Pending));
    }

    #[test]
    fn name_extension_does_not_override_media_type() {
        let mut queue = FileQueue::new();
        let outcome = queue.add(vec![FileCandidate::new("report.pdf", "text/plain", vec![])]);
        assert!(outcome.admitted.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut queue = FileQueue::new();
        let first = queue.add(vec![pdf("a.pdf"), pdf("b.pdf")]).admitted;
        queue.remove(first[0]).unwrap();
        queue.clear();
        let second = queue.add(vec![pdf("a.pdf")]).admitted;
        assert!(!first.contains(&second[0]));
        assert!(second[0] > first[1]);
    }

    #[test]
    fn pending_ids_follow_insertion_order() {
        let mut queue = FileQueue::new();
        let ids = queue.add(vec![pdf("1.pdf"), pdf("2.pdf"), pdf("3.pdf")]).admitted;
        queue.claim(ids[1]).unwrap();
        assert_eq!(queue.pending_ids(), vec![ids[0], ids[2]]);
    }

    #[test]
    fn legal_transitions() {
        let mut queue = FileQueue::new();
        let ids = queue.add(vec![pdf("ok.pdf"), pdf("bad.pdf")]).admitted;

        queue.set_state(ids[0], FileState::Uploading { progress: 0 }).unwrap();
        queue.set_progress(ids[0], 250).unwrap();
        assert_eq!(queue.get(ids[0]).unwrap().progress_percent(), 100);
        queue
            .set_state(
                ids[0],
                FileState::Completed {
                    document_id: "d1".into(),
                },
            )
            .unwrap();
        let done = queue.get(ids[0]).unwrap();
        assert_eq!(done.server_document_id(), Some("d1"));
        assert_eq!(done.progress_percent(), 100);
        assert_eq!(done.error_detail(), None);

        queue.set_state(ids[1], FileState::Uploading { progress: 0 }).unwrap();
        queue
            .set_state(
                ids[1],
                FileState::Error {
                    detail: "boom".into(),
                },
            )
            .unwrap();
        let failed = queue.get(ids[1]).unwrap();
        assert_eq!(failed.error_detail(), Some("boom"));
        assert_eq!(failed.server_document_id(), None);
    }

    #[test]
    fn completed_requires_uploading_first() {
        let mut queue = FileQueue::new();
        let id = queue.add(vec![pdf("a.pdf")]).admitted[0];
        let err = queue
            .set_state(
                id,
                FileState::Completed {
                    document_id: "x".into(),
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                id,
                from: "Pending",
                to: "Completed",
            }
        );
        assert_eq!(queue.get(id).unwrap().state(), &FileState::Pending);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut queue = FileQueue::new();
        let id = queue.add(vec![pdf("a.pdf")]).admitted[0];
        queue.claim(id).unwrap();
        queue
            .set_state(
                id,
                FileState::Error {
                    detail: "nope".into(),
                },
            )
            .unwrap();
        assert!(queue.set_state(id, FileState::Pending).is_err());
        assert!(queue.set_state(id, FileState::Uploading { progress: 0 }).is_err());
        assert!(
            queue
                .set_state(
                    id,
                    FileState::Completed {
                        document_id: "x".into()
                    }
                )
                .is_err()
        );
    }

    #[test]
    fn claim_moves_payload_out() {
        let mut queue = FileQueue::new();
        let id = queue.add(vec![pdf("abc.pdf")]).admitted[0];
        assert_eq!(queue.get(id).unwrap().payload_len(), 7);

        let bytes = queue.claim(id).unwrap();
        assert_eq!(bytes, b"abc.pdf".to_vec());
        assert_eq!(queue.get(id).unwrap().payload_len(), 0);
        assert!(queue.claim(id).is_err());
    }

    #[test]
    fn uploading_file_cannot_be_claimed_or_restarted() {
        let mut queue = FileQueue::new();
        let id = queue.add(vec![pdf("abc.pdf")]).admitted[0];
        queue.claim(id).unwrap();
        queue.set_progress(id, 40).unwrap();

        assert_eq!(
            queue.claim(id).unwrap_err(),
            CoreError::InvalidTransition {
                id,
                from: "Uploading",
                to: "Uploading",
            }
        );
        assert!(queue.set_state(id, FileState::Uploading { progress: 0 }).is_err());
        assert_eq!(queue.get(id).unwrap().progress_percent(), 40);
    }

    #[test]
    fn progress_only_applies_while_uploading() {
        let mut queue = FileQueue::new();
        let id = queue.add(vec![pdf("a.pdf")]).admitted[0];
        assert_eq!(
            queue.set_progress(id, 10).unwrap_err(),
            CoreError::InvalidTransition {
                id,
                from: "Pending",
                to: "Uploading",
            }
        );
        assert_eq!(
            queue.set_progress(FileId(999), 10).unwrap_err(),
            CoreError::UnknownFile(FileId(999))
        );
    }

    #[test]
    fn remove_refused_while_uploading() {
        let mut queue = FileQueue::new();
        let ids = queue.add(vec![pdf("a.pdf"), pdf("b.pdf")]).admitted;
        queue.claim(ids[0]).unwrap();

        assert_eq!(queue.remove(ids[0]).unwrap_err(), CoreError::FileInFlight(ids[0]));
        assert_eq!(queue.remove(ids[1]).unwrap().name(), "b.pdf");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_unknown_id() {
        let mut queue = FileQueue::new();
        let id = queue.add(vec![pdf("a.pdf")]).admitted[0];
        queue.remove(id).unwrap();
        assert_eq!(queue.remove(id).unwrap_err(), CoreError::UnknownFile(id));
    }

    #[test]
    fn clear_empties_every_state() {
        let mut queue = FileQueue::new();
        let ids = queue
            .add(vec![pdf("p.pdf"), pdf("u.pdf"), pdf("c.pdf"), pdf("e.pdf")])
            .admitted;
        queue.claim(ids[1]).unwrap();
        queue.claim(ids[2]).unwrap();
        queue
            .set_state(
                ids[2],
                FileState::Completed {
                    document_id: "d".into(),
                },
            )
            .unwrap();
        queue.claim(ids[3]).unwrap();
        queue
            .set_state(
                ids[3],
                FileState::Error {
                    detail: "x".into(),
                },
            )
            .unwrap();

        let counts = queue.counts();
        assert_eq!(
            counts,
            QueueCounts {
                pending: 1,
                uploading: 1,
                completed: 1,
                failed: 1,
            }
        );
        assert_eq!(counts.total(), 4);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.counts().total(), 0);
    }

    #[derive(Debug, Clone)]
    enum QueueOp {
        Add(Vec<(String, String)>),
        Remove(usize),
        Claim(usize),
        Progress(usize, u8),
        Complete(usize),
        Fail(usize),
        Reset(usize),
        Clear,
    }

    fn media_type_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("application/pdf".to_string()),
            Just("APPLICATION/X-PDF".to_string()),
            Just("text/plain".to_string()),
            Just("image/png".to_string()),
            Just(String::new()),
            "[a-z/+-]{0,16}",
        ]
    }

    fn queue_op_strategy() -> impl Strategy<Value = QueueOp> {
        prop_oneof![
            prop::collection::vec(("[a-z]{1,6}\\.pdf", media_type_strategy()), 0..4)
                .prop_map(QueueOp::Add),
            any::<usize>().prop_map(QueueOp::Remove),
            any::<usize>().prop_map(QueueOp::Claim),
            (any::<usize>(), any::<u8>()).prop_map(|(i, p)| QueueOp::Progress(i, p)),
            any::<usize>().prop_map(QueueOp::Complete),
            any::<usize>().prop_map(QueueOp::Fail),
            any::<usize>().prop_map(QueueOp::Reset),
            Just(QueueOp::Clear),
        ]
    }

    fn legal_step(from: &str, to: &str) -> bool {
        from == to
            || matches!(
                (from, to),
                ("Pending", "Uploading") | ("Uploading", "Completed") | ("Uploading", "Error")
            )
    }

    proptest! {
        #[test]
        fn queue_invariants_hold_for_any_operation_sequence(
            ops in prop::collection::vec(queue_op_strategy(), 0..60)
        ) {
            let mut queue = FileQueue::new();
            let mut issued: Vec<FileId> = Vec::new();
            let mut last_label: HashMap<FileId, &'static str> = HashMap::new();

            for op in ops {
                let pick = |i: usize| (!issued.is_empty()).then(|| issued[i % issued.len()]);
                match op {
                    QueueOp::Add(items) => {
                        let candidates = items
                            .into_iter()
                            .map(|(name, media)| FileCandidate::new(name, media, vec![1, 2, 3]));
                        let outcome = queue.add(candidates);
                        for id in outcome.admitted {
                            prop_assert!(issued.last().is_none_or(|last| *last < id));
                            prop_assert!(!issued.contains(&id));
                            issued.push(id);
                        }
                    }
                    QueueOp::Remove(i) => {
                        if let Some(id) = pick(i) {
                            let uploading = matches!(
                                queue.get(id).map(TrackedFile::state),
                                Some(FileState::Uploading { .. })
                            );
                            let removed = queue.remove(id);
                            prop_assert_eq!(uploading, removed.is_err() && queue.get(id).is_some());
                        }
                    }
                    QueueOp::Claim(i) => {
                        if let Some(id) = pick(i) {
                            let was_pending =
                                queue.get(id).map(TrackedFile::state) == Some(&FileState::Pending);
                            let claimed = queue.claim(id);
                            prop_assert_eq!(was_pending, claimed.is_ok());
                            if let Ok(bytes) = claimed {
                                prop_assert_eq!(bytes, vec![1, 2, 3]);
                            }
                        }
                    }
                    QueueOp::Progress(i, progress) => {
                        if let Some(id) = pick(i)
                            && queue.set_progress(id, progress).is_ok()
                        {
                            prop_assert_eq!(
                                queue.get(id).map(TrackedFile::progress_percent),
                                Some(progress.min(100))
                            );
                        }
                    }
                    QueueOp::Complete(i) => {
                        if let Some(id) = pick(i) {
                            let _ = queue.set_state(
                                id,
                                FileState::Completed { document_id: format!("doc-{id}") },
                            );
                        }
                    }
                    QueueOp::Fail(i) => {
                        if let Some(id) = pick(i) {
                            let _ = queue.set_state(id, FileState::Error { detail: "boom".into() });
                        }
                    }
                    QueueOp::Reset(i) => {
                        if let Some(id) = pick(i) {
                            prop_assert!(queue.set_state(id, FileState::Pending).is_err());
                        }
                    }
                    QueueOp::Clear => queue.clear(),
                }

                for file in queue.iter() {
                    prop_assert!(is_pdf_media_type(file.media_type()));
                    let label = file.state().label();
                    let from = last_label.get(&file.id()).copied().unwrap_or("Pending");
                    prop_assert!(legal_step(from, label), "{} -> {}", from, label);
                    last_label.insert(file.id(), label);
                }
                let ids: Vec<FileId> = queue.iter().map(TrackedFile::id).collect();
                let mut sorted = ids.clone();
                sorted.sort();
                sorted.dedup();
                prop_assert_eq!(ids, sorted);
            }
        }
    }
}
