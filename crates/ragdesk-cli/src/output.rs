use std::io::Write;

use owo_colors::OwoColorize;
use ragdesk_core::{
    BatchReport, ChatAnswer, CollectionInfo, FileQueue, FileState, IngestEvent, KbDocumentEntry,
    KnowledgeBaseRef, ModelInfo, ServiceHealth,
};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

pub fn print_health(
    w: &mut dyn Write,
    health: &ServiceHealth,
    api_url: &str,
    color: ColorMode,
) -> std::io::Result<()> {
    let status = if color.enabled() {
        if health.status == "ok" {
            health.status.green().to_string()
        } else {
            health.status.yellow().to_string()
        }
    } else {
        health.status.clone()
    };
    writeln!(w, "{} {} (version {})", api_url, status, health.version)?;
    if !health.message.is_empty() {
        writeln!(w, "  {}", health.message)?;
    }
    Ok(())
}

pub fn print_collections(
    w: &mut dyn Write,
    collections: &[CollectionInfo],
    color: ColorMode,
) -> std::io::Result<()> {
    if collections.is_empty() {
        writeln!(w, "No collections.")?;
        return Ok(());
    }
    for c in collections {
        let name = if color.enabled() {
            c.name.bold().to_string()
        } else {
            c.name.clone()
        };
        writeln!(
            w,
            "{}  {} vectors, dim {}",
            name, c.vector_count, c.vector_dimension
        )?;
        if !c.description.is_empty() {
            writeln!(w, "    {}", c.description)?;
        }
    }
    Ok(())
}

pub fn print_models(
    w: &mut dyn Write,
    models: &[ModelInfo],
    color: ColorMode,
) -> std::io::Result<()> {
    if models.is_empty() {
        writeln!(w, "No models.")?;
        return Ok(());
    }
    for m in models {
        let loaded = match (m.loaded, color.enabled()) {
            (true, true) => " [loaded]".green().to_string(),
            (true, false) => " [loaded]".to_string(),
            (false, _) => String::new(),
        };
        writeln!(w, "{}  {}{}", m.id, m.size, loaded)?;
    }
    Ok(())
}

pub fn print_knowledge_bases(
    w: &mut dyn Write,
    collection: &str,
    kbs: &[KnowledgeBaseRef],
    color: ColorMode,
) -> std::io::Result<()> {
    if kbs.is_empty() {
        writeln!(w, "No knowledge bases in {}.", collection)?;
        return Ok(());
    }
    writeln!(w, "Knowledge bases in {}:", collection)?;
    for kb in kbs {
        if color.enabled() {
            writeln!(w, "  {}  {}", kb.display_name.bold(), kb.server_id.dimmed())?;
        } else {
            writeln!(w, "  {}  {}", kb.display_name, kb.server_id)?;
        }
    }
    Ok(())
}

/// Print a document listing. `stale` carries the error of a failed refresh;
/// the entries shown are then the last ones successfully fetched.
pub fn print_documents(
    w: &mut dyn Write,
    kb_id: &str,
    entries: &[KbDocumentEntry],
    stale: Option<&str>,
    color: ColorMode,
) -> std::io::Result<()> {
    if let Some(err) = stale {
        let msg = format!("Could not refresh documents ({}); showing last known list", err);
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    if entries.is_empty() {
        writeln!(w, "No documents in {}.", kb_id)?;
        return Ok(());
    }
    writeln!(w, "Documents in {} ({}):", kb_id, entries.len())?;
    for e in entries {
        if color.enabled() {
            writeln!(w, "  {}  {}", e.document_id.dimmed(), e.filename)?;
        } else {
            writeln!(w, "  {}  {}", e.document_id, e.filename)?;
        }
    }
    Ok(())
}

pub fn print_rejected(
    w: &mut dyn Write,
    rejected: &[String],
    color: ColorMode,
) -> std::io::Result<()> {
    for name in rejected {
        let msg = format!("Skipping {}: only PDF files can be uploaded", name);
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    Ok(())
}

/// One line for a batch event, or `None` for events not shown per file.
pub fn event_line(event: &IngestEvent, color: ColorMode) -> Option<String> {
    match event {
        IngestEvent::FileCompleted {
            filename,
            receipt,
            index,
            total,
            ..
        } => Some(if color.enabled() {
            format!(
                "[{}/{}] {} {} ({})",
                index,
                total,
                "OK".green(),
                filename,
                receipt.document_id
            )
        } else {
            format!("[{}/{}] OK {} ({})", index, total, filename, receipt.document_id)
        }),
        IngestEvent::FileFailed {
            filename,
            message,
            index,
            total,
            ..
        } => Some(if color.enabled() {
            format!("[{}/{}] {} {}: {}", index, total, "FAILED".red(), filename, message)
        } else {
            format!("[{}/{}] FAILED {}: {}", index, total, filename, message)
        }),
        IngestEvent::DocumentsStale { kb_id, message } => Some(format!(
            "Could not refresh documents of {}: {}",
            kb_id, message
        )),
        IngestEvent::KnowledgeBaseCreated { server_id } => {
            Some(format!("Created knowledge base {}", server_id))
        }
        IngestEvent::FileStarted { .. }
        | IngestEvent::DocumentsRefreshed { .. }
        | IngestEvent::BatchComplete { .. } => None,
    }
}

pub fn print_batch_report(
    w: &mut dyn Write,
    report: &BatchReport,
    queue: &FileQueue,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let summary = format!(
        "{} uploaded, {} failed",
        report.completed.len(),
        report.failures.len()
    );
    if color.enabled() {
        if report.all_succeeded() {
            writeln!(w, "{}", summary.green().bold())?;
        } else {
            writeln!(w, "{}", summary.red().bold())?;
        }
    } else {
        writeln!(w, "{}", summary)?;
    }

    for file in queue.iter() {
        let (tag, detail) = match file.state() {
            FileState::Completed { document_id } => ("done", document_id.as_str()),
            FileState::Error { detail } => ("error", detail.as_str()),
            FileState::Pending => ("pending", ""),
            FileState::Uploading { .. } => ("uploading", ""),
        };
        writeln!(w, "  {:<9} {}  {}", tag, file.name(), detail)?;
    }
    if report.skipped > 0 {
        writeln!(w, "  ({} files skipped)", report.skipped)?;
    }
    Ok(())
}

pub fn print_answer(
    w: &mut dyn Write,
    answer: &ChatAnswer,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w, "{}", answer.answer.trim())?;
    if answer.sources.is_empty() {
        return Ok(());
    }
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Sources:".bold())?;
    } else {
        writeln!(w, "Sources:")?;
    }
    for (i, s) in answer.sources.iter().enumerate() {
        let page = match &s.page {
            Some(serde_json::Value::Array(pages)) if !pages.is_empty() => format!(
                " p.{}",
                pages
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Some(serde_json::Value::Number(n)) => format!(" p.{}", n),
            _ => String::new(),
        };
        writeln!(w, "  [{}] {}{} (score {:.2})", i + 1, s.source, page, s.score)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdesk_core::{ChatSource, FileId, UploadReceipt};

    fn plain() -> ColorMode {
        ColorMode(false)
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn stale_documents_show_warning_and_entries() {
        let entries = vec![KbDocumentEntry {
            filename: "guide".into(),
            document_id: "1a2b3c4d".into(),
            kb_id: "manuals_17".into(),
        }];
        let out = render(|w| print_documents(w, "manuals_17", &entries, Some("HTTP 500"), plain()));
        assert!(out.starts_with("Could not refresh documents (HTTP 500)"));
        assert!(out.contains("  1a2b3c4d  guide"));
    }

    #[test]
    fn event_lines_for_per_file_results_only() {
        let mut queue = FileQueue::new();
        let id: FileId = queue
            .add(vec![ragdesk_core::FileCandidate::new("a.pdf", "application/pdf", vec![])])
            .admitted[0];
        let done = IngestEvent::FileCompleted {
            file_id: id,
            filename: "a.pdf".into(),
            receipt: UploadReceipt {
                document_id: "d1".into(),
                kb_server_id: "manuals_17".into(),
                filename: None,
            },
            index: 1,
            total: 2,
        };
        assert_eq!(event_line(&done, plain()).unwrap(), "[1/2] OK a.pdf (d1)");

        let started = IngestEvent::FileStarted {
            file_id: id,
            filename: "a.pdf".into(),
            index: 1,
            total: 2,
        };
        assert!(event_line(&started, plain()).is_none());
    }

    #[test]
    fn answer_lists_sources_with_pages() {
        let answer = ChatAnswer {
            answer: "Two years.\n".into(),
            sources: vec![ChatSource {
                text: "...".into(),
                score: 0.8123,
                source: "guide_1a2b3c4d.pdf".into(),
                page: Some(serde_json::json!([3, 4])),
                image_ref: None,
                table_ref: None,
            }],
        };
        let out = render(|w| print_answer(w, &answer, plain()));
        assert!(out.starts_with("Two years.\n\nSources:\n"));
        assert!(out.contains("[1] guide_1a2b3c4d.pdf p.3,4 (score 0.81)"));
    }
}
