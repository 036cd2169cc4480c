use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ragdesk_core::config_file::{self, Settings};
use ragdesk_core::{
    AppState, ChatRequest, FileCandidate, HttpBackend, IngestEvent, KbBackend, KbDocumentView,
    KbMode, KnowledgeBaseRef,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// ragdesk - Upload PDFs into knowledge bases and query a document QA service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// API base URL (overrides RAGDESK_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Per-request timeout in seconds (default: wait indefinitely)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the service is up
    Health,

    /// List vector collections
    Collections,

    /// List language models available for chat
    Models,

    /// List the knowledge bases in a collection
    Kbs {
        /// Collection name (default: from config)
        collection: Option<String>,
    },

    /// List the documents in a knowledge base
    Docs {
        collection: String,
        /// Knowledge base server id, e.g. manuals_1a2b3c4d
        kb: String,
    },

    /// Upload PDFs into a knowledge base, one file at a time
    Upload {
        /// Files to upload; anything that is not a PDF is skipped
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target collection (default: from config)
        #[arg(long)]
        collection: Option<String>,

        /// Existing knowledge base, by server id or display name
        #[arg(long, conflicts_with = "new_kb")]
        kb: Option<String>,

        /// Name for a new knowledge base. An existing one with the same
        /// display name is reused.
        #[arg(long)]
        new_kb: Option<String>,

        /// Run OCR on the uploaded pages
        #[arg(long)]
        ocr: bool,

        /// Skip generating summaries for images
        #[arg(long)]
        no_image_summary: bool,
    },

    /// Delete a document from a knowledge base
    Delete {
        collection: String,
        /// Knowledge base server id
        kb: String,
        document_id: String,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Ask a question against a collection
    Ask {
        collection: String,
        question: String,

        /// Restrict retrieval to one knowledge base (server id)
        #[arg(long)]
        kb: Option<String>,

        /// Model id (default: from config, else the first loaded model)
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    let mut settings = Settings::resolve(
        &config_file::load_config(),
        std::env::var("RAGDESK_API_URL").ok(),
    );
    if let Some(url) = cli.api_url {
        settings.api_url = url;
    }
    if let Some(secs) = cli.timeout {
        settings.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    tracing::debug!(api_url = %settings.api_url, "settings resolved");

    let backend = HttpBackend::new(settings.api_url.clone()).with_timeout(settings.timeout);
    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Health => health(&backend, color).await,
        Command::Collections => collections(&backend, color).await,
        Command::Models => models(&backend, color).await,
        Command::Kbs { collection } => {
            let collection = collection_or_default(collection, &settings)?;
            knowledge_bases(&backend, &collection, color).await
        }
        Command::Docs { collection, kb } => documents(&backend, &collection, &kb, color).await,
        Command::Upload {
            files,
            collection,
            kb,
            new_kb,
            ocr,
            no_image_summary,
        } => {
            let collection = collection_or_default(collection, &settings)?;
            let mut options = settings.options;
            if ocr {
                options.ocr = true;
            }
            if no_image_summary {
                options.image_summary = false;
            }
            let target = match (kb, new_kb) {
                (Some(kb), None) => UploadTarget::Existing(kb),
                (None, Some(name)) => UploadTarget::New(name),
                _ => anyhow::bail!("Pass either --kb <server id> or --new-kb <name>"),
            };
            upload(&backend, files, collection, target, options, color).await
        }
        Command::Delete {
            collection,
            kb,
            document_id,
            yes,
        } => delete(&backend, &collection, &kb, &document_id, yes, color).await,
        Command::Ask {
            collection,
            question,
            kb,
            model,
        } => ask(&backend, collection, question, kb, model.or(settings.model), color).await,
    }
}

/// Install the fmt subscriber. Logs go to stderr, or to `log_file` through a
/// non-blocking appender whose guard must outlive `main`.
fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
            Ok(Some(guard))
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            Ok(None)
        }
    }
}

fn collection_or_default(
    collection: Option<String>,
    settings: &Settings,
) -> anyhow::Result<String> {
    collection
        .or_else(|| settings.collection.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("No collection given. Pass one, or set ingest.collection in the config")
        })
}

async fn health(backend: &HttpBackend, color: ColorMode) -> anyhow::Result<()> {
    let health = backend.health().await?;
    output::print_health(&mut std::io::stdout(), &health, backend.base_url(), color)?;
    Ok(())
}

async fn collections(backend: &HttpBackend, color: ColorMode) -> anyhow::Result<()> {
    let collections = backend.list_collections().await?;
    output::print_collections(&mut std::io::stdout(), &collections, color)?;
    Ok(())
}

async fn models(backend: &HttpBackend, color: ColorMode) -> anyhow::Result<()> {
    let models = backend.list_models().await?;
    output::print_models(&mut std::io::stdout(), &models, color)?;
    Ok(())
}

async fn knowledge_bases(
    backend: &HttpBackend,
    collection: &str,
    color: ColorMode,
) -> anyhow::Result<()> {
    let kbs: Vec<KnowledgeBaseRef> = backend
        .list_knowledge_bases(collection)
        .await?
        .into_iter()
        .map(KnowledgeBaseRef::from_server_id)
        .collect();
    output::print_knowledge_bases(&mut std::io::stdout(), collection, &kbs, color)?;
    Ok(())
}

async fn documents(
    backend: &HttpBackend,
    collection: &str,
    kb: &str,
    color: ColorMode,
) -> anyhow::Result<()> {
    let mut view = KbDocumentView::new();
    if !view.refresh(backend, collection, kb).await {
        anyhow::bail!(
            "Could not list documents: {}",
            view.refresh_error().unwrap_or("unknown error")
        );
    }
    output::print_documents(&mut std::io::stdout(), kb, view.entries(), None, color)?;
    Ok(())
}

enum UploadTarget {
    Existing(String),
    New(String),
}

fn read_candidate(path: &Path) -> anyhow::Result<FileCandidate> {
    let payload = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let media_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or_default()
        .to_string();
    Ok(FileCandidate::new(name, media_type, payload))
}

async fn upload(
    backend: &HttpBackend,
    files: Vec<PathBuf>,
    collection: String,
    target: UploadTarget,
    options: ragdesk_core::ProcessingOptions,
    color: ColorMode,
) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut state = AppState::with_options(options);
    state.select_collection(backend, Some(collection)).await?;

    match target {
        UploadTarget::Existing(kb) => {
            if let Some(err) = state.resolver().listing_error() {
                anyhow::bail!("Could not list knowledge bases: {}", err);
            }
            let server_id = state
                .knowledge_bases()
                .into_iter()
                .find(|k| k.server_id == kb || k.display_name == kb)
                .map(|k| k.server_id)
                .ok_or_else(|| anyhow::anyhow!("No knowledge base named {}", kb))?;
            state.select_knowledge_base(backend, &server_id).await?;
        }
        UploadTarget::New(name) => {
            state.set_kb_mode(backend, KbMode::CreateNew).await?;
            state.set_kb_name(backend, &name).await?;
            if let Some(existing) = state.resolver().matched() {
                writeln!(
                    stdout,
                    "{} already exists as {}; files will be added to it",
                    name, existing
                )?;
            }
        }
    }

    let mut candidates = Vec::with_capacity(files.len());
    for path in &files {
        candidates.push(read_candidate(path)?);
    }
    let added = state.add_files(candidates)?;
    output::print_rejected(&mut stdout, &added.rejected, color)?;
    if added.admitted.is_empty() {
        anyhow::bail!("No PDF files to upload");
    }

    let pb = ProgressBar::new(added.admitted.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/dim}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let report = state
        .confirm_batch(backend, |event| {
            match event {
                IngestEvent::FileStarted { filename, .. } => pb.set_message(filename.clone()),
                IngestEvent::FileCompleted { .. } | IngestEvent::FileFailed { .. } => pb.inc(1),
                _ => {}
            }
            if let Some(line) = output::event_line(event, color) {
                pb.println(line);
            }
        })
        .await;
    pb.finish_and_clear();
    let report = report?;

    output::print_batch_report(&mut stdout, &report, state.queue(), color)?;
    if let Some(kb_id) = state.documents().kb_id() {
        writeln!(stdout)?;
        output::print_documents(
            &mut stdout,
            kb_id,
            state.documents().entries(),
            state.documents().refresh_error(),
            color,
        )?;
    }

    if !report.all_succeeded() {
        anyhow::bail!(
            "{} of {} files failed to upload",
            report.failures.len(),
            report.attempted()
        );
    }
    Ok(())
}

async fn delete(
    backend: &HttpBackend,
    collection: &str,
    kb: &str,
    document_id: &str,
    yes: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut view = KbDocumentView::new();
    if !view.refresh(backend, collection, kb).await {
        anyhow::bail!(
            "Could not list documents: {}",
            view.refresh_error().unwrap_or("unknown error")
        );
    }
    let entry = view
        .entries()
        .iter()
        .find(|e| e.document_id == document_id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No document {} in {}", document_id, kb))?;
    view.request_delete(&entry)?;

    if !yes {
        write!(
            stdout,
            "Delete {} ({}) from {}? [y/N] ",
            entry.filename, entry.document_id, kb
        )?;
        stdout.flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            view.cancel_delete();
            writeln!(stdout, "Cancelled.")?;
            return Ok(());
        }
    }

    let ack = view.confirm_delete(backend, collection).await?;
    if !ack.message.is_empty() {
        writeln!(stdout, "{}", ack.message)?;
    }
    output::print_documents(
        &mut stdout,
        kb,
        view.entries(),
        view.refresh_error(),
        color,
    )?;
    Ok(())
}

async fn ask(
    backend: &HttpBackend,
    collection: String,
    question: String,
    kb: Option<String>,
    model: Option<String>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let model = match model {
        Some(m) => m,
        None => {
            let models = backend.list_models().await?;
            models
                .iter()
                .find(|m| m.loaded)
                .or_else(|| models.first())
                .map(|m| m.id.clone())
                .ok_or_else(|| anyhow::anyhow!("No models available; pass --model"))?
        }
    };
    tracing::debug!(model = %model, "asking");
    let answer = backend
        .chat(&ChatRequest {
            query: question,
            model,
            collection,
            kb_name: kb,
        })
        .await?;
    output::print_answer(&mut std::io::stdout(), &answer, color)?;
    Ok(())
}
