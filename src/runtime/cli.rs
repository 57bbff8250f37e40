//! `docchat` command line.
//!
//! ```bash
//! # Upload and index documents, then bind them to the assistant
//! docchat upload handbook.pdf faq.txt
//!
//! # One question in a fresh conversation
//! docchat ask "What are the opening hours?"
//!
//! # Interactive conversation
//! docchat chat
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use super::{bootstrap, Session, StartupError};
use crate::adapters::config::Settings;
use crate::adapters::registry::{LocalRegistryStore, RegistryError};
use crate::core::error::{ChatError, ErrorKind};
use crate::core::session::UploadFile;

#[derive(Parser, Debug)]
#[command(
    name = "docchat",
    version,
    about = "Ask questions about your documents through a hosted assistant",
    after_help = "Examples:\n  \
        docchat upload report.pdf notes.txt\n  \
        docchat ask \"Summarise the report\"\n  \
        docchat chat --timeout 300"
)]
pub struct Cli {
    /// Config file (default: ~/.docchat/config.toml)
    #[arg(long, global = true, value_name = "PATH", env = "DOCCHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model for newly created assistants
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Seconds to wait for each answer
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Upload files, add them to the index and bind it to the assistant
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Ask one question in a new conversation
    Ask { question: String },
    /// Converse interactively; one question per line, `exit` to quit
    Chat,
    /// List uploaded documents
    Documents,
    /// Delete an uploaded document
    Delete { file_id: String },
    /// Forget the recorded assistant and index
    Reset,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

pub fn load_settings(cli: &Cli) -> Settings {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load_global(),
    }
    .with_env_overrides();
    if let Some(model) = &cli.model {
        settings.set_model(model);
    }
    if let Some(timeout) = cli.timeout {
        settings.run_timeout_secs = timeout;
    }
    settings
}

pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(&cli);
    let mut out = std::io::stdout();
    match cli.command {
        Command::Documents => {
            list_documents(&LocalRegistryStore::new(settings.registry_path()), &mut out)
        }
        Command::Reset => reset(&LocalRegistryStore::new(settings.registry_path()), &mut out),
        Command::Upload { files } => {
            let session = bootstrap(settings).await?;
            upload(session, files, &mut out).await
        }
        Command::Ask { question } => {
            let session = bootstrap(settings).await?;
            ask(session, &question, &mut out).await
        }
        Command::Chat => {
            let session = bootstrap(settings).await?;
            chat(session, &mut out).await
        }
        Command::Delete { file_id } => {
            let mut session = bootstrap(settings).await?;
            if !session
                .ctx
                .registry
                .documents
                .iter()
                .any(|doc| doc.file_id == file_id)
            {
                log::warn!("{file_id} is not in the registry; deleting remotely anyway");
            }
            session.chat.delete_document(&mut session.ctx, &file_id).await;
            writeln!(out, "Deleted {file_id}")?;
            Ok(())
        }
    }
}

fn list_documents(store: &LocalRegistryStore, out: &mut impl Write) -> Result<(), CliError> {
    let registry = store.load();
    if registry.documents.is_empty() {
        writeln!(out, "No documents uploaded.")?;
        return Ok(());
    }
    for doc in &registry.documents {
        writeln!(
            out,
            "{}  {}  {}",
            doc.file_id,
            doc.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
            doc.filename
        )?;
    }
    if let Some(index) = &registry.vector_store_id {
        writeln!(out, "index: {index}")?;
    }
    if let Some(assistant) = &registry.assistant_id {
        writeln!(out, "assistant: {assistant}")?;
    }
    Ok(())
}

fn reset(store: &LocalRegistryStore, out: &mut impl Write) -> Result<(), CliError> {
    let mut registry = store.load();
    registry.assistant_id = None;
    registry.vector_store_id = None;
    store.save(&registry)?;
    writeln!(
        out,
        "Forgot assistant and index; {} documents remain registered.",
        registry.documents.len()
    )?;
    Ok(())
}

async fn upload(
    mut session: Session,
    paths: Vec<PathBuf>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| CliError::ReadFile {
                path: path.clone(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(UploadFile { name, bytes });
    }

    let uploaded = session
        .chat
        .upload_documents(&mut session.ctx, files)
        .await?;
    for doc in &uploaded {
        writeln!(out, "Uploaded {} as {}", doc.display_name, doc.id)?;
    }

    let document_ids = session.ctx.registry.file_ids();
    let index = session
        .chat
        .build_or_rebind_index(&mut session.ctx, &document_ids)
        .await?;
    let spec = session.settings.assistant_spec();
    let assistant = session
        .chat
        .ensure_assistant(&mut session.ctx, &spec)
        .await?;
    writeln!(
        out,
        "Index {} holds {} documents; assistant {} is ready.",
        index.id,
        index.member_document_ids.len(),
        assistant.id
    )?;
    Ok(())
}

async fn prepare_conversation(session: &mut Session) -> Result<(), CliError> {
    if session.ctx.registry.documents.is_empty() {
        log::warn!("No documents uploaded yet; answers will not draw on any files");
    }
    let spec = session.settings.assistant_spec();
    session
        .chat
        .ensure_assistant(&mut session.ctx, &spec)
        .await?;
    session.chat.start_conversation(&mut session.ctx).await?;
    Ok(())
}

async fn ask(mut session: Session, question: &str, out: &mut impl Write) -> Result<(), CliError> {
    prepare_conversation(&mut session).await?;
    let reply = session.chat.ask_in_session(&session.ctx, question).await?;
    writeln!(out, "{reply}")?;
    Ok(())
}

async fn chat(mut session: Session, out: &mut impl Write) -> Result<(), CliError> {
    prepare_conversation(&mut session).await?;
    writeln!(out, "Ask about your documents. Type `exit` to quit.")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    converse(&session, &mut lines, out).await
}

/// Answers questions read from `lines` until `exit`, `quit` or end of input.
async fn converse<R>(
    session: &Session,
    lines: &mut Lines<R>,
    out: &mut impl Write,
) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        eprintln!("thinking…");
        match session.chat.ask_in_session(&session.ctx, question).await {
            Ok(reply) => writeln!(out, "{reply}\n")?,
            Err(err) if err.kind() == ErrorKind::Auth => return Err(err.into()),
            Err(err) => {
                eprintln!("Error: {err}");
                if let ChatError::RunTimedOut { run_id, .. } = &err {
                    abandon(session, run_id).await;
                }
                if err.kind().is_retryable() {
                    eprintln!("(you can ask again)");
                }
            }
        }
    }
    Ok(())
}

/// Cancels a timed-out run so the conversation accepts the next question.
async fn abandon(session: &Session, run_id: &str) {
    let Some(conversation_id) = session.ctx.conversation_id.as_deref() else {
        return;
    };
    match session.chat.abandon_run(conversation_id, run_id).await {
        Ok(outcome) => log::info!("Abandoned run {run_id}: {outcome:?}"),
        Err(err) => log::warn!("Failed to cancel run {run_id}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::adapters::openai::ApiVersion;
    use crate::adapters::registry::RegistrySnapshot;
    use crate::core::fake_service::FakeAssistantService;
    use crate::core::model::{DocumentHandle, RunStatus};
    use crate::core::run::PollPolicy;
    use crate::core::session::{DocChat, SessionContext};
    use clap::CommandFactory;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("docchat-cli-test-{}", uuid::Uuid::new_v4()))
    }

    fn seeded_store(dir: &std::path::Path) -> LocalRegistryStore {
        let store = LocalRegistryStore::new(dir.join("registry.json"));
        let mut snapshot = RegistrySnapshot::default();
        snapshot.record_document(&DocumentHandle {
            id: "file_1".to_string(),
            display_name: "handbook.pdf".to_string(),
            upload_time: chrono::Utc::now(),
        });
        snapshot.vector_store_id = Some("vs_1".to_string());
        snapshot.assistant_id = Some("asst_1".to_string());
        store.save(&snapshot).expect("seed registry");
        store
    }

    fn fake_session(service: &Arc<FakeAssistantService>, dir: &std::path::Path) -> Session {
        let store = LocalRegistryStore::new(dir.join("registry.json"));
        let policy = PollPolicy::fixed(Duration::from_secs(1), Duration::from_secs(3));
        let chat = DocChat::new(service.clone())
            .with_registry(store.clone())
            .with_run_policy(policy.clone())
            .with_index_policy(policy);
        Session {
            settings: Settings::default(),
            chat,
            ctx: SessionContext::from_registry(store.load()),
            store,
            version: ApiVersion::V2,
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "docchat",
            "ask",
            "What changed?",
            "--timeout",
            "30",
            "--model",
            "gpt-4o-mini",
        ])
        .expect("parse");
        assert_eq!(
            cli.command,
            Command::Ask {
                question: "What changed?".to_string()
            }
        );
        assert_eq!(cli.timeout, Some(30));
        assert_eq!(cli.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn upload_requires_files() {
        assert!(Cli::try_parse_from(["docchat", "upload"]).is_err());
        let cli = Cli::try_parse_from(["docchat", "upload", "a.pdf", "b.txt"]).expect("parse");
        assert_eq!(
            cli.command,
            Command::Upload {
                files: vec![PathBuf::from("a.pdf"), PathBuf::from("b.txt")]
            }
        );
    }

    #[test]
    fn flags_override_loaded_settings() {
        let dir = temp_dir();
        let config = dir.join("config.toml");
        std::fs::create_dir_all(&dir).expect("create dir");
        std::fs::write(&config, "config_version = 1\nrun_timeout_secs = 90\n").expect("write");

        let cli = Cli::try_parse_from([
            "docchat",
            "--config",
            config.to_str().expect("utf-8 path"),
            "--timeout",
            "15",
            "--model",
            "gpt-4o-mini",
            "documents",
        ])
        .expect("parse");
        let settings = load_settings(&cli);
        assert_eq!(settings.run_timeout_secs, 15);
        assert_eq!(settings.model, "gpt-4o-mini");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn documents_lists_registry_entries() {
        let dir = temp_dir();
        let store = seeded_store(&dir);
        let mut out = Vec::new();
        list_documents(&store, &mut out).expect("list");
        let text = String::from_utf8(out).expect("utf-8");
        assert!(text.contains("file_1"));
        assert!(text.contains("handbook.pdf"));
        assert!(text.contains("index: vs_1"));

        let empty = LocalRegistryStore::new(dir.join("other.json"));
        let mut out = Vec::new();
        list_documents(&empty, &mut out).expect("list empty");
        assert_eq!(String::from_utf8(out).expect("utf-8"), "No documents uploaded.\n");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn reset_keeps_documents_but_forgets_remote_ids() {
        let dir = temp_dir();
        let store = seeded_store(&dir);
        let mut out = Vec::new();
        reset(&store, &mut out).expect("reset");

        let registry = store.load();
        assert_eq!(registry.documents.len(), 1);
        assert!(registry.assistant_id.is_none());
        assert!(registry.vector_store_id.is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_indexes_files_and_persists_the_session() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("create dir");
        let handbook = dir.join("handbook.pdf");
        let faq = dir.join("faq.txt");
        std::fs::write(&handbook, b"%PDF-1.7 handbook").expect("write");
        std::fs::write(&faq, b"Q: hours? A: nine to five").expect("write");
        let service = Arc::new(FakeAssistantService::new());
        let session = fake_session(&service, &dir);
        let store = session.store.clone();

        let mut out = Vec::new();
        upload(session, vec![handbook, faq], &mut out)
            .await
            .expect("upload");

        let text = String::from_utf8(out).expect("utf-8");
        assert!(text.contains("Uploaded handbook.pdf as file_"));
        assert!(text.contains("Uploaded faq.txt as file_"));
        assert!(text.contains("holds 2 documents"));

        let registry = store.load();
        assert_eq!(registry.documents.len(), 2);
        let index_id = registry.vector_store_id.expect("index id");
        let assistant_id = registry.assistant_id.expect("assistant id");
        assert_eq!(service.index_members(&index_id).map(|m| m.len()), Some(2));
        assert_eq!(
            service
                .assistant(&assistant_id)
                .and_then(|config| config.bound_index_id),
            Some(index_id)
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails_before_any_request() {
        let dir = temp_dir();
        let service = Arc::new(FakeAssistantService::new());
        let session = fake_session(&service, &dir);
        let mut out = Vec::new();
        let err = upload(session, vec![dir.join("missing.pdf")], &mut out)
            .await
            .expect_err("missing file");
        assert!(matches!(err, CliError::ReadFile { .. }));
        assert_eq!(service.calls("upload_file"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ask_prints_the_reply() {
        let dir = temp_dir();
        let service = Arc::new(FakeAssistantService::new());
        let session = fake_session(&service, &dir);
        let mut out = Vec::new();
        ask(session, "What are the opening hours?", &mut out)
            .await
            .expect("ask");
        assert_eq!(
            String::from_utf8(out).expect("utf-8"),
            "Answer to: What are the opening hours?\n"
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_cancels_a_timed_out_run_and_answers_the_next_question() {
        let dir = temp_dir();
        let service = Arc::new(FakeAssistantService::new());
        let mut session = fake_session(&service, &dir);
        prepare_conversation(&mut session).await.expect("prepare");
        service.script_run(&[RunStatus::Queued, RunStatus::InProgress]);

        let input: &[u8] = b"Still there?\n\nAre you back?\nexit\nnever asked\n";
        let mut lines = BufReader::new(input).lines();
        let mut out = Vec::new();
        converse(&session, &mut lines, &mut out)
            .await
            .expect("converse");

        assert_eq!(service.calls("cancel_run"), 1);
        assert_eq!(service.calls("create_run"), 2);
        let text = String::from_utf8(out).expect("utf-8");
        assert!(text.contains("Answer to: Are you back?"));
        assert!(!text.contains("Answer to: Still there?"));
        assert!(!text.contains("never asked"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
