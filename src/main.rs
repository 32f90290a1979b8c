use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clausewise::document::{DocumentId, DocumentUnavailableError, PlainTextLoader};
use clausewise::pipeline::{PipelineError, QaService};
use clausewise::synthesis::Decision;
use clausewise::{api, config, logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "clausewise",
    about = "Clause-grounded question answering over policies, contracts, and emails"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Index every supported file under the given paths.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Answer a question and print the decision as JSON.
    Ask {
        /// Restrict retrieval to one document.
        #[arg(long)]
        document: Option<String>,
        /// Files or directories to ingest before answering.
        #[arg(long = "source")]
        sources: Vec<PathBuf>,
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();
    if let Err(err) = run(Cli::parse()).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let service = QaService::from_config(config::get_config())
        .await
        .context("failed to initialize the question-answering service")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service).await,
        Command::Ingest { paths } => {
            let (ingested, failed) = ingest_paths(&service, &paths).await;
            println!("ingested {ingested} document(s), {failed} failed");
            if failed > 0 {
                bail!("{failed} document(s) could not be ingested");
            }
            Ok(())
        }
        Command::Ask {
            document,
            sources,
            question,
        } => {
            let decision = ask(&service, document, &sources, &question.join(" ")).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&decision).context("failed to encode decision")?
            );
            Ok(())
        }
    }
}

async fn serve(service: QaService) -> Result<()> {
    let app = api::create_router(Arc::new(service));
    let (listener, port) = bind_listener().await.context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server error")
}

/// Ingest `sources`, then answer `question`. Refuses to answer if any source failed to ingest.
async fn ask(
    service: &QaService,
    document: Option<String>,
    sources: &[PathBuf],
    question: &str,
) -> Result<Decision> {
    let (_, failed) = ingest_paths(service, sources).await;
    if failed > 0 {
        bail!("{failed} source document(s) could not be ingested; not answering");
    }
    let decision = match document {
        Some(id) => service.answer(&DocumentId::new(id), question).await,
        None => service.answer_any(question).await,
    }?;
    Ok(decision)
}

/// Ingest supported files under `paths`. Returns `(ingested, failed)`.
async fn ingest_paths(service: &QaService, paths: &[PathBuf]) -> (usize, usize) {
    let loader = PlainTextLoader;
    let mut ingested = 0;
    let mut failed = 0;
    for file in paths.iter().flat_map(|path| files_under(path)) {
        match service.ingest_source(&loader, &file).await {
            Ok(ack) => {
                ingested += 1;
                println!("{} ({} chunks)", ack.document_id, ack.chunks);
            }
            Err(PipelineError::DocumentUnavailable(DocumentUnavailableError::UnsupportedFormat(
                _,
            ))) => {
                tracing::debug!(path = %file.display(), "Skipping unsupported file");
            }
            Err(err) => {
                failed += 1;
                tracing::error!(path = %file.display(), error = %err, "Ingestion failed");
            }
        }
    }
    (ingested, failed)
}

fn files_under(path: &Path) -> Vec<PathBuf> {
    WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Skipping unreadable path");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clausewise::embedding::HashingEmbeddingClient;
    use clausewise::index::EmbeddingIndex;
    use clausewise::processing::ChunkingConfig;
    use clausewise::retrieval::RetrievalConfig;
    use clausewise::retry::RetryPolicy;
    use clausewise::synthesis::{DecisionLabel, SynthesisConfig};
    use tempfile::TempDir;

    fn service() -> QaService {
        let index = Arc::new(EmbeddingIndex::new(
            Arc::new(HashingEmbeddingClient::new("cli", 1024)),
            RetryPolicy::immediate(1),
        ));
        QaService::new(
            index,
            ChunkingConfig::sentences(1, 0),
            RetrievalConfig::default(),
            SynthesisConfig::default(),
        )
    }

    fn sources() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(
            dir.path().join("health.txt"),
            "A grace period of thirty days is allowed for premium payment.",
        )
        .expect("write policy");
        std::fs::write(dir.path().join("scan.pdf"), b"%PDF-1.4").expect("write pdf");
        dir
    }

    #[tokio::test]
    async fn ingest_counts_failures_and_skips_unsupported_files() {
        let dir = sources();
        std::fs::write(dir.path().join("blank.txt"), "").expect("write blank");

        let (ingested, failed) = ingest_paths(&service(), &[dir.path().to_path_buf()]).await;
        assert_eq!((ingested, failed), (1, 1));
    }

    #[tokio::test]
    async fn ask_answers_after_ingesting_sources() {
        let dir = sources();
        let decision = ask(
            &service(),
            Some("health".to_string()),
            &[dir.path().to_path_buf()],
            "What is the grace period for premium payment?",
        )
        .await
        .expect("decision");
        assert_eq!(decision.decision_label, DecisionLabel::InfoOnly);
        assert!(decision.answer_text.contains("thirty days"));
    }

    #[tokio::test]
    async fn ask_refuses_to_answer_when_a_source_fails() {
        let dir = sources();
        std::fs::write(dir.path().join("blank.txt"), "").expect("write blank");

        let error = ask(
            &service(),
            None,
            &[dir.path().to_path_buf()],
            "What is the grace period for premium payment?",
        )
        .await
        .expect_err("failed source");
        assert!(error.to_string().contains("1 source document(s)"));
    }
}
