use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};

mod catalog;
mod cli;
mod config;
mod engine;
mod extract;
mod matching;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use engine::Engine;
use extract::{extract_file, UniqueNames};
use matching::{Document, ExcludedDocument, MatchError};
use web::{MatchCandidatesResponse, MatchJobsResponse};

const DEFAULT_LOG_FILTER: &str = "hirematch=info,tower_http=info";

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    // stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let mut config = Config::load_with(&config::base_path()?)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    match args.command {
        cli::Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            let engine = Engine::load(config)?;
            runtime.block_on(web::serve(engine))
        }

        cli::Command::IndexJobs { jobs } => {
            if let Some(jobs) = jobs {
                config.catalog.jobs_csv = std::path::absolute(&jobs)?.to_string_lossy().to_string();
            }
            let jobs_csv = config.jobs_csv_path();
            if !jobs_csv.exists() {
                bail!("jobs catalog {} does not exist", jobs_csv.display());
            }

            let engine = Engine::load(config)?;
            let (embedded, saved) = runtime.block_on(engine.index_jobs())?;
            println!(
                "{embedded} jobs embedded, {saved} of {} jobs stored",
                engine.catalog().snapshot().len()
            );
            Ok(())
        }

        cli::Command::MatchJobs {
            resume,
            threshold,
            fallback_size,
        } => {
            let text = extract_file(&resume)
                .with_context(|| format!("failed to read {}", resume.display()))?;
            let threshold = threshold.unwrap_or(config.matching.default_threshold);

            let engine = Engine::load(config)?;
            let outcome = runtime
                .block_on(engine.orchestrator().match_jobs(
                    Document::resume(file_name(&resume), text),
                    threshold,
                    fallback_size,
                ))
                .map_err(describe)?;

            // keep embeddings computed for this run
            engine.save_vectors()?;

            let response = MatchJobsResponse::from(outcome);
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        cli::Command::MatchCandidates {
            job,
            resumes,
            threshold,
            fallback_size,
        } => {
            let job_text =
                extract_file(&job).with_context(|| format!("failed to read {}", job.display()))?;
            let threshold = threshold.unwrap_or(config.matching.default_threshold);

            let engine = Engine::load(config)?;
            let response = runtime
                .block_on(match_resume_files(
                    &engine,
                    Document::job(file_name(&job), None, job_text),
                    &resumes,
                    threshold,
                    fallback_size,
                ))
                .map_err(describe)?;

            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

/// Read resume files, reporting unreadable ones instead of failing.
fn read_resume_files(paths: &[PathBuf]) -> (Vec<Document>, Vec<ExcludedDocument>) {
    let mut names = UniqueNames::new();
    let mut documents = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();

    for path in paths {
        let name = names.claim(&file_name(path));
        match extract_file(path) {
            Ok(text) => documents.push(Document::resume(name, text)),
            Err(err) => {
                log::warn!("skipping {}: {err}", path.display());
                skipped.extend(
                    MatchError::DocumentUnreadable {
                        document: name.into(),
                        reason: err.to_string(),
                    }
                    .into_excluded(),
                );
            }
        }
    }

    (documents, skipped)
}

async fn match_resume_files(
    engine: &Engine,
    job: Document,
    paths: &[PathBuf],
    threshold: f32,
    fallback_size: Option<usize>,
) -> Result<MatchCandidatesResponse, MatchError> {
    let (resumes, skipped) = read_resume_files(paths);
    match engine
        .orchestrator()
        .match_candidates(job, resumes, threshold, fallback_size)
        .await
    {
        Ok(outcome) => Ok(MatchCandidatesResponse::new(outcome, skipped)),
        Err(err) => Err(err.with_skipped(skipped)),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn describe(err: MatchError) -> anyhow::Error {
    let mut message = format!("{} ({})", err, err.kind().code());
    for excluded in err.excluded() {
        message.push_str(&format!("\n  skipped {}: {}", excluded.document, excluded.reason));
    }
    anyhow::anyhow!(message)
}
