//! Sequential evaluation run: load, answer every question, score, report.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::evaluator::{EvaluationSample, Evaluator};
use super::manifest::{
    platform_string, qa_fingerprint, ErrorEntry, Report, RunManifest, SampleDebug, Timing,
};
use super::progress::QaProgress;
use super::queries::{extract_retrieval_queries, EvalMode};
use crate::dataset::{list_document_files, Dataset, QaItem};
use crate::knowledge::{preview, KnowledgeBase, KnowledgeError};

pub const NO_SAMPLES_MESSAGE: &str = "❌ No samples collected. Cannot run evaluation.";
pub const FAILED_ANSWER: &str = "Error: failed to generate answer.";
pub const NO_CONTEXT: &str = "No relevant context found.";

const DOCUMENT_EXTENSIONS: [&str; 1] = [".md"];
const LOG_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub retrieval_k: usize,
    pub max_docs: Option<usize>,
    pub max_qa_items: Option<usize>,
    pub skip_load: bool,
    pub force_reload: bool,
    pub full_log: bool,
    pub output: Option<PathBuf>,
    pub eval_mode: EvalMode,
    pub model_name: String,
    pub eval_model_name: String,
    pub embedding_model: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 4,
            max_docs: None,
            max_qa_items: None,
            skip_load: false,
            force_reload: true,
            full_log: false,
            output: None,
            eval_mode: EvalMode::Native,
            model_name: String::new(),
            eval_model_name: String::new(),
            embedding_model: String::new(),
        }
    }
}

struct QuestionOutcome {
    answer: String,
    contexts: Vec<String>,
    retrieval_queries: Vec<String>,
    retrieved: usize,
}

/// Dataset and knowledge-base load failures are returned as `Err`; every
/// other failure is reported through the returned string.
pub async fn run_evaluation(
    kb: &dyn KnowledgeBase,
    dataset: &dyn Dataset,
    evaluator: &dyn Evaluator,
    config: &RunConfig,
) -> Result<String> {
    let run_started = Instant::now();
    info!(mode = %config.eval_mode, "=== RAG Evaluation ===");

    let qa_items = dataset
        .load_qa_items(config.max_qa_items, &DOCUMENT_EXTENSIONS)
        .await
        .context("Failed to load QA items")?;
    info!(count = qa_items.len(), "Loaded QA items");

    let manifest = build_manifest(kb, dataset, evaluator, config, &qa_items);
    log_manifest(&manifest);

    if config.skip_load {
        info!("Skipping document loading (--skip-load enabled)");
    } else {
        let doc_dir = dataset
            .load_documents(config.max_docs, &DOCUMENT_EXTENSIONS, config.force_reload)
            .await
            .context("Failed to load documents")?;
        let file_paths = list_document_files(&doc_dir, &DOCUMENT_EXTENSIONS)?;
        info!(count = file_paths.len(), dir = %doc_dir.display(), "Found documents (sorted)");

        kb.load(&file_paths)
            .await
            .with_context(|| format!("Failed to load documents into {} knowledge base", kb.name()))?;
        info!("Knowledge base built");
    }

    info!(mode = %config.eval_mode, "Running Q&A with fresh sessions");
    let mut progress = QaProgress::new(qa_items.len());
    let mut samples = Vec::with_capacity(qa_items.len());
    let mut errors = Vec::new();
    let mut sample_debug = Vec::with_capacity(qa_items.len());

    for (i, qa) in qa_items.iter().enumerate() {
        info!("[{}/{}] Q: {}", i + 1, qa_items.len(), preview(&qa.question, 80));
        let started = Instant::now();

        match answer_question(kb, qa, config).await {
            Ok(outcome) => {
                let elapsed = started.elapsed().as_secs_f64();
                progress.record_success(elapsed);
                log_outcome(&outcome, elapsed, config.full_log);

                samples.push(EvaluationSample {
                    question: qa.question.clone(),
                    answer: outcome.answer,
                    contexts: outcome.contexts,
                    ground_truth: qa.answer.clone(),
                });
                sample_debug.push(SampleDebug {
                    question: qa.question.clone(),
                    retrieval_queries: outcome.retrieval_queries,
                });
            }
            Err(e) => {
                let elapsed = started.elapsed().as_secs_f64();
                progress.record_failure(elapsed, &e.to_string());
                errors.push(ErrorEntry {
                    question: qa.question.clone(),
                    error: e.to_string(),
                    time: elapsed,
                });
                samples.push(EvaluationSample {
                    question: qa.question.clone(),
                    answer: FAILED_ANSWER.to_string(),
                    contexts: vec![NO_CONTEXT.to_string()],
                    ground_truth: qa.answer.clone(),
                });
                sample_debug.push(SampleDebug {
                    question: qa.question.clone(),
                    retrieval_queries: Vec::new(),
                });
            }
        }
    }

    let qa_total = progress.total_seconds();
    let qa_avg = progress.avg_success_seconds();

    if samples.is_empty() {
        warn!("{}", NO_SAMPLES_MESSAGE);
        return Ok(NO_SAMPLES_MESSAGE.to_string());
    }

    info!(
        samples = samples.len(),
        failed = progress.failed(),
        qa_total_seconds = %format!("{qa_total:.2}"),
        qa_avg_seconds = %format!("{qa_avg:.2}"),
        "Q&A phase complete"
    );
    log_samples(&samples);

    info!(evaluator = %evaluator.name(), "Running evaluation");
    let eval_started = Instant::now();
    let result = match evaluator.evaluate(&samples).await {
        Ok(result) => result,
        Err(e) => {
            let message = format!("❌ Evaluation failed: {e}");
            warn!("{}", message);
            return Ok(message);
        }
    };
    let eval_seconds = eval_started.elapsed().as_secs_f64();

    info!("\n{}", result);
    info!(
        qa_total_seconds = %format!("{qa_total:.2}"),
        qa_avg_seconds = %format!("{qa_avg:.2}"),
        eval_seconds = %format!("{eval_seconds:.2}"),
        total_seconds = %format!("{:.2}", qa_total + eval_seconds),
        wall_seconds = %format!("{:.2}", run_started.elapsed().as_secs_f64()),
        "Timing"
    );

    if let Some(path) = &config.output {
        let report = Report {
            manifest,
            timing: Timing::rounded(qa_total, qa_avg, eval_seconds, qa_total + eval_seconds),
            samples_count: samples.len(),
            errors_count: errors.len(),
            result: result.clone(),
            errors,
            sample_debug,
        };
        report
            .write_to(path)
            .with_context(|| format!("Failed to save results to {}", path.display()))?;
        info!(path = %path.display(), "Results saved");
    }

    Ok(result)
}

async fn answer_question(
    kb: &dyn KnowledgeBase,
    qa: &QaItem,
    config: &RunConfig,
) -> std::result::Result<QuestionOutcome, KnowledgeError> {
    let k = config.retrieval_k;
    let (answer, results) = match config.eval_mode {
        EvalMode::Strict => {
            let results = kb.search(&qa.question, k).await?;
            let answer = kb.answer(&qa.question, k).await?;
            (answer.text, results)
        }
        EvalMode::Native => {
            let answer = kb.answer(&qa.question, k).await?;
            (answer.text, answer.results)
        }
    };

    let fallback = kb.last_trace();
    let retrieval_queries =
        extract_retrieval_queries(&qa.question, config.eval_mode, &results, fallback.as_ref());

    let mut contexts: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
    if contexts.is_empty() {
        warn!("No contexts retrieved, using placeholder");
        contexts.push(NO_CONTEXT.to_string());
    }

    Ok(QuestionOutcome {
        answer,
        contexts,
        retrieval_queries,
        retrieved: results.len(),
    })
}

fn build_manifest(
    kb: &dyn KnowledgeBase,
    dataset: &dyn Dataset,
    evaluator: &dyn Evaluator,
    config: &RunConfig,
    qa_items: &[QaItem],
) -> RunManifest {
    RunManifest {
        run_id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%z").to_string(),
        platform: platform_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        knowledge_base: kb.name().to_string(),
        evaluator: evaluator.name().to_string(),
        eval_mode: config.eval_mode,
        model_name: config.model_name.clone(),
        eval_model_name: config.eval_model_name.clone(),
        embedding_model: config.embedding_model.clone(),
        retrieval_k: config.retrieval_k,
        max_docs: config.max_docs,
        max_qa_items: config.max_qa_items,
        skip_load: config.skip_load,
        force_reload: config.force_reload,
        dataset: dataset.name(),
        qa_fingerprint: qa_fingerprint(qa_items),
    }
}

fn log_manifest(manifest: &RunManifest) {
    info!("Run Manifest:");
    if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(manifest) {
        for (key, value) in fields {
            info!("   {}: {}", key, value);
        }
    }
}

fn log_outcome(outcome: &QuestionOutcome, elapsed: f64, full_log: bool) {
    info!("   A: {}", preview(&outcome.answer, LOG_PREVIEW_CHARS));
    info!("   Retrieved {} contexts, took {:.2}s", outcome.retrieved, elapsed);
    if outcome.retrieval_queries.is_empty() {
        info!("   Retrieval queries: unavailable");
    } else {
        info!("   Retrieval queries ({}):", outcome.retrieval_queries.len());
        for (idx, query) in outcome.retrieval_queries.iter().enumerate() {
            info!("      [{}] {}", idx + 1, query);
        }
    }

    if full_log {
        info!("   === Full Answer ===\n{}", outcome.answer);
        info!("   === Contexts ===");
        for (j, ctx) in outcome.contexts.iter().enumerate() {
            info!("   [{}] {}", j + 1, ctx);
        }
    }
}

fn log_samples(samples: &[EvaluationSample]) {
    info!("EVALUATION DATA");
    for (i, sample) in samples.iter().enumerate() {
        info!("Sample {}/{}", i + 1, samples.len());
        info!("   QUESTION: {}", sample.question);
        info!("   GROUND TRUTH: {}", sample.ground_truth);
        info!("   ANSWER: {}", preview(&sample.answer, LOG_PREVIEW_CHARS));
        info!("   CONTEXTS ({} items):", sample.contexts.len());
        for (j, ctx) in sample.contexts.iter().enumerate() {
            info!("      [{}] {}", j + 1, preview(ctx, LOG_PREVIEW_CHARS));
        }
    }
}
