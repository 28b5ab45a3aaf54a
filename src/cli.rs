use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::download::{DEFAULT_CONFIG, DEFAULT_DATASET, DEFAULT_SPLIT};
use crate::evaluation::EvalMode;

#[derive(Parser, Debug)]
#[command(
    name = "rag-eval",
    version,
    about = "Evaluate RAG knowledge bases with RAGAS metrics"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an evaluation against a knowledge base.
    Run(RunArgs),
    /// Serve the local knowledge base over HTTP.
    Serve(ServeArgs),
    /// Download a HuggingFace dataset split as JSON.
    Download(DownloadArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum KbKind {
    Local,
    Remote,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EvaluatorKind {
    Ragas,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DatasetKind {
    Huggingface,
    Local,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value_t = KbKind::Local)]
    pub kb: KbKind,

    /// Knowledge-base service URL (defaults to KB_SERVICE_URL).
    #[arg(long)]
    pub kb_url: Option<String>,

    #[arg(long, value_enum, default_value_t = EvaluatorKind::Ragas)]
    pub evaluator: EvaluatorKind,

    #[arg(long, value_enum, default_value_t = DatasetKind::Huggingface)]
    pub dataset: DatasetKind,

    /// Cache directory for downloaded documents (defaults to DATA_DIR).
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// QA file (JSON array or JSONL) for `--dataset local`.
    #[arg(long)]
    pub qa_file: Option<PathBuf>,

    /// Document directory for `--dataset local`.
    #[arg(long)]
    pub docs_dir: Option<PathBuf>,

    #[arg(long)]
    pub max_docs: Option<usize>,

    #[arg(long)]
    pub max_qa: Option<usize>,

    /// Documents to retrieve per query.
    #[arg(long, default_value_t = 4)]
    pub k: usize,

    #[arg(long, default_value_t = false)]
    pub skip_load: bool,

    /// Force document loading; overrides `--skip-load`.
    #[arg(long, default_value_t = false)]
    pub load: bool,

    /// Print full answers and contexts for each question.
    #[arg(long, default_value_t = false)]
    pub full_log: bool,

    /// Write the JSON report here.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = EvalMode::Native)]
    pub eval_mode: EvalMode,

    /// Reuse cached documents instead of re-downloading them.
    #[arg(long, default_value_t = false)]
    pub cache_document: bool,

    /// Evaluation service timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Parallel workers for the evaluation service.
    #[arg(long, default_value_t = 10)]
    pub workers: usize,
}

impl RunArgs {
    pub fn skip_load(&self) -> bool {
        self.skip_load && !self.load
    }

    pub fn force_reload(&self) -> bool {
        !self.cache_document
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen port (defaults to PORT).
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    #[arg(long, default_value = DEFAULT_DATASET)]
    pub dataset: String,

    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: String,

    #[arg(long, default_value = DEFAULT_SPLIT)]
    pub split: String,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, default_value = "data")]
    pub out_dir: PathBuf,

    /// Output JSON path, relative to `--out-dir` unless absolute.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Also download attachment files referenced by `file_path`.
    #[arg(long, default_value_t = false)]
    pub with_files: bool,

    /// Re-download attachments that already exist.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}
