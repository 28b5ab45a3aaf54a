pub mod driver;
pub mod evaluator;
pub mod manifest;
pub mod progress;
pub mod queries;

pub use driver::{run_evaluation, RunConfig};
pub use evaluator::{Evaluator, RagasConfig, RagasEvaluator};
pub use queries::EvalMode;
