use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Request counters for the knowledge-base service.
#[derive(Debug, Default)]
pub struct Metrics {
    pub loads_total: AtomicU64,
    pub documents_loaded: AtomicU64,
    pub searches_total: AtomicU64,
    pub answers_total: AtomicU64,
    pub requests_failed: AtomicU64,
    pub duration_sum_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    Load,
    Search,
    Answer,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, op: Operation, ok: bool, duration_ms: u64) {
        let counter = match op {
            Operation::Load => &self.loads_total,
            Operation::Search => &self.searches_total,
            Operation::Answer => &self.answers_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        if !ok {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_documents(&self, count: u64) {
        self.documents_loaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let loads = self.loads_total.load(Ordering::Relaxed);
        let docs = self.documents_loaded.load(Ordering::Relaxed);
        let searches = self.searches_total.load(Ordering::Relaxed);
        let answers = self.answers_total.load(Ordering::Relaxed);
        let failed = self.requests_failed.load(Ordering::Relaxed);
        let dur_sum = self.duration_sum_ms.load(Ordering::Relaxed);

        format!(
            "# HELP rag_eval_loads_total Load requests handled.\n\
             # TYPE rag_eval_loads_total counter\n\
             rag_eval_loads_total {}\n\
             # HELP rag_eval_documents_loaded Documents indexed across all loads.\n\
             # TYPE rag_eval_documents_loaded counter\n\
             rag_eval_documents_loaded {}\n\
             # HELP rag_eval_searches_total Search requests handled.\n\
             # TYPE rag_eval_searches_total counter\n\
             rag_eval_searches_total {}\n\
             # HELP rag_eval_answers_total Answer requests handled.\n\
             # TYPE rag_eval_answers_total counter\n\
             rag_eval_answers_total {}\n\
             # HELP rag_eval_requests_failed Requests that returned an error.\n\
             # TYPE rag_eval_requests_failed counter\n\
             rag_eval_requests_failed {}\n\
             # HELP rag_eval_duration_ms_sum Sum of request durations in ms.\n\
             # TYPE rag_eval_duration_ms_sum counter\n\
             rag_eval_duration_ms_sum {}\n",
            loads, docs, searches, answers, failed, dur_sum
        )
    }
}
