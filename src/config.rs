use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MODEL_NAME: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_KB_SERVICE_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_RAGAS_SERVICE_URL: &str = "http://127.0.0.1:8090";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_HTTP_TIMEOUT: u64 = 120;
const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_CHUNK_OVERLAP: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub auth_token: Option<String>,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model_name: String,
    pub eval_model_name: String,
    pub embedding_model: String,
    pub kb_service_url: String,
    pub ragas_service_url: String,
    pub data_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(lookup);
        let model_name = env.string("MODEL_NAME", DEFAULT_MODEL_NAME);
        Self {
            port: env.parse("PORT", DEFAULT_PORT),
            auth_token: env.opt("AUTH_TOKEN"),
            api_key: env.opt("OPENAI_API_KEY"),
            base_url: env.string("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            eval_model_name: env.string("EVAL_MODEL_NAME", &model_name),
            model_name,
            embedding_model: env.string("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            kb_service_url: env.string("KB_SERVICE_URL", DEFAULT_KB_SERVICE_URL),
            ragas_service_url: env.string("RAGAS_SERVICE_URL", DEFAULT_RAGAS_SERVICE_URL),
            data_dir: PathBuf::from(env.string("DATA_DIR", DEFAULT_DATA_DIR)),
            http_timeout_secs: env.parse("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT),
            chunk_size: env.parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            chunk_overlap: env.parse("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP),
        }
    }

    pub fn print_banner(&self) {
        tracing::info!("╔══════════════════════════════════════════════════╗");
        tracing::info!("║           rag-eval v{}                        ║", env!("CARGO_PKG_VERSION"));
        tracing::info!("╠══════════════════════════════════════════════════╣");
        tracing::info!("║  Model:             {:<28}║", self.model_name);
        tracing::info!("║  Eval model:        {:<28}║", self.eval_model_name);
        tracing::info!("║  Embedding model:   {:<28}║", self.embedding_model);
        tracing::info!("║  API key:           {:<28}║", if self.api_key.is_some() { "set" } else { "missing" });
        tracing::info!("║  Chunking:          {:<28}║", format!("{}/{}", self.chunk_size, self.chunk_overlap));
        tracing::info!("║  HTTP timeout:      {:<25}s ║", self.http_timeout_secs);
        tracing::info!("║  Data dir:          {:<28}║", self.data_dir.display());
        tracing::info!("╚══════════════════════════════════════════════════╝");
    }

    pub fn print_service_banner(&self) {
        tracing::info!("╔══════════════════════════════════════════════════╗");
        tracing::info!("║        rag-eval knowledge service v{}         ║", env!("CARGO_PKG_VERSION"));
        tracing::info!("╠══════════════════════════════════════════════════╣");
        tracing::info!("║  Port:              {:<28}║", self.port);
        tracing::info!("║  Auth:              {:<28}║", if self.auth_token.is_some() { "enabled" } else { "disabled" });
        tracing::info!("║  Model:             {:<28}║", self.model_name);
        tracing::info!("║  Embedding model:   {:<28}║", self.embedding_model);
        tracing::info!("╚══════════════════════════════════════════════════╝");
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.opt(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn opt(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(cfg.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.eval_model_name, DEFAULT_MODEL_NAME);
        assert!(cfg.auth_token.is_none());
    }

    #[test]
    fn test_config_overrides() {
        let cfg = config_from(&[
            ("PORT", "9100"),
            ("MODEL_NAME", "local-llm"),
            ("CHUNK_SIZE", "800"),
            ("AUTH_TOKEN", "  secret  "),
            ("DATA_DIR", "/var/lib/rag"),
        ]);
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.model_name, "local-llm");
        assert_eq!(cfg.eval_model_name, "local-llm");
        assert_eq!(cfg.chunk_size, 800);
        assert_eq!(cfg.auth_token.as_deref(), Some("secret"));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/rag"));
    }

    #[test]
    fn test_invalid_and_blank_values_fall_back() {
        let cfg = config_from(&[("PORT", "not-a-port"), ("OPENAI_API_KEY", "   "), ("CHUNK_OVERLAP", "-3")]);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
    }
}
