use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Known generation backends and their per-provider defaults. Swapping
/// providers is a config/env change, never a code change.
pub const PROVIDERS: [ProviderDefaults; 4] = [
    ProviderDefaults {
        name: "groq",
        model: "llama-3.3-70b-versatile",
        base_url: "https://api.groq.com/openai/v1",
        api_key_env: "GROQ_API_KEY",
    },
    ProviderDefaults {
        name: "openai",
        model: "gpt-4o-mini",
        base_url: "https://api.openai.com/v1",
        api_key_env: "OPENAI_API_KEY",
    },
    ProviderDefaults {
        name: "gemini",
        model: "gemini-2.0-flash",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        api_key_env: "GEMINI_API_KEY",
    },
    ProviderDefaults {
        name: "ollama",
        model: "llama3.1:8b",
        base_url: "http://localhost:11434",
        api_key_env: "",
    },
];

#[derive(Debug, Clone, Copy)]
pub struct ProviderDefaults {
    pub name: &'static str,
    pub model: &'static str,
    pub base_url: &'static str,
    pub api_key_env: &'static str,
}

#[must_use]
pub fn provider_defaults(name: &str) -> Option<ProviderDefaults> {
    PROVIDERS.iter().find(|p| p.name == name).copied()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalSection,
    pub chunking: ChunkingSection,
    pub corpus: CorpusConfig,
    pub generation: GenerationConfig,
    pub memory: MemorySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider identifier; see `PROVIDERS` for the known set.
    pub provider: String,
    /// Model override; empty means the provider's default.
    pub model: String,
    /// Base URL override; empty means the provider's default.
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".into(),
            model: String::new(),
            base_url: String::new(),
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    /// The model to use: the explicit override or the provider default.
    #[must_use]
    pub fn effective_model(&self) -> String {
        if self.model.is_empty() {
            provider_defaults(&self.provider).map_or_else(String::new, |p| p.model.to_owned())
        } else {
            self.model.clone()
        }
    }

    #[must_use]
    pub fn effective_base_url(&self) -> String {
        if self.base_url.is_empty() {
            provider_defaults(&self.provider).map_or_else(String::new, |p| p.base_url.to_owned())
        } else {
            self.base_url.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `ollama` (local) or `openai`.
    pub provider: String,
    pub model: String,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: "nomic-embed-text".into(),
            base_url: "http://localhost:11434".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub top_k: usize,
    pub score_floor: f32,
    pub history_aware: bool,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: 4,
            score_floor: 0.3,
            history_aware: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    pub target_chars: usize,
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            target_chars: 1000,
            max_chars: 2000,
            overlap_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub docs_dir: String,
    pub index_path: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            docs_dir: "./data/docs".into(),
            index_path: "./data/index.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Retries after a rate-limited attempt before degrading.
    pub max_retries: u32,
    pub embed_timeout_secs: u64,
    pub generate_timeout_secs: u64,
    /// Assembled-context budget in estimated tokens.
    pub context_budget_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            embed_timeout_secs: 15,
            generate_timeout_secs: 90,
            context_budget_tokens: 2400,
        }
    }
}

impl GenerationConfig {
    #[must_use]
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    #[must_use]
    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Conversation turns kept per session, oldest evicted first.
    pub history_turns: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self { history_turns: 5 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalSection::default(),
            chunking: ChunkingSection::default(),
            corpus: CorpusConfig::default(),
            generation: GenerationConfig::default(),
            memory: MemorySection::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DOCENT_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("DOCENT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("DOCENT_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
    }

    /// Reject configurations that cannot work before any request runs.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if provider_defaults(&self.llm.provider).is_none() {
            let known: Vec<&str> = PROVIDERS.iter().map(|p| p.name).collect();
            anyhow::bail!(
                "unknown LLM provider '{}', choose from: {}",
                self.llm.provider,
                known.join(", ")
            );
        }
        if !matches!(self.embedding.provider.as_str(), "ollama" | "openai") {
            anyhow::bail!(
                "unknown embedding provider '{}', choose from: ollama, openai",
                self.embedding.provider
            );
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.score_floor) {
            anyhow::bail!("retrieval.score_floor must be within [0, 1]");
        }
        if self.chunking.overlap_chars >= self.chunking.target_chars {
            anyhow::bail!("chunking.overlap_chars must be smaller than target_chars");
        }
        if self.chunking.max_chars < self.chunking.target_chars {
            anyhow::bail!("chunking.max_chars must be at least target_chars");
        }
        if self.memory.history_turns == 0 {
            anyhow::bail!("memory.history_turns must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = Config::load(Path::new("/nonexistent/docent.toml")).unwrap();
        assert_eq!(config.llm.provider, "groq");
        assert_eq!(config.retrieval.top_k, 4);
        assert!((config.retrieval.score_floor - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.memory.history_turns, 5);
        config.validate().unwrap();
    }

    #[test]
    fn effective_model_uses_provider_default() {
        let config = Config::default();
        assert_eq!(config.llm.effective_model(), "llama-3.3-70b-versatile");
        assert_eq!(
            config.llm.effective_base_url(),
            "https://api.groq.com/openai/v1"
        );
    }

    #[test]
    fn effective_model_prefers_override() {
        let mut config = Config::default();
        config.llm.model = "llama-3.1-8b-instant".into();
        assert_eq!(config.llm.effective_model(), "llama-3.1-8b-instant");
    }

    #[test]
    fn parse_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docent.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
[llm]
provider = "openai"

[retrieval]
top_k = 6
"#
        )
        .unwrap();

        for key in [
            "DOCENT_LLM_PROVIDER",
            "DOCENT_LLM_MODEL",
            "DOCENT_EMBEDDING_MODEL",
        ] {
            unsafe { std::env::remove_var(key) };
        }

        let config = Config::load(&path).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.effective_model(), "gpt-4o-mini");
        assert_eq!(config.retrieval.top_k, 6);
        assert_eq!(config.memory.history_turns, 5);
    }

    #[test]
    fn env_overrides() {
        let mut config = Config::default();
        unsafe { std::env::set_var("DOCENT_LLM_PROVIDER", "gemini") };
        config.apply_env_overrides();
        unsafe { std::env::remove_var("DOCENT_LLM_PROVIDER") };

        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.llm.effective_model(), "gemini-2.0-flash");
    }

    #[test]
    fn validate_rejects_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "delphi".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("unknown LLM provider"));
        assert!(err.contains("groq"));
    }

    #[test]
    fn validate_rejects_overlap_not_smaller_than_target() {
        let mut config = Config::default();
        config.chunking.overlap_chars = config.chunking.target_chars;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_top_k() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn provider_defaults_lookup() {
        assert!(provider_defaults("groq").is_some());
        assert!(provider_defaults("unknown").is_none());
        assert_eq!(provider_defaults("openai").unwrap().api_key_env, "OPENAI_API_KEY");
    }
}
