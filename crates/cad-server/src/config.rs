//! Server configuration: an optional TOML file plus environment overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cad_ai::{CompletionOptions, OpenAiConfig, PipelineConfig, RetrievalPolicy};
use cad_script::Limits;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Directory generated STL files are written to.
    pub output_dir: PathBuf,
    /// Example corpus; the bundled seed corpus is used when unset.
    pub corpus_path: Option<PathBuf>,
    pub model: ModelSection,
    pub pipeline: PipelineSection,
    pub sandbox: SandboxSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSection {
    pub base_url: String,
    /// Usually left out of the file and taken from `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub top_n: usize,
    pub retrieval_policy: RetrievalPolicy,
    pub fit_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSection {
    pub max_steps: u64,
    pub max_call_depth: usize,
    pub max_segments: usize,
    pub max_vertices: usize,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            output_dir: PathBuf::from("models"),
            corpus_path: None,
            model: ModelSection::default(),
            pipeline: PipelineSection::default(),
            sandbox: SandboxSection::default(),
        }
    }
}

impl Default for ModelSection {
    fn default() -> Self {
        let openai = OpenAiConfig::default();
        let completion = CompletionOptions::default();
        Self {
            base_url: openai.base_url,
            api_key: None,
            chat_model: openai.chat_model,
            embedding_model: openai.embedding_model,
            temperature: completion.temperature,
            max_tokens: completion.max_tokens,
            timeout_secs: openai.timeout.as_secs(),
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            top_n: pipeline.top_n,
            retrieval_policy: pipeline.retrieval_policy,
            fit_tolerance: pipeline.fit_tolerance,
        }
    }
}

impl Default for SandboxSection {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_steps: limits.max_steps,
            max_call_depth: limits.max_call_depth,
            max_segments: limits.max_segments,
            max_vertices: limits.max_vertices,
            timeout_secs: limits.max_duration.as_secs(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads `path`, or returns the defaults when there is no file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Applies `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `CAD_BIND`,
    /// `CAD_OUTPUT_DIR` and `CAD_CORPUS` as read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(bind) = lookup("CAD_BIND") {
            self.bind = bind.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CAD_BIND",
                value: bind,
            })?;
        }
        if let Some(dir) = lookup("CAD_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(corpus) = lookup("CAD_CORPUS") {
            self.corpus_path = Some(PathBuf::from(corpus));
        }
        Ok(())
    }

    pub fn openai_config(&self) -> Result<OpenAiConfig, ConfigError> {
        let api_key = self
            .model
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(OpenAiConfig {
            base_url: self.model.base_url.clone(),
            api_key,
            chat_model: self.model.chat_model.clone(),
            embedding_model: self.model.embedding_model.clone(),
            timeout: Duration::from_secs(self.model.timeout_secs.max(1)),
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let limits = Limits {
            max_steps: self.sandbox.max_steps,
            max_call_depth: self.sandbox.max_call_depth,
            max_segments: self.sandbox.max_segments,
            max_vertices: self.sandbox.max_vertices,
            max_duration: Duration::from_secs(self.sandbox.timeout_secs.max(1)),
            ..Limits::default()
        };
        PipelineConfig {
            top_n: self.pipeline.top_n,
            retrieval_policy: self.pipeline.retrieval_policy,
            fit_tolerance: self.pipeline.fit_tolerance,
            completion: CompletionOptions {
                max_tokens: self.model.max_tokens,
                temperature: self.model.temperature,
            },
            limits,
            ..PipelineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use cad_ai::RetrievalPolicy;

    use super::{ConfigError, ServerConfig};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind.port(), 3000);
        assert_eq!(config.pipeline.top_n, 2);
        assert_eq!(config.pipeline.retrieval_policy, RetrievalPolicy::Degrade);
    }

    #[test]
    fn sections_override_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            bind = "0.0.0.0:8080"
            output_dir = "/tmp/stl"

            [model]
            chat_model = "gpt-4o-mini"
            max_tokens = 2048
            temperature = 0.2

            [pipeline]
            top_n = 3
            retrieval_policy = "abort"

            [sandbox]
            max_steps = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/stl"));

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.top_n, 3);
        assert_eq!(pipeline.retrieval_policy, RetrievalPolicy::Abort);
        assert_eq!(pipeline.completion.max_tokens, 2048);
        assert_eq!(pipeline.limits.max_steps, 1000);
        assert_eq!(pipeline.limits.max_call_depth, 200);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = ServerConfig::from_toml("[model]\nchat_modle = \"x\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = ServerConfig::default();
        config
            .apply_env(env(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("OPENAI_BASE_URL", "http://localhost:9000/v1"),
                ("CAD_BIND", "127.0.0.1:4000"),
                ("CAD_OUTPUT_DIR", "out"),
                ("CAD_CORPUS", "corpus.json"),
            ]))
            .unwrap();
        assert_eq!(config.bind.port(), 4000);
        assert_eq!(config.corpus_path, Some(PathBuf::from("corpus.json")));

        let openai = config.openai_config().unwrap();
        assert_eq!(openai.api_key, "sk-test");
        assert_eq!(openai.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn bad_bind_address_is_reported() {
        let mut config = ServerConfig::default();
        let result = config.apply_env(env(&[("CAD_BIND", "not-an-address")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { key: "CAD_BIND", .. })));
    }

    #[test]
    fn api_key_is_required() {
        let mut config = ServerConfig::default();
        config.apply_env(env(&[("OPENAI_API_KEY", "  ")])).unwrap();
        assert!(matches!(config.openai_config(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = ServerConfig::load(Some(PathBuf::from("/nonexistent/cad.toml").as_path()));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
        assert_eq!(ServerConfig::load(None).unwrap(), ServerConfig::default());
    }
}
