use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::errors::AgentError;

pub const DEFAULT_WHISPER_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_CHAT_COMPLETION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CODER_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_base_url: Url,
    pub openai_api_key: String,
    pub whisper_model: String,
    pub chat_completion_model: String,
    pub coder_model: String,
    pub bind_addr: SocketAddr,
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub log_dir: Option<PathBuf>,
}

/// Load variables from a `.env` file in the working directory.
///
/// Returns the loaded path, or `None` when there is no file. Runs before
/// logging is set up, so the caller reports the outcome.
pub fn load_dotenv() -> Result<Option<PathBuf>, AgentError> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) => dotenv_outcome(e),
    }
}

/// Like [`load_dotenv`] for an explicit file.
pub fn load_dotenv_from(path: &Path) -> Result<Option<PathBuf>, AgentError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(Some(path.to_path_buf())),
        Err(e) => dotenv_outcome(e),
    }
}

fn dotenv_outcome(error: dotenvy::Error) -> Result<Option<PathBuf>, AgentError> {
    match error {
        dotenvy::Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        e => Err(AgentError::Config(format!(".env: {e}"))),
    }
}

/// Worker count used when `WORKERS` is not set: two per core plus one.
#[must_use]
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    cpus * 2 + 1
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AgentError::Config(format!("{key}: environment variable not found")))
        };

        let raw_base_url = required("OPENAI_BASE_URL")?;
        let openai_base_url = Url::parse(raw_base_url.trim())
            .map_err(|e| AgentError::Config(format!("OPENAI_BASE_URL: {e}")))?;

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e| AgentError::Config(format!("BIND_ADDR: {e}")))?;

        let workers = match lookup("WORKERS") {
            Some(v) => v
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| AgentError::Config(format!("WORKERS: invalid value '{v}'")))?,
            None => default_workers(),
        };

        let request_timeout_secs = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().map_err(|e| {
                AgentError::Config(format!("REQUEST_TIMEOUT_SECS: {e}"))
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Self {
            openai_base_url,
            openai_api_key: required("OPENAI_API_KEY")?,
            whisper_model: lookup("WHISPER_MODEL")
                .unwrap_or_else(|| DEFAULT_WHISPER_MODEL.to_string()),
            chat_completion_model: lookup("CHAT_COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_CHAT_COMPLETION_MODEL.to_string()),
            coder_model: lookup("CODER_MODEL").unwrap_or_else(|| DEFAULT_CODER_MODEL.to_string()),
            bind_addr,
            workers,
            request_timeout_secs,
            log_dir: lookup("LOG_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// Resolve an API path such as `chat/completions` against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, AgentError> {
        join_endpoint(&self.openai_base_url, path)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
pub(crate) fn join_endpoint(base: &Url, path: &str) -> Result<Url, AgentError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| AgentError::Config(format!("Invalid endpoint '{path}': {e}")))
}
