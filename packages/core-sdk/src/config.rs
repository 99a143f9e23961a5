use std::{collections::HashMap, fmt, path::Path, time::Duration};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_TIMEOUT: &str = "REQUEST_TIMEOUT_SECONDS";
pub const ENV_CORS_ORIGINS: &str = "CORS_ORIGINS";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_CORS_ORIGINS: &str =
    "http://localhost:5173,http://127.0.0.1:5173,http://localhost:4173,http://127.0.0.1:4173";

const KEYS: [&str; 5] = [
    ENV_API_KEY,
    ENV_MODEL,
    ENV_BASE_URL,
    ENV_TIMEOUT,
    ENV_CORS_ORIGINS,
];

/**
 * \brief Configuration failures. Also raised when a provider client is built without a usable key.
 */
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set in the environment")]
    MissingApiKey,
    #[error("OPENAI_API_KEY looks like a placeholder. Edit .env and set your real key (sk-...).")]
    PlaceholderApiKey,
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read override file {path}: {source}")]
    OverrideFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/**
 * \brief Process-wide settings, loaded once at startup and shared read-only.
 */
#[derive(Clone, PartialEq)]
pub struct Settings {
    /** \brief Provider API key; `None` is a legal, degraded state. */
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    /** \brief Base URL of an OpenAI-compatible API (without `/v1`). */
    pub openai_base_url: String,
    pub request_timeout_seconds: f64,
    pub cors_origins: Vec<String>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("openai_model", &self.openai_model)
            .field("openai_base_url", &self.openai_base_url)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: DEFAULT_MODEL.to_string(),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_seconds: DEFAULT_TIMEOUT_SECS,
            cors_origins: parse_origins(DEFAULT_CORS_ORIGINS),
        }
    }
}

impl Settings {
    /**
     * \brief Resolve settings from the process environment.
     * \param override_file Optional dotenv file; its values win over exported variables.
     *
     * A missing override file is not an error. The process environment is never modified.
     */
    pub fn load(override_file: Option<&Path>) -> Result<Self, ConfigError> {
        let overrides = match override_file {
            Some(path) => read_override_file(path)?,
            None => HashMap::new(),
        };
        Self::from_layers(&overrides, |key| std::env::var(key).ok())
    }

    /**
     * \brief Resolve each key from the override map first, then from `env`.
     */
    fn from_layers<E>(overrides: &HashMap<String, String>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        Self::from_lookup(|key| overrides.get(key).cloned().or_else(|| env(key)))
    }

    /**
     * \brief Build settings from an arbitrary key lookup.
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let openai_api_key = lookup(ENV_API_KEY)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let openai_model = lookup(ENV_MODEL)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let openai_base_url = lookup(ENV_BASE_URL)
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let request_timeout_seconds = match lookup(ENV_TIMEOUT) {
            Some(raw) => parse_timeout(&raw)?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let cors_origins = parse_origins(
            lookup(ENV_CORS_ORIGINS)
                .as_deref()
                .unwrap_or(DEFAULT_CORS_ORIGINS),
        );

        Ok(Self {
            openai_api_key,
            openai_model,
            openai_base_url,
            request_timeout_seconds,
            cors_origins,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_seconds)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }

    pub fn has_api_key(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

fn read_override_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let to_err = |source: dotenvy::Error| ConfigError::OverrideFile {
        path: path.display().to_string(),
        source,
    };
    let mut out = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(to_err)? {
        let (key, value) = item.map_err(to_err)?;
        if KEYS.contains(&key.as_str()) {
            out.insert(key, value);
        }
    }
    Ok(out)
}

fn parse_timeout(raw: &str) -> Result<f64, ConfigError> {
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            key: ENV_TIMEOUT,
            value: raw.to_string(),
        }),
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        if !origins.iter().any(|o| o == origin) {
            origins.push(origin.to_string());
        }
    }
    origins
}
