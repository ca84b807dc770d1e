//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use gateway_core::ScoringWeights;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Tool exposure configuration
    pub exposure: ExposureConfig,
    /// Session tracking configuration
    pub sessions: SessionConfig,
    /// Backend configurations, keyed by backend id
    pub backends: HashMap<String, BackendConfig>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Environment overrides (MCP_TOOLHUB_ prefix, `__` for nesting)
        figment = figment.merge(Env::prefixed("MCP_TOOLHUB_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in backend launch descriptors
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        for backend in self.backends.values_mut() {
            for value in backend.env.values_mut() {
                *value = expand_string(&re, value);
            }
            for arg in &mut backend.args {
                *arg = expand_string(&re, arg);
            }
            if let Some(ref mut cwd) = backend.cwd {
                *cwd = expand_home(&expand_string(&re, cwd));
            }
        }
        Ok(())
    }

    /// Cross-field checks that serde cannot express
    fn validate(&self) -> Result<()> {
        for (id, backend) in &self.backends {
            if backend.command.trim().is_empty() {
                return Err(Error::Config(format!("Backend '{id}' has no command")));
            }
        }
        if self.sessions.sweep_interval.is_zero() {
            return Err(Error::Config(
                "sessions.sweep_interval must be greater than zero".to_string(),
            ));
        }
        if self.exposure.default_limit > self.exposure.max_limit {
            return Err(Error::Config(format!(
                "exposure.default_limit ({}) exceeds exposure.max_limit ({})",
                self.exposure.default_limit, self.exposure.max_limit
            )));
        }
        Ok(())
    }

    /// Get enabled backends only
    pub fn enabled_backends(&self) -> impl Iterator<Item = (&String, &BackendConfig)> {
        self.backends.iter().filter(|(_, b)| b.enabled)
    }
}

/// Replace a leading `~` with the home directory
fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39410,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Tool exposure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Operations always shown to callers, in display order
    pub essential: Vec<String>,
    /// Matched-tier size when the caller gives no limit
    pub default_limit: usize,
    /// Upper bound on a caller-supplied limit
    pub max_limit: usize,
    /// Relevance scoring weights
    pub weights: ScoringWeights,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            essential: Vec::new(),
            default_limit: 10,
            max_limit: 50,
            weights: ScoringWeights::default(),
        }
    }
}

/// Session tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are swept
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// How often the expiry sweep runs
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Backend configuration (the launch descriptor)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Human-readable description
    pub description: String,
    /// Whether backend is connected at startup
    pub enabled: bool,
    /// Command to execute
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables for the subprocess
    pub env: HashMap<String, String>,
    /// Working directory
    pub cwd: Option<String>,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Timeout for spawn + initialize handshake
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            enabled: true,
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(15),
        }
    }
}

impl BackendConfig {
    /// Stdio backend from a command and its arguments
    pub fn stdio(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            ..Self::default()
        }
    }

    /// Resolve program and argument list.
    ///
    /// When `args` is empty, `command` may carry the whole command line and is
    /// split with shell quoting rules.
    ///
    /// # Errors
    ///
    /// Returns a config error for an empty or unparseable command.
    pub fn program_and_args(&self) -> Result<(String, Vec<String>)> {
        if !self.args.is_empty() {
            return Ok((self.command.clone(), self.args.clone()));
        }
        let mut parts = shlex::split(&self.command)
            .ok_or_else(|| Error::Config(format!("Unparseable command: {}", self.command)))?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("Empty command".to_string()))?;
        Ok((program, parts.collect()))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "1500ms")
    ///
    /// Whole seconds are written in seconds, anything else in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "24h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "24h", "100ms" or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns a message for malformed input or a value that overflows.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            return number(ms, s).map(Duration::from_millis);
        }
        let (digits, unit_secs) = if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };
        number(digits, s)?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    }

    fn number(digits: &str, input: &str) -> Result<u64, String> {
        digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{input}': {e}"))
    }
}
