//! Layered settings: defaults, then `strix.toml`, then the environment
//!
//! The environment always wins, because classroom deployments configure the
//! bot through `.env` files. The TOML layer exists for installs that prefer
//! a checked-in config. Variable names follow the deployment contract the
//! bot has always used (`DISCORD_TOKEN`, `SERVER_URL`, `SERVER_TYPE`,
//! `SERVER_MODEL`, `SERVER_API_KEY`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::provider::{Backend, ProviderConfig};

/// Rule file used when neither the environment nor the TOML layer names one.
pub const DEFAULT_RULES_FILE: &str = "rules/starter.csv";

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_THROTTLE_BURST: usize = 5;
const DEFAULT_THROTTLE_WINDOW_SECS: u64 = 30;

/// Everything the bot needs to start, after layering.
#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: Option<String>,
    pub rules_file: PathBuf,
    /// Backend base URL. `None` means run on rules alone.
    pub server_url: Option<String>,
    /// Raw backend token; parsed into a [`Backend`] on conversion.
    pub server_type: Option<String>,
    pub server_model: Option<String>,
    pub server_api_key: Option<String>,
    pub timeout_secs: u64,
    pub throttle_burst: usize,
    pub throttle_window_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    #[serde(default)]
    discord: DiscordSection,
    #[serde(default)]
    provider: ProviderSection,
    #[serde(default)]
    engine: EngineSection,
    #[serde(default)]
    throttle: ThrottleSection,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordSection {
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSection {
    base_url: Option<String>,
    backend: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSection {
    rules: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ThrottleSection {
    burst: Option<usize>,
    window_secs: Option<u64>,
}

impl Settings {
    /// Layer defaults, the optional TOML file, and the process environment.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        let file = read_file_settings(explicit_file)?;
        let env: HashMap<String, String> = std::env::vars().collect();
        Ok(Self::from_layers(file, &env))
    }

    fn from_layers(file: FileSettings, env: &HashMap<String, String>) -> Self {
        Self {
            discord_token: env_get(env, "DISCORD_TOKEN").or(file.discord.token),
            rules_file: env_get(env, "STRIX_RULES")
                .map(PathBuf::from)
                .or(file.engine.rules)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_FILE)),
            server_url: env_get(env, "SERVER_URL").or(file.provider.base_url),
            server_type: env_get(env, "SERVER_TYPE").or(file.provider.backend),
            server_model: env_get(env, "SERVER_MODEL").or(file.provider.model),
            server_api_key: env_get(env, "SERVER_API_KEY").or(file.provider.api_key),
            timeout_secs: env_get(env, "STRIX_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .or(file.provider.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            throttle_burst: file.throttle.burst.unwrap_or(DEFAULT_THROTTLE_BURST),
            throttle_window_secs: file
                .throttle
                .window_secs
                .unwrap_or(DEFAULT_THROTTLE_WINDOW_SECS),
        }
    }

    /// The provider connection, when one is configured. A base URL without a
    /// recognizable backend type is a hard error; a missing base URL just
    /// means the bot runs on rules alone.
    pub fn provider_config(&self) -> Result<Option<ProviderConfig>> {
        let Some(base_url) = &self.server_url else {
            return Ok(None);
        };
        let backend: Backend = self
            .server_type
            .as_deref()
            .unwrap_or_default()
            .parse()
            .context("SERVER_TYPE must be \"ollama\" or \"open-webui\" when SERVER_URL is set")?;
        Ok(Some(ProviderConfig {
            base_url: base_url.clone(),
            api_key: self.server_api_key.clone(),
            model: self.server_model.clone(),
            backend,
            timeout: Duration::from_secs(self.timeout_secs),
        }))
    }
}

/// An environment value, with empty strings treated as unset.
fn env_get(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.is_empty()).cloned()
}

fn read_file_settings(explicit_file: Option<&Path>) -> Result<FileSettings> {
    let Some(path) = locate_file(explicit_file) else {
        debug!("no strix.toml found; using defaults and the environment");
        return Ok(FileSettings::default());
    };
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: FileSettings =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    debug!("loaded settings from {}", path.display());
    Ok(parsed)
}

/// An explicitly named file must exist (reading it will fail loudly if not);
/// the search locations are optional.
fn locate_file(explicit_file: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_file {
        return Some(path.to_path_buf());
    }
    let cwd = PathBuf::from("strix.toml");
    if cwd.exists() {
        return Some(cwd);
    }
    let in_config_dir = dirs::config_dir()?.join("strix").join("strix.toml");
    in_config_dir.exists().then_some(in_config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_file_or_environment() {
        let settings = Settings::from_layers(FileSettings::default(), &no_env());
        assert!(settings.discord_token.is_none());
        assert!(settings.server_url.is_none());
        assert_eq!(settings.rules_file, PathBuf::from(DEFAULT_RULES_FILE));
        assert_eq!(settings.timeout_secs, 120);
        assert_eq!(settings.throttle_burst, 5);
        assert_eq!(settings.throttle_window_secs, 30);
    }

    #[test]
    fn the_environment_beats_the_file() {
        let file: FileSettings = toml::from_str(
            r#"
            [provider]
            base_url = "http://from-file:11434"
            backend = "ollama"
            "#,
        )
        .unwrap();
        let env = env_of(&[("SERVER_URL", "http://from-env:11434")]);
        let settings = Settings::from_layers(file, &env);
        assert_eq!(settings.server_url.as_deref(), Some("http://from-env:11434"));
        assert_eq!(settings.server_type.as_deref(), Some("ollama"));
    }

    #[test]
    fn empty_environment_values_are_unset() {
        let env = env_of(&[("DISCORD_TOKEN", "")]);
        let settings = Settings::from_layers(FileSettings::default(), &env);
        assert!(settings.discord_token.is_none());
    }

    #[test]
    fn the_file_fills_every_section() {
        let file: FileSettings = toml::from_str(
            r#"
            [discord]
            token = "token-from-file"

            [provider]
            base_url = "http://localhost:11434"
            backend = "ollama"
            model = "llama3:latest"
            api_key = "secret"
            timeout_secs = 60

            [engine]
            rules = "custom/rules.csv"

            [throttle]
            burst = 3
            window_secs = 10
            "#,
        )
        .unwrap();
        let settings = Settings::from_layers(file, &no_env());
        assert_eq!(settings.discord_token.as_deref(), Some("token-from-file"));
        assert_eq!(settings.rules_file, PathBuf::from("custom/rules.csv"));
        assert_eq!(settings.timeout_secs, 60);
        assert_eq!(settings.throttle_burst, 3);
        let provider = settings.provider_config().unwrap().unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.backend, Backend::Ollama);
        assert_eq!(provider.model.as_deref(), Some("llama3:latest"));
        assert_eq!(provider.timeout, Duration::from_secs(60));
    }

    #[test]
    fn no_base_url_means_no_provider() {
        let settings = Settings::from_layers(FileSettings::default(), &no_env());
        assert!(settings.provider_config().unwrap().is_none());
    }

    #[test]
    fn a_base_url_without_a_backend_type_is_an_error() {
        let env = env_of(&[("SERVER_URL", "http://localhost:11434")]);
        let settings = Settings::from_layers(FileSettings::default(), &env);
        let err = settings.provider_config().unwrap_err();
        assert!(err.to_string().contains("SERVER_TYPE"));
    }

    #[test]
    fn an_unknown_backend_type_is_an_error() {
        let env = env_of(&[
            ("SERVER_URL", "http://localhost:11434"),
            ("SERVER_TYPE", "mystery"),
        ]);
        let settings = Settings::from_layers(FileSettings::default(), &env);
        assert!(settings.provider_config().is_err());
    }

    #[test]
    fn timeout_reaches_the_provider_config() {
        let env = env_of(&[
            ("SERVER_URL", "http://localhost:11434"),
            ("SERVER_TYPE", "open-webui"),
            ("STRIX_TIMEOUT_SECS", "15"),
        ]);
        let settings = Settings::from_layers(FileSettings::default(), &env);
        let provider = settings.provider_config().unwrap().unwrap();
        assert_eq!(provider.backend, Backend::OpenWebUi);
        assert_eq!(provider.timeout, Duration::from_secs(15));
    }

    #[test]
    fn reads_an_explicit_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discord]\ntoken = \"abc\"").unwrap();
        let parsed = read_file_settings(Some(file.path())).unwrap();
        assert_eq!(parsed.discord.token.as_deref(), Some("abc"));
    }

    #[test]
    fn a_missing_explicit_file_is_an_error() {
        assert!(read_file_settings(Some(Path::new("/no/such/strix.toml"))).is_err());
    }

    #[test]
    fn a_broken_toml_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not [ valid").unwrap();
        assert!(read_file_settings(Some(file.path())).is_err());
    }
}
