//! Doctor — deployment health checks
//!
//! A classroom deployment breaks in predictable ways: the token never made
//! it into `.env`, the rules file has a typo, the backend URL points at a
//! machine that went home for the day. `strix doctor` walks those failure
//! modes and says which one it found.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Settings;
use crate::engine::RuleEngine;
use crate::provider::ModelProvider;

/// Result of a single health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub fix_hint: Option<String>,
}

/// Status of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skip,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Fail => write!(f, "FAIL"),
            CheckStatus::Skip => write!(f, "SKIP"),
        }
    }
}

/// Full doctor report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
    pub pass_count: usize,
    pub warn_count: usize,
    pub fail_count: usize,
    pub skip_count: usize,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.fail_count == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} warnings, {} failed, {} skipped",
            self.pass_count, self.warn_count, self.fail_count, self.skip_count
        )
    }
}

/// Run all doctor checks against the loaded settings.
pub async fn run_checks(settings: &Settings) -> DoctorReport {
    info!("Running doctor checks...");
    let mut checks = Vec::new();

    checks.push(check_discord_token(settings));
    checks.push(check_rules_file(settings));

    match settings.provider_config() {
        Err(e) => checks.push(CheckResult {
            name: "provider_config".to_string(),
            status: CheckStatus::Fail,
            message: format!("Provider configuration is broken: {e:#}"),
            fix_hint: Some("Set SERVER_TYPE to \"ollama\" or \"open-webui\"".to_string()),
        }),
        Ok(None) => checks.push(CheckResult {
            name: "provider_config".to_string(),
            status: CheckStatus::Skip,
            message: "SERVER_URL is not set; the bot runs on rules alone".to_string(),
            fix_hint: None,
        }),
        Ok(Some(config)) => {
            checks.push(CheckResult {
                name: "provider_config".to_string(),
                status: CheckStatus::Pass,
                message: format!("Provider configured: {} backend at {}", config.backend, config.base_url),
                fix_hint: None,
            });
            let base_url = config.base_url.clone();
            match ModelProvider::connect(config).await {
                Ok(provider) => {
                    checks.push(CheckResult {
                        name: "backend_catalog".to_string(),
                        status: CheckStatus::Pass,
                        message: format!(
                            "Backend lists {} models, recommending '{}'",
                            provider.catalog().len(),
                            provider.recommended_model()
                        ),
                        fix_hint: None,
                    });
                    checks.push(check_configured_model(settings, &provider));
                }
                Err(e) => checks.push(CheckResult {
                    name: "backend_catalog".to_string(),
                    status: CheckStatus::Fail,
                    message: format!("Cannot read the model catalog from {base_url}: {e}"),
                    fix_hint: Some(
                        "Check SERVER_URL, SERVER_API_KEY, and that the backend is running".to_string(),
                    ),
                }),
            }
        }
    }

    let pass_count = checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
    let warn_count = checks.iter().filter(|c| c.status == CheckStatus::Warn).count();
    let fail_count = checks.iter().filter(|c| c.status == CheckStatus::Fail).count();
    let skip_count = checks.iter().filter(|c| c.status == CheckStatus::Skip).count();

    let report = DoctorReport {
        checks,
        pass_count,
        warn_count,
        fail_count,
        skip_count,
    };

    if report.is_healthy() {
        info!("Doctor: all checks passed ({})", report.summary());
    } else {
        warn!("Doctor: issues found ({})", report.summary());
    }

    report
}

fn check_discord_token(settings: &Settings) -> CheckResult {
    match &settings.discord_token {
        Some(token) if !token.is_empty() => {
            // Char-wise so a multi-byte token cannot split mid-character.
            let chars: Vec<char> = token.chars().collect();
            let masked = if chars.len() > 8 {
                let head: String = chars[..4].iter().collect();
                let tail: String = chars[chars.len() - 4..].iter().collect();
                format!("{head}...{tail}")
            } else {
                "****".to_string()
            };
            CheckResult {
                name: "discord_token".to_string(),
                status: CheckStatus::Pass,
                message: format!("DISCORD_TOKEN is set ({masked})"),
                fix_hint: None,
            }
        }
        _ => CheckResult {
            name: "discord_token".to_string(),
            status: CheckStatus::Fail,
            message: "DISCORD_TOKEN is not set".to_string(),
            fix_hint: Some("Put DISCORD_TOKEN=\"your-bot-token\" in .env".to_string()),
        },
    }
}

fn check_rules_file(settings: &Settings) -> CheckResult {
    match RuleEngine::from_csv_path(&settings.rules_file) {
        Ok(engine) => CheckResult {
            name: "rules_file".to_string(),
            status: CheckStatus::Pass,
            message: format!(
                "Rule file {} loads ({} rules)",
                settings.rules_file.display(),
                engine.rule_count()
            ),
            fix_hint: None,
        },
        Err(e) => CheckResult {
            name: "rules_file".to_string(),
            status: CheckStatus::Fail,
            message: format!("Rule file does not load: {e:#}"),
            fix_hint: Some("Point STRIX_RULES at a CSV of pattern,reply rows".to_string()),
        },
    }
}

fn check_configured_model(settings: &Settings, provider: &ModelProvider) -> CheckResult {
    match &settings.server_model {
        None => CheckResult {
            name: "configured_model".to_string(),
            status: CheckStatus::Skip,
            message: "SERVER_MODEL is not set; routing starts from the recommendation".to_string(),
            fix_hint: None,
        },
        Some(model) if provider.catalog().get(model).is_some() => CheckResult {
            name: "configured_model".to_string(),
            status: CheckStatus::Pass,
            message: format!("SERVER_MODEL '{model}' is in the catalog"),
            fix_hint: None,
        },
        Some(model) => CheckResult {
            name: "configured_model".to_string(),
            status: CheckStatus::Warn,
            message: format!("SERVER_MODEL '{model}' is not in the backend's catalog"),
            fix_hint: Some(format!(
                "Pick one of: {}",
                provider.catalog().names().join(", ")
            )),
        },
    }
}
