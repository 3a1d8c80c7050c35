//! Command implementations for the strix binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::Value;
use tracing::info;

use strix_channels::{DiscordBot, Throttle};
use strix_core::provider::GenOptions;
use strix_core::{ModelProvider, RuleEngine, Settings};

#[derive(Debug, Args)]
pub struct AskArgs {
    /// The prompt to send.
    pub prompt: String,

    /// Generation option, as key=value (ollama backends only).
    /// May be repeated; values are coerced to int, float, bool, or string.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub options: Vec<String>,
}

/// `strix run`: the bot itself.
pub async fn run(settings: Settings) -> Result<()> {
    let Some(token) = settings.discord_token.clone() else {
        bail!("DISCORD_TOKEN is not set; the bot cannot sign in (try `strix doctor`)");
    };

    let mut engine = RuleEngine::from_csv_path(&settings.rules_file)?;
    match settings.provider_config()? {
        Some(config) => {
            let provider = ModelProvider::connect(config).await?;
            engine = engine.with_model(Arc::new(provider));
        }
        None => info!("SERVER_URL is not set; running on rules alone"),
    }

    let throttle = Throttle::new(
        settings.throttle_burst,
        Duration::from_secs(settings.throttle_window_secs),
    );
    DiscordBot::new(token, Arc::new(engine), throttle).run().await
}

/// `strix ask`: one prompt, straight through the pipeline.
pub async fn ask(settings: Settings, args: AskArgs) -> Result<()> {
    let config = settings
        .provider_config()?
        .context("SERVER_URL is not configured; `ask` needs a backend")?;
    let provider = ModelProvider::connect(config).await?;

    let options = parse_options(&args.options)?;
    let outcome = provider.request_with_options(&args.prompt, &options).await;

    if !outcome.state.reason.is_empty() {
        info!("routed to '{}': {}", outcome.state.model, outcome.state.reason);
    }
    if let Some(elapsed) = outcome.elapsed_secs {
        info!("answered in {elapsed}s");
    }
    println!("{}", outcome.text);
    Ok(())
}

/// `strix models`: the catalog as the routing phase sees it.
pub async fn models(settings: Settings) -> Result<()> {
    let config = settings
        .provider_config()?
        .context("SERVER_URL is not configured; `models` needs a backend")?;
    let provider = ModelProvider::connect(config).await?;

    for descriptor in provider.catalog().iter() {
        let size = descriptor
            .parameter_millions
            .map(format_size)
            .unwrap_or_else(|| "?".to_string());
        let marker = if descriptor.id == provider.recommended_model() {
            "  <- recommended"
        } else {
            ""
        };
        println!("{:<40} {:>8}{marker}", descriptor.id, size);
    }
    Ok(())
}

/// `strix doctor`: render the health report.
pub async fn doctor(settings: Settings) -> Result<()> {
    let report = strix_core::doctor::run_checks(&settings).await;
    for check in &report.checks {
        println!("[{}] {}: {}", check.status, check.name, check.message);
        if let Some(hint) = &check.fix_hint {
            println!("       hint: {hint}");
        }
    }
    println!("{}", report.summary());
    if !report.is_healthy() {
        bail!("doctor found problems");
    }
    Ok(())
}

fn format_size(millions: f64) -> String {
    if millions >= 1000.0 {
        format!("{:.1}B", millions / 1000.0)
    } else {
        format!("{millions:.0}M")
    }
}

/// Parse repeated `--set key=value` flags into generation options.
fn parse_options(pairs: &[String]) -> Result<GenOptions> {
    let mut options = GenOptions::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("option '{pair}' is not in key=value form");
        };
        options.insert(key.trim().to_string(), coerce(value.trim()));
    }
    Ok(options)
}

/// Coerce an option value the way operators expect: int, then float, then
/// bool, then string.
fn coerce(value: &str) -> Value {
    if let Ok(int) = value.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = value.parse::<f64>() {
        return Value::from(float);
    }
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_option_values_by_type() {
        assert_eq!(coerce("42"), Value::from(42));
        assert_eq!(coerce("0.7"), Value::from(0.7));
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("false"), Value::Bool(false));
        assert_eq!(coerce("llama3"), Value::from("llama3"));
    }

    #[test]
    fn parses_repeated_set_flags() {
        let options = parse_options(&[
            "temperature=0.2".to_string(),
            "num_predict=256".to_string(),
        ])
        .unwrap();
        assert_eq!(options["temperature"], Value::from(0.2));
        assert_eq!(options["num_predict"], Value::from(256));
    }

    #[test]
    fn rejects_flags_without_an_equals_sign() {
        assert!(parse_options(&["temperature".to_string()]).is_err());
    }

    #[test]
    fn formats_sizes_for_the_models_table() {
        assert_eq!(format_size(137.0), "137M");
        assert_eq!(format_size(7000.0), "7.0B");
        assert_eq!(format_size(13500.0), "13.5B");
    }
}
