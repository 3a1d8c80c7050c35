//! Rule engine — pattern-matched canned replies with a model escape hatch
//!
//! Rules live in a CSV file of `pattern,reply` rows. Patterns are
//! case-insensitive wildcards where `*` spans anything, compiled to anchored
//! regexes at load time. The most specific matching rule wins. A reply of
//! `@llm` escalates the message to the configured [`ModelClient`]; this is
//! how a classroom bot grows from canned answers into a real assistant one
//! rule at a time.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::provider::ModelClient;

/// Reply value that routes the message to the model client.
pub const CONSULT_DIRECTIVE: &str = "@llm";

/// Reply when no rule matches.
const NO_RULE_REPLY: &str =
    "I don't have an answer for that yet. Try rephrasing, or ask the operator to teach me a new rule.";

/// Reply when an `@llm` rule fires but no model client is attached.
const NO_MODEL_REPLY: &str =
    "I'm not wired to a model right now, so I can only answer from my rule book.";

#[derive(Debug, Deserialize)]
struct RuleRow {
    pattern: String,
    reply: String,
}

/// One compiled rule.
#[derive(Debug)]
pub struct Rule {
    /// The wildcard pattern as written in the rule file.
    pub pattern: String,
    /// The canned reply, or [`CONSULT_DIRECTIVE`].
    pub reply: String,
    regex: Regex,
    /// Count of literal (non-wildcard) characters; higher matches win.
    specificity: usize,
}

impl Rule {
    fn compile(pattern: &str, reply: String) -> Result<Self> {
        if pattern.trim().is_empty() {
            bail!("empty pattern");
        }
        let regex = wildcard_regex(pattern)?;
        let specificity = pattern.chars().filter(|c| *c != '*').count();
        Ok(Self {
            pattern: pattern.to_string(),
            reply,
            regex,
            specificity,
        })
    }
}

/// The loaded rule table, checked and compiled.
pub struct RuleEngine {
    rules: Vec<Rule>,
    model: Option<Arc<dyn ModelClient>>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rules)
            .field("has_model", &self.model.is_some())
            .finish()
    }
}

impl RuleEngine {
    /// Load rules from a CSV file with a `pattern,reply` header row.
    /// Malformed rows are hard errors: a rule file is a deployment artifact,
    /// and silently dropping rows hides typos until a student hits one.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open rule file {}", path.display()))?;
        let engine = Self::from_reader(&mut reader)
            .with_context(|| format!("rule file {}", path.display()))?;
        Ok(engine)
    }

    /// Load rules from in-memory CSV content.
    pub fn from_csv_str(content: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        Self::from_reader(&mut reader)
    }

    fn from_reader<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<Self> {
        let mut rules = Vec::new();
        for (index, row) in reader.deserialize::<RuleRow>().enumerate() {
            let row = row.with_context(|| format!("row {} is malformed", index + 1))?;
            let rule = Rule::compile(&row.pattern, row.reply)
                .with_context(|| format!("row {} ('{}')", index + 1, row.pattern))?;
            rules.push(rule);
        }
        if rules.is_empty() {
            bail!("no rules declared");
        }
        info!("loaded {} rules", rules.len());
        Ok(Self { rules, model: None })
    }

    /// Attach the model client that `@llm` rules consult.
    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// The most specific rule matching `text`, if any. Ties keep the rule
    /// declared first.
    pub fn matching_rule(&self, text: &str) -> Option<&Rule> {
        let mut best: Option<&Rule> = None;
        for rule in &self.rules {
            if !rule.regex.is_match(text) {
                continue;
            }
            match best {
                Some(current) if rule.specificity <= current.specificity => {}
                _ => best = Some(rule),
            }
        }
        best
    }

    /// Answer one message: a canned reply, a model consultation, or the
    /// no-match fallback.
    pub async fn respond(&self, text: &str) -> String {
        match self.matching_rule(text) {
            Some(rule) if rule.reply == CONSULT_DIRECTIVE => match &self.model {
                Some(model) => {
                    debug!("rule '{}' escalates to the model", rule.pattern);
                    model.ask(text).await
                }
                None => NO_MODEL_REPLY.to_string(),
            },
            Some(rule) => {
                debug!("rule '{}' answers directly", rule.pattern);
                rule.reply.clone()
            }
            None => NO_RULE_REPLY.to_string(),
        }
    }
}

/// Compile a `*`-wildcard pattern into an anchored, case-insensitive regex.
/// `(?s)` lets a wildcard span line breaks in multi-line messages.
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let literals: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let expr = format!("(?is)^{}$", literals.join(".*"));
    Regex::new(&expr).with_context(|| format!("pattern '{pattern}' does not compile"))
}
