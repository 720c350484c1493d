//! Robust judge call protocol
//!
//! Models are tried in chain order. For each model:
//!
//! 1. Generate (the backend retries transport failures on its own).
//! 2. Extract one JSON object from the reply. If that fails, replay the
//!    reply with a correction request exactly once.
//! 3. Validate keys and types. A valid-looking but useless reply is a
//!    logical failure: it is written to the diagnostic log and the chain
//!    moves on to the next model.
//!
//! A call that exceeds the per-call timeout counts as a logical failure.
//! Only when every model is spent does the caller see
//! [`JudgeError::Exhausted`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use verso_core::{Item, ItemScore, QualityVerdict, Strategy, MAX_SCORE, MIN_SCORE};

use crate::backend::{LlmBackend, LlmConfig, OllamaBackend};
use crate::diagnostics::{excerpt, DiagnosticLog, DiagnosticRecord};
use crate::prompt::{self, Message};
use crate::{JudgeError, LlmError};

/// Ordered model chain with self-correction and fallback
pub struct JudgeProtocol {
    chain: Vec<Arc<dyn LlmBackend>>,
    call_timeout: Duration,
    diagnostics: Option<DiagnosticLog>,
}

impl JudgeProtocol {
    pub fn new(chain: Vec<Arc<dyn LlmBackend>>, call_timeout: Duration) -> Self {
        Self {
            chain,
            call_timeout,
            diagnostics: None,
        }
    }

    /// Build an Ollama chain from settings
    pub fn from_config(config: &verso_config::JudgeConfig) -> Result<Self, LlmError> {
        let mut chain: Vec<Arc<dyn LlmBackend>> = Vec::with_capacity(config.models.len());
        for llm in LlmConfig::chain_from(config) {
            chain.push(Arc::new(OllamaBackend::new(llm)?));
        }
        if chain.is_empty() {
            return Err(LlmError::Configuration("judge model chain is empty".to_string()));
        }

        // The backend's own timeout bounds one HTTP request; the protocol
        // timeout also covers its retries.
        let per_call = Duration::from_secs(config.call_timeout_secs)
            * config.max_attempts.max(1);

        let mut protocol = Self::new(chain, per_call);
        if let Some(path) = &config.diagnostic_log_path {
            protocol = protocol.with_diagnostics(DiagnosticLog::new(path));
        }
        Ok(protocol)
    }

    pub fn with_diagnostics(mut self, log: DiagnosticLog) -> Self {
        self.diagnostics = Some(log);
        self
    }

    pub fn models(&self) -> Vec<&str> {
        self.chain.iter().map(|b| b.model_name()).collect()
    }

    /// Run a prompt through the chain until `validate` accepts a reply
    pub async fn call<T, F>(&self, messages: &[Message], validate: F) -> Result<T, JudgeError>
    where
        F: Fn(&Value) -> Result<T, String>,
    {
        let mut last = String::from("no models configured");

        for backend in &self.chain {
            let model = backend.model_name();

            let raw = match self.generate(backend.as_ref(), messages).await {
                Ok(raw) => raw,
                Err(JudgeError::Timeout(ms)) => {
                    last = format!("{}: timed out after {} ms", model, ms);
                    self.record(model, "timeout", messages, "");
                    tracing::warn!(model, timeout_ms = ms, "Judge call timed out, escalating");
                    continue;
                }
                Err(e) => {
                    last = format!("{}: {}", model, e);
                    tracing::warn!(model, error = %e, "Judge backend failed, escalating");
                    continue;
                }
            };

            let value = match extract_json(&raw) {
                Some(v) => v,
                None => {
                    tracing::warn!(
                        model,
                        raw = %excerpt(&raw, 200),
                        "Judge reply is not JSON, requesting self-correction"
                    );
                    let retry = prompt::correction(messages, &raw);
                    match self.generate(backend.as_ref(), &retry).await {
                        Ok(fixed) => match extract_json(&fixed) {
                            Some(v) => v,
                            None => {
                                last = format!("{}: unparseable after self-correction", model);
                                self.record(model, "unparseable", messages, &fixed);
                                tracing::warn!(
                                    model,
                                    raw = %excerpt(&fixed, 200),
                                    "Self-correction still not JSON, escalating"
                                );
                                continue;
                            }
                        },
                        Err(e) => {
                            last = format!("{}: self-correction failed: {}", model, e);
                            tracing::warn!(model, error = %e, "Self-correction call failed");
                            continue;
                        }
                    }
                }
            };

            match validate(&value) {
                Ok(result) => return Ok(result),
                Err(reason) => {
                    last = format!("{}: {}", model, reason);
                    let raw_value = value.to_string();
                    self.record(model, &reason, messages, &raw_value);
                    tracing::warn!(
                        model,
                        reason = %reason,
                        raw = %excerpt(&raw_value, 200),
                        "Judge logical failure, escalating"
                    );
                }
            }
        }

        Err(JudgeError::Exhausted {
            attempts: self.chain.len(),
            last,
        })
    }

    async fn generate(
        &self,
        backend: &dyn LlmBackend,
        messages: &[Message],
    ) -> Result<String, JudgeError> {
        match tokio::time::timeout(self.call_timeout, backend.generate(messages)).await {
            Ok(Ok(result)) => Ok(result.text),
            Ok(Err(LlmError::Timeout)) => Err(JudgeError::Timeout(self.call_timeout.as_millis() as u64)),
            Ok(Err(e)) => Err(JudgeError::Backend(e)),
            Err(_) => Err(JudgeError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }

    fn record(&self, model: &str, reason: &str, messages: &[Message], raw: &str) {
        if let Some(log) = &self.diagnostics {
            let prompt = messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            log.append(&DiagnosticRecord::new(model, reason, prompt, raw));
        }
    }
}

/// Pull one JSON object out of a model reply
///
/// Code fences are ignored; the object spans the first `{` to the last `}`.
pub fn extract_json(raw: &str) -> Option<Value> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(v) if v.is_object() => Some(v),
        _ => None,
    }
}

fn as_score(value: &Value) -> Option<f32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    let n = n as f32;
    n.is_finite().then(|| n.clamp(MIN_SCORE, MAX_SCORE))
}

/// Validate a scoring reply against the ids that were asked for
///
/// Entries may be `{"score": n, "rationale": s}` or a bare number. Unknown
/// ids are dropped. Zero usable scores is a logical failure.
pub fn parse_verdict(value: &Value, expected: &HashSet<&str>) -> Result<QualityVerdict, String> {
    let overall_score = value
        .get("overall_score")
        .and_then(as_score)
        .ok_or_else(|| "missing or non-numeric overall_score".to_string())?;

    let overall_rationale = value
        .get("overall_rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let entries = value
        .get("item_scores")
        .and_then(Value::as_object)
        .ok_or_else(|| "missing item_scores object".to_string())?;

    let mut item_scores = HashMap::new();
    for (id, entry) in entries {
        if !expected.contains(id.as_str()) {
            continue;
        }
        let parsed = match entry {
            Value::Object(obj) => obj.get("score").and_then(as_score).map(|score| ItemScore {
                score,
                rationale: obj
                    .get("rationale")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            other => as_score(other).map(|score| ItemScore {
                score,
                rationale: String::new(),
            }),
        };
        if let Some(s) = parsed {
            item_scores.insert(id.clone(), s);
        }
    }

    if item_scores.is_empty() && !expected.is_empty() {
        return Err("no usable item scores".to_string());
    }

    Ok(QualityVerdict {
        overall_score,
        overall_rationale,
        item_scores,
        failed_batches: 0,
    })
}

fn parse_applicable(value: &Value) -> Result<bool, String> {
    match value.get("applicable") {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "yes" | "true" | "kyllä" => Ok(true),
            "no" | "false" | "ei" => Ok(false),
            other => Err(format!("applicable is not yes/no: {}", other)),
        },
        _ => Err("missing boolean applicable".to_string()),
    }
}

fn non_empty_str(value: &Value, key: &str) -> Result<String, String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("missing non-empty string {}", key))
}

fn parse_keywords(value: &Value) -> Result<Vec<String>, String> {
    let keywords: Vec<String> = match value.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .take(2)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_lowercase()],
        _ => Vec::new(),
    };

    if keywords.is_empty() {
        Err("missing keywords".to_string())
    } else {
        Ok(keywords)
    }
}

/// [`verso_core::Judge`] over an LLM chain
pub struct LlmJudge {
    protocol: JudgeProtocol,
    batch_size: usize,
}

impl LlmJudge {
    pub fn new(protocol: JudgeProtocol, batch_size: usize) -> Self {
        Self {
            protocol,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &verso_config::JudgeConfig) -> Result<Self, LlmError> {
        Ok(Self::new(JudgeProtocol::from_config(config)?, config.batch_size))
    }

    pub fn protocol(&self) -> &JudgeProtocol {
        &self.protocol
    }
}

#[async_trait]
impl verso_core::Judge for LlmJudge {
    async fn score_items(&self, topic: &str, items: &[Item]) -> verso_core::Result<QualityVerdict> {
        if items.is_empty() {
            return Ok(QualityVerdict {
                overall_score: 0.0,
                overall_rationale: String::new(),
                item_scores: HashMap::new(),
                failed_batches: 0,
            });
        }

        let mut verdicts = Vec::new();
        let mut last_error = None;
        let mut failed = 0usize;

        for batch in items.chunks(self.batch_size) {
            let expected: HashSet<&str> = batch.iter().map(|i| i.id.as_str()).collect();
            let messages = prompt::score_items(topic, batch);
            match self
                .protocol
                .call(&messages, |v| parse_verdict(v, &expected))
                .await
            {
                Ok(v) => verdicts.push(v),
                Err(e) => {
                    tracing::error!(
                        query = %topic,
                        batch = batch.len(),
                        error = %e,
                        "Judge could not score batch"
                    );
                    last_error = Some(e);
                    failed += 1;
                }
            }
        }

        match QualityVerdict::merge(verdicts) {
            Some(mut v) => {
                v.failed_batches += failed;
                Ok(v)
            }
            None => Err(last_error
                .map(Into::into)
                .unwrap_or_else(|| verso_core::Error::JudgeUnparseable("no batches".to_string()))),
        }
    }

    async fn is_applicable(&self, query: &str, strategy: &Strategy) -> verso_core::Result<bool> {
        let messages = prompt::applicability(query, strategy);
        Ok(self.protocol.call(&messages, parse_applicable).await?)
    }

    async fn propose_expansion(
        &self,
        query: &str,
        rationale: &str,
        previous: Option<&str>,
    ) -> verso_core::Result<String> {
        let messages = prompt::propose_expansion(query, rationale, previous);
        Ok(self
            .protocol
            .call(&messages, |v| non_empty_str(v, "expansion"))
            .await?)
    }

    async fn derive_keywords(&self, expansion: &str) -> verso_core::Result<Vec<String>> {
        let messages = prompt::derive_keywords(expansion);
        Ok(self.protocol.call(&messages, parse_keywords).await?)
    }

    async fn disambiguate_keyword(
        &self,
        keyword: &str,
        expansion: &str,
    ) -> verso_core::Result<String> {
        let messages = prompt::disambiguate_keyword(keyword, expansion);
        let original = keyword.to_lowercase();
        Ok(self
            .protocol
            .call(&messages, |v| {
                let candidate = non_empty_str(v, "keyword")?.to_lowercase();
                if candidate == original {
                    Err("keyword unchanged".to_string())
                } else {
                    Ok(candidate)
                }
            })
            .await?)
    }
}
