//! # Decomposer Skill
//!
//! Breaks a free-text automation request into ordered, atomic steps.
//!
//! ```text
//! query ─▶ greeting / empty? ──yes──▶ []
//!            │ no
//!            ▼
//!     generator.decompose ──transient──▶ backoff + retry
//!            │
//!            ├─ schema violation ──▶ corrective prompt (≤ max_retries)
//!            ▼
//!     validated steps, ordinals 0..n
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::FlowPilotConfig;
use crate::error::{GenerationError, PipelineError};
use crate::generator::{with_backoff, with_timeout, DecompositionDraft, RetryPolicy, StructuredGenerator};
use crate::pipeline::Query;

/// Whether a conditional step branches or repeats its body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Branch,
    Loop,
}

const LOOP_MARKERS: &[&str] = &["for each", "for every", "while", "until", "repeat"];

/// Loop markers anywhere in the condition make it a loop; anything else branches.
pub fn classify_condition(condition: &str) -> ConditionKind {
    let lower = condition.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let joined = words.join(" ");
    let padded = format!(" {} ", joined);
    if LOOP_MARKERS
        .iter()
        .any(|marker| padded.contains(&format!(" {} ", marker)))
    {
        ConditionKind::Loop
    } else {
        ConditionKind::Branch
    }
}

/// One atomic unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Position in execution order, contiguous from 0
    pub ordinal: usize,
    pub description: String,
    pub verb: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Following steps governed by `condition`; 0 for plain steps
    #[serde(default)]
    pub scope: usize,
}

impl Step {
    pub fn action(ordinal: usize, verb: &str, target: &str, description: &str) -> Self {
        Self {
            ordinal,
            description: description.to_string(),
            verb: verb.to_string(),
            target: target.to_string(),
            condition: None,
            scope: 0,
        }
    }

    pub fn conditional(
        ordinal: usize,
        verb: &str,
        target: &str,
        condition: &str,
        scope: usize,
    ) -> Self {
        Self {
            ordinal,
            description: condition.to_string(),
            verb: verb.to_string(),
            target: target.to_string(),
            condition: Some(condition.to_string()),
            scope: scope.max(1),
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    pub fn condition_kind(&self) -> Option<ConditionKind> {
        self.condition.as_deref().map(classify_condition)
    }

    /// Text sent to the action index for this step
    pub fn retrieval_text(&self) -> String {
        format!("{} {} {}", self.verb, self.target, self.description)
    }
}

const NON_ACTIONABLE: &[&str] = &[
    "hello", "hi", "hey", "hiya", "yo", "greetings", "howdy", "thanks", "thank", "you", "thx",
    "cheers", "good", "morning", "afternoon", "evening", "there", "ok", "okay", "bye", "please",
];

/// Empty input, or input made only of greetings and pleasantries
pub fn is_non_actionable(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|w| NON_ACTIONABLE.contains(&w.to_lowercase().as_str()))
}

pub struct Decomposer {
    generator: Arc<dyn StructuredGenerator>,
    max_retries: u32,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Decomposer {
    pub fn new(generator: Arc<dyn StructuredGenerator>) -> Self {
        Self {
            generator,
            max_retries: 2,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(generator: Arc<dyn StructuredGenerator>, config: &FlowPilotConfig) -> Self {
        Self::new(generator)
            .with_max_retries(config.decomposition_retries)
            .with_retry_policy(config.retry.clone())
            .with_timeout(config.generator_timeout())
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[tracing::instrument(skip(self, query), fields(chars = query.text.len()))]
    pub async fn decompose(&self, query: &Query) -> Result<Vec<Step>, PipelineError> {
        if is_non_actionable(&query.text) {
            tracing::info!("Request has no actionable content, skipping decomposition");
            return Ok(Vec::new());
        }

        let base_prompt = build_prompt(query);
        let mut prompt = base_prompt.clone();
        let max_attempts = self.max_retries + 1;
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            let generator = &self.generator;
            let timeout = self.timeout;
            let current = prompt.as_str();
            let result = with_backoff(
                &self.retry,
                "decompose",
                |err: &GenerationError| err.is_transient(),
                move |_| with_timeout(timeout, generator.decompose(current)),
            )
            .await;

            match result {
                Ok(draft) => match validate_draft(draft) {
                    Ok(steps) => {
                        tracing::info!(steps = steps.len(), attempt, "Decomposition complete");
                        return Ok(steps);
                    }
                    Err(reason) => {
                        tracing::warn!(attempt, %reason, "Decomposition violated the step schema");
                        last_reason = reason;
                    }
                },
                Err(GenerationError::Schema(reason)) => {
                    tracing::warn!(attempt, %reason, "Decomposition output did not parse");
                    last_reason = reason;
                }
                Err(err) => {
                    return Err(PipelineError::DecompositionFailed {
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }

            prompt = corrective_prompt(&base_prompt, &last_reason);
        }

        Err(PipelineError::DecompositionFailed {
            attempts: max_attempts,
            reason: last_reason,
        })
    }
}

fn build_prompt(query: &Query) -> String {
    let mut prompt = format!("Request:\n{}\n", query.text.trim());
    if let Some(platform) = query.platform {
        prompt.push_str(&format!("\nTarget platform: {}\n", platform.display_name()));
    }
    prompt
}

fn corrective_prompt(base: &str, reason: &str) -> String {
    format!(
        "{}\nYour previous answer was rejected: {}\n\
         Return JSON that matches the schema exactly. Every step needs a non-empty \
         description, verb and target; only conditional steps carry a condition and scope.\n",
        base, reason
    )
}

/// Check a draft against the step rules and assign ordinals.
pub fn validate_draft(draft: DecompositionDraft) -> Result<Vec<Step>, String> {
    let mut steps = Vec::with_capacity(draft.steps.len());

    for (ordinal, raw) in draft.steps.into_iter().enumerate() {
        for (field, value) in [
            ("description", &raw.description),
            ("verb", &raw.verb),
            ("target", &raw.target),
        ] {
            if value.trim().is_empty() {
                return Err(format!("step {} has a blank {}", ordinal + 1, field));
            }
        }

        let condition = match raw.condition {
            Some(c) if c.trim().is_empty() => {
                return Err(format!("step {} has a blank condition", ordinal + 1));
            }
            Some(c) => Some(c.trim().to_string()),
            None => None,
        };

        let scope = match (&condition, raw.scope) {
            (None, Some(_)) => {
                return Err(format!(
                    "step {} sets a scope without a condition",
                    ordinal + 1
                ));
            }
            (None, None) => 0,
            (Some(_), Some(0)) => {
                return Err(format!("step {} has a scope of 0", ordinal + 1));
            }
            (Some(_), Some(n)) => n as usize,
            (Some(_), None) => 1,
        };

        steps.push(Step {
            ordinal,
            description: raw.description.trim().to_string(),
            verb: raw.verb.trim().to_lowercase(),
            target: raw.target.trim().to_string(),
            condition,
            scope,
        });
    }

    Ok(steps)
}
