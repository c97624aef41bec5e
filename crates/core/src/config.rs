//! Engine tunables.
//!
//! Every constant the scoring rubric or the turn sequencer depends on lives
//! here rather than at the call sites: the observed defaults (seven AI turns,
//! follow-up threshold of 40, report weights 0.40/0.25/0.25/0.10) were
//! inferred from client behavior and rubric documentation, so deployments
//! must be able to override them without touching engine code.

use std::collections::HashMap;
use std::time::Duration;

/// Weights applied when folding per-turn rubric dimensions into a single
/// answer score.
#[derive(Debug, Clone)]
pub struct RubricWeights {
    pub concept: f64,
    pub relevance: f64,
    pub logic: f64,
    pub communication: f64,
}

impl Default for RubricWeights {
    fn default() -> Self {
        Self {
            concept: 0.35,
            relevance: 0.25,
            logic: 0.20,
            communication: 0.20,
        }
    }
}

/// Weights for the final report composite:
/// `total = round(tech*0.40 + comm*0.25 + prob*0.25 + nonverbal*0.10)`.
#[derive(Debug, Clone)]
pub struct ReportWeights {
    pub tech: f64,
    pub communication: f64,
    pub problem_solving: f64,
    pub non_verbal: f64,
}

impl Default for ReportWeights {
    fn default() -> Self {
        Self {
            tech: 0.40,
            communication: 0.25,
            problem_solving: 0.25,
            non_verbal: 0.10,
        }
    }
}

/// Per-emotion unit weights for the non-verbal score. Positive and neutral
/// affect score high, fear and sadness low. `happy` carries the maximum
/// weight, which is what keeps the derived score monotonic in the
/// positive-affect proportion.
#[derive(Debug, Clone)]
pub struct EmotionWeights {
    overrides: HashMap<String, f64>,
}

impl EmotionWeights {
    pub fn with_overrides(overrides: HashMap<String, f64>) -> Self {
        Self { overrides }
    }

    /// Unit weight (0.0..=1.0) for a classifier label. Labels the table does
    /// not know fall back to a mid weight so a new classifier vocabulary
    /// cannot tank or inflate the score.
    pub fn weight(&self, label: &str) -> f64 {
        if let Some(w) = self.overrides.get(label) {
            return w.clamp(0.0, 1.0);
        }
        match label {
            "happy" => 1.0,
            "surprise" => 0.85,
            "neutral" => 0.70,
            "sad" => 0.25,
            "angry" => 0.20,
            "disgust" => 0.20,
            "fear" => 0.15,
            _ => 0.50,
        }
    }
}

impl Default for EmotionWeights {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }
}

/// Holds every engine tunable. Constructed once at startup and shared.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// AI questions per session before the closing message is produced.
    pub max_ai_turns: u32,
    /// Answers scoring below this trigger a dynamic follow-up question.
    pub follow_up_threshold: u8,
    /// Cosine similarity at or above this counts as highly relevant to the
    /// model answer.
    pub relevance_bar: f64,
    /// Fuzzy-match score above which a job keyword matches a bank category.
    pub category_match_threshold: i64,
    pub rubric: RubricWeights,
    pub report_weights: ReportWeights,
    pub emotion_weights: EmotionWeights,
    /// Per-attempt timeout for outbound LLM/embedding/vision calls.
    pub upstream_timeout: Duration,
    /// Retries after the first failed attempt.
    pub upstream_retries: u32,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Budget for report synthesis; past this the report is terminally failed
    /// rather than left in an indefinite not-ready state.
    pub report_sla: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_ai_turns: 7,
            follow_up_threshold: 40,
            relevance_bar: 0.8,
            category_match_threshold: 70,
            rubric: RubricWeights::default(),
            report_weights: ReportWeights::default(),
            emotion_weights: EmotionWeights::default(),
            upstream_timeout: Duration::from_secs(20),
            upstream_retries: 2,
            retry_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            report_sla: Duration::from_secs(30),
        }
    }
}
