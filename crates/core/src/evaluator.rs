//! Per-turn answer evaluation.
//!
//! The language model judges concept accuracy, logical structure, and STAR
//! communication; the engine adds a locally computed relevance sub-score
//! (embedding cosine against the question's model answer) and a keyword
//! hit-rate blended into concept accuracy. The four dimensions are weighted
//! into one 0..=100 score. Output the model returns that cannot be validated
//! degrades to a raw-text evaluation with `parse_error` set; a bad model
//! response must never fail the turn.

use crate::config::EngineConfig;
use crate::embedding::{Embedder, cosine_similarity};
use crate::interviewer::{Interviewer, retry_upstream};
use crate::types::{Evaluation, RawEvaluation, StructuredEvaluation, clamp_score};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::Deserialize;

const MAX_CONCEPT_KEYWORDS: usize = 12;

/// Shown when the evaluation call itself failed and there is no raw model
/// text to preserve.
const SCORING_UNAVAILABLE: &str =
    "The answer was recorded, but automated scoring was unavailable for this turn.";

pub struct EvaluationRequest<'a> {
    pub job_context: &'a str,
    pub question: &'a str,
    pub model_answer: Option<&'a str>,
    pub answer: &'a str,
}

/// The shape the model is asked to produce. `score` and `feedback` are
/// required; missing rubric dimensions fall back to the overall score.
#[derive(Debug, Deserialize)]
struct LlmEvaluation {
    score: Option<i64>,
    concept_accuracy: Option<i64>,
    logical_structure: Option<i64>,
    communication: Option<i64>,
    feedback: Option<String>,
    follow_up_question: Option<String>,
}

pub struct AnswerEvaluator {
    matcher: SkimMatcherV2,
}

impl Default for AnswerEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerEvaluator {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
        }
    }

    pub async fn evaluate(
        &self,
        cfg: &EngineConfig,
        interviewer: &dyn Interviewer,
        embedder: &dyn Embedder,
        req: EvaluationRequest<'_>,
    ) -> Evaluation {
        let raw = match retry_upstream(cfg, "answer evaluation", || {
            interviewer.evaluate_answer(
                req.job_context,
                req.question,
                req.model_answer.unwrap_or(""),
                req.answer,
            )
        })
        .await
        {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "evaluation call failed, degrading");
                return Evaluation::Raw(RawEvaluation {
                    text: SCORING_UNAVAILABLE.to_string(),
                    parse_error: true,
                });
            }
        };

        let parsed: LlmEvaluation = match serde_json::from_str(strip_fences(&raw)) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "malformed evaluation output, preserving raw text");
                return Evaluation::Raw(RawEvaluation {
                    text: raw,
                    parse_error: true,
                });
            }
        };

        let (overall, feedback) = match (parsed.score, parsed.feedback) {
            (Some(score), Some(feedback)) if !feedback.trim().is_empty() => (score, feedback),
            _ => {
                tracing::warn!("evaluation output missing score or feedback, preserving raw text");
                return Evaluation::Raw(RawEvaluation {
                    text: raw,
                    parse_error: true,
                });
            }
        };

        let llm_concept = clamp_score(parsed.concept_accuracy.unwrap_or(overall));
        let logic_score = clamp_score(parsed.logical_structure.unwrap_or(overall));
        let communication_score = clamp_score(parsed.communication.unwrap_or(overall));

        let relevance_score = match req.model_answer {
            Some(model_answer) if !model_answer.trim().is_empty() => {
                self.relevance(cfg, embedder, req.answer, model_answer).await
            }
            _ => None,
        };
        let concept_score = self.blend_concept(llm_concept, req.answer, req.model_answer, cfg);

        let score = weighted_score(
            cfg,
            concept_score,
            relevance_score,
            logic_score,
            communication_score,
        );

        Evaluation::Structured(StructuredEvaluation {
            score,
            concept_score,
            relevance_score,
            logic_score,
            communication_score,
            feedback,
            follow_up_question: parsed
                .follow_up_question
                .filter(|q| !q.trim().is_empty()),
        })
    }

    /// Cosine similarity between the answer and the model answer, mapped into
    /// a 0..=100 band. At or above the relevance bar the sub-score lands in
    /// the high band; below it, it scales down linearly.
    async fn relevance(
        &self,
        cfg: &EngineConfig,
        embedder: &dyn Embedder,
        answer: &str,
        model_answer: &str,
    ) -> Option<u8> {
        let answer_vec =
            retry_upstream(cfg, "answer embedding", || embedder.embed(answer)).await;
        let model_vec =
            retry_upstream(cfg, "model answer embedding", || embedder.embed(model_answer)).await;
        match (answer_vec, model_vec) {
            (Ok(a), Ok(m)) => {
                let sim = cosine_similarity(&a, &m).clamp(0.0, 1.0);
                let bar = cfg.relevance_bar;
                let banded = if sim >= bar {
                    85.0 + (sim - bar) / (1.0 - bar) * 15.0
                } else {
                    sim / bar * 85.0
                };
                Some(clamp_score(banded.round() as i64))
            }
            _ => {
                // Relevance is one signal of four; losing it degrades the
                // rubric, not the turn.
                tracing::warn!("relevance embedding unavailable, scoring without it");
                None
            }
        }
    }

    /// Blends the model's concept judgment with a fuzzy keyword hit-rate
    /// against the model answer's salient terms.
    fn blend_concept(
        &self,
        llm_concept: u8,
        answer: &str,
        model_answer: Option<&str>,
        cfg: &EngineConfig,
    ) -> u8 {
        let keywords = match model_answer {
            Some(text) => salient_keywords(text),
            None => Vec::new(),
        };
        if keywords.is_empty() {
            return llm_concept;
        }
        let answer_lower = answer.to_lowercase();
        let hits = keywords
            .iter()
            .filter(|kw| {
                self.matcher
                    .fuzzy_match(&answer_lower, kw)
                    .unwrap_or(0)
                    > cfg.category_match_threshold
            })
            .count();
        let hit_rate = hits as f64 / keywords.len() as f64 * 100.0;
        clamp_score(((llm_concept as f64 + hit_rate) / 2.0).round() as i64)
    }
}

fn weighted_score(
    cfg: &EngineConfig,
    concept: u8,
    relevance: Option<u8>,
    logic: u8,
    communication: u8,
) -> u8 {
    let w = &cfg.rubric;
    let mut acc = concept as f64 * w.concept
        + logic as f64 * w.logic
        + communication as f64 * w.communication;
    let mut weight_sum = w.concept + w.logic + w.communication;
    if let Some(rel) = relevance {
        acc += rel as f64 * w.relevance;
        weight_sum += w.relevance;
    }
    if weight_sum <= 0.0 {
        return 0;
    }
    clamp_score((acc / weight_sum).round() as i64)
}

/// Pulls the distinctive terms out of a model answer for keyword matching.
fn salient_keywords(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() >= 4 && seen.insert(word.clone()) {
            keywords.push(word);
            if keywords.len() >= MAX_CONCEPT_KEYWORDS {
                break;
            }
        }
    }
    keywords
}

/// The model occasionally wraps its JSON in markdown fences despite being
/// told not to; unwrap them before parsing.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(after) = trimmed.split_once("```json").map(|(_, rest)| rest) {
        return after.split("```").next().unwrap_or(after).trim();
    }
    if let Some(after) = trimmed.split_once("```").map(|(_, rest)| rest) {
        return after.split("```").next().unwrap_or(after).trim();
    }
    trimmed
}
