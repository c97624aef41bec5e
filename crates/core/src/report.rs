//! Final report synthesis.
//!
//! Runs once per session after it becomes terminal. Per-dimension scores are
//! the means of the per-turn structured sub-scores, the non-verbal score
//! comes from the emotion aggregator, and the total is the weighted
//! composite. The narrative parts come from one LLM call with a
//! deterministic fallback, so a model outage still yields a complete report.

use crate::config::{EngineConfig, ReportWeights};
use crate::emotion::non_verbal_feedback;
use crate::error::Result;
use crate::interviewer::{Interviewer, retry_upstream};
use crate::store::SessionStore;
use crate::types::{
    Evaluation, EvaluationReport, ReportDetails, Sender, SessionId, StructuredEvaluation,
    clamp_score,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

const DIGEST_LINE_CHARS: usize = 300;

pub struct SynthesisInput {
    pub session_id: SessionId,
    pub job_context: String,
    pub non_verbal_score: Option<u8>,
    pub total_time: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LlmSummary {
    summary: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    jd_fit: String,
}

/// Synthesizes (or returns the already-persisted) report for a session.
///
/// Idempotent: the first writer wins at the store level and every later call
/// returns the stored row unchanged.
pub async fn synthesize(
    store: &dyn SessionStore,
    interviewer: &dyn Interviewer,
    cfg: &EngineConfig,
    input: SynthesisInput,
) -> Result<EvaluationReport> {
    if let Some(existing) = store.fetch_report(input.session_id).await? {
        tracing::debug!(session_id = %input.session_id, "report already exists, returning it");
        return Ok(existing);
    }

    let transcript = store.transcript(input.session_id).await?;
    let evaluations: Vec<&StructuredEvaluation> = transcript
        .iter()
        .filter(|e| e.sender == Sender::Human)
        .filter_map(|e| match &e.evaluation {
            Some(Evaluation::Structured(s)) => Some(s),
            _ => None,
        })
        .collect();

    let tech_score = mean(evaluations.iter().map(|s| s.tech_component()));
    let communication_score = mean(evaluations.iter().map(|s| s.communication_score as f64));
    let problem_solving_score = mean(evaluations.iter().map(|s| s.logic_score as f64));
    let total_score = compose_total(
        &cfg.report_weights,
        tech_score,
        communication_score,
        problem_solving_score,
        input.non_verbal_score.map(|s| s as f64),
    );

    let digest = transcript_digest(&transcript);
    let narrative = match retry_upstream(cfg, "report summary", || {
        interviewer.summarize_interview(&input.job_context, &digest)
    })
    .await
    {
        Ok(raw) => match serde_json::from_str::<LlmSummary>(raw.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "malformed report summary, using fallback");
                fallback_narrative(evaluations.len(), total_score)
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "report summary unavailable, using fallback");
            fallback_narrative(evaluations.len(), total_score)
        }
    };

    let report = EvaluationReport {
        id: Uuid::new_v4(),
        session_id: input.session_id,
        total_score,
        tech_score: tech_score.map(|s| clamp_score(s.round() as i64)),
        communication_score: communication_score.map(|s| clamp_score(s.round() as i64)),
        problem_solving_score: problem_solving_score.map(|s| clamp_score(s.round() as i64)),
        non_verbal_score: input.non_verbal_score,
        summary: narrative.summary,
        details: ReportDetails {
            strengths: narrative.strengths,
            weaknesses: narrative.weaknesses,
            jd_fit: narrative.jd_fit,
            non_verbal_feedback: non_verbal_feedback(input.non_verbal_score),
            total_time: input.total_time,
        },
        created_at: Utc::now(),
    };

    if store.insert_report(report.clone()).await? {
        tracing::info!(
            session_id = %report.session_id,
            total_score = report.total_score,
            "evaluation report synthesized"
        );
        Ok(report)
    } else {
        // Lost an insert race; the stored row is canonical.
        let existing = store.fetch_report(input.session_id).await?;
        existing.ok_or_else(|| {
            crate::error::EngineError::Internal("report vanished after insert race".into())
        })
    }
}

/// The weighted composite. Dimensions without data drop out and the
/// remaining weights are renormalized; with all four present this is exactly
/// `round(tech*w_t + comm*w_c + prob*w_p + nonverbal*w_n)`.
pub fn compose_total(
    weights: &ReportWeights,
    tech: Option<f64>,
    communication: Option<f64>,
    problem_solving: Option<f64>,
    non_verbal: Option<f64>,
) -> u8 {
    let components = [
        (tech, weights.tech),
        (communication, weights.communication),
        (problem_solving, weights.problem_solving),
        (non_verbal, weights.non_verbal),
    ];
    let mut acc = 0.0;
    let mut weight_sum = 0.0;
    for (value, weight) in components {
        if let Some(v) = value {
            acc += v * weight;
            weight_sum += weight;
        }
    }
    if weight_sum <= 0.0 {
        return 0;
    }
    clamp_score((acc / weight_sum).round() as i64)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 { None } else { Some(sum / count as f64) }
}

/// Flattens the ordered transcript into Q/A/feedback lines for the summary
/// prompt.
fn transcript_digest(transcript: &[crate::types::TranscriptEntry]) -> String {
    let mut lines = Vec::new();
    for entry in transcript {
        let prefix = match entry.sender {
            Sender::Ai => "Q",
            Sender::Human => "A",
        };
        lines.push(format!("{prefix}: {}", truncate(&entry.content, DIGEST_LINE_CHARS)));
        if let Some(Evaluation::Structured(s)) = &entry.evaluation {
            lines.push(format!(
                "Feedback (score {}): {}",
                s.score,
                truncate(&s.feedback, DIGEST_LINE_CHARS)
            ));
        }
    }
    lines.join("\n")
}

fn fallback_narrative(answered: usize, total_score: u8) -> LlmSummary {
    LlmSummary {
        summary: format!(
            "The candidate completed the interview with {answered} scored answer(s) and an \
             overall score of {total_score}/100. A narrative assessment could not be generated \
             automatically for this session."
        ),
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        jd_fit: "Automated job-fit analysis was unavailable for this session.".to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
