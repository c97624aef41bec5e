//! Domain model for interview sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = Uuid;
pub type QuestionId = u32;

/// Lifecycle of an interview session. `Completed` and `Canceled` are
/// terminal; a terminal session is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    InProgress,
    Closing,
    Completed,
    Canceled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Ai,
    Human,
}

/// One interview session. Owned exclusively by the session engine; mutated
/// only through its transition function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSession {
    pub id: SessionId,
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub resume_text: Option<String>,
    pub status: SessionStatus,
    /// Number of AI questions produced so far.
    pub turn_count: u32,
    pub created_at: DateTime<Utc>,
}

/// One line of the append-only conversation log. `seq` is strictly
/// increasing and gapless per session; the ordered log is the session's
/// source of truth for both report synthesis and replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub session_id: SessionId,
    pub seq: u64,
    pub sender: Sender,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    /// Seconds the candidate spent on this answer, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_time: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Immutable reference data; read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBankEntry {
    pub id: QuestionId,
    pub category: String,
    #[serde(default)]
    pub sub_category: Option<String>,
    pub question_text: String,
    #[serde(default)]
    pub model_answer: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl QuestionBankEntry {
    /// Display form used in turn responses: "CATEGORY / sub_category".
    pub fn category_label(&self) -> String {
        match &self.sub_category {
            Some(sub) => format!("{} / {}", self.category, sub),
            None => self.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub target_capabilities: Option<String>,
}

impl JobPosting {
    /// Concatenated requirements context handed to the evaluator and the
    /// selector query.
    pub fn context(&self) -> String {
        let mut parts = Vec::new();
        if let Some(req) = &self.requirements {
            parts.push(req.as_str());
        }
        if let Some(caps) = &self.target_capabilities {
            parts.push(caps.as_str());
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub resume_text: Option<String>,
}

/// A per-turn answer judgment. The model's output is either validated into
/// the structured form or preserved raw. An unparsable judgment degrades,
/// it never fails the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evaluation {
    Structured(StructuredEvaluation),
    Raw(RawEvaluation),
}

impl Evaluation {
    pub fn score(&self) -> Option<u8> {
        match self {
            Evaluation::Structured(s) => Some(s.score),
            Evaluation::Raw(_) => None,
        }
    }

    pub fn follow_up_question(&self) -> Option<&str> {
        match self {
            Evaluation::Structured(s) => s.follow_up_question.as_deref(),
            Evaluation::Raw(_) => None,
        }
    }
}

/// Rubric-dimension scores are all 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredEvaluation {
    pub score: u8,
    /// Keyword/fact accuracy against the model answer.
    pub concept_score: u8,
    /// Embedding cosine similarity band vs the model answer; absent when no
    /// model answer exists for the question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<u8>,
    /// Problem -> analysis -> resolution shape.
    pub logic_score: u8,
    /// STAR-pattern communication heuristic.
    pub communication_score: u8,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_question: Option<String>,
}

impl StructuredEvaluation {
    /// Technical dimension fed into the final report.
    pub fn tech_component(&self) -> f64 {
        match self.relevance_score {
            Some(rel) => (self.concept_score as f64 + rel as f64) / 2.0,
            None => self.concept_score as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvaluation {
    /// The model's output verbatim, preserved for display.
    pub text: String,
    pub parse_error: bool,
}

/// Where the next question came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum QuestionSource {
    /// The fixed self-introduction opener.
    Intro,
    Bank { id: QuestionId },
    /// Dynamic follow-up generated for a shallow answer.
    FollowUp,
    /// Closing message; no further human input is expected.
    Closing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextQuestion {
    pub text: String,
    pub category: String,
    #[serde(flatten)]
    pub source: QuestionSource,
}

/// What one `advance_turn` call returns. Cached per turn key so a retried
/// request replays the identical result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    pub next_question: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<QuestionId>,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDetails {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub jd_fit: String,
    pub non_verbal_feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<u32>,
}

/// The final weighted report, created exactly once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub id: Uuid,
    pub session_id: SessionId,
    pub total_score: u8,
    pub tech_score: Option<u8>,
    pub communication_score: Option<u8>,
    pub problem_solving_score: Option<u8>,
    pub non_verbal_score: Option<u8>,
    pub summary: String,
    pub details: ReportDetails,
    pub created_at: DateTime<Utc>,
}

/// Read-only view of a session for reconnect/replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub candidate_name: String,
    pub job_title: String,
    pub created_at: DateTime<Utc>,
    pub transcript: Vec<TranscriptEntry>,
}

pub(crate) fn clamp_score(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}
