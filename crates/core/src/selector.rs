//! Retrieval-augmented question selection.
//!
//! The next question is picked by embedding the job requirements and resume,
//! ranking the unused bank entries by cosine similarity, pre-filtering on job
//! keywords, and breaking near-ties toward the least-recently-used category
//! so consecutive questions don't camp on one topic. A shallow answer (score
//! under the configured threshold) diverts to a dynamically generated
//! follow-up instead, at most once per original question.

use crate::bank::QuestionBank;
use crate::config::EngineConfig;
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::{EngineError, Result};
use crate::interviewer::{Interviewer, retry_upstream};
use crate::types::{Evaluation, JobPosting, QuestionBankEntry, QuestionId};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use std::collections::HashSet;

/// Similarities closer than this are considered tied and fall through to the
/// category tie-break.
const SIMILARITY_EPSILON: f64 = 1e-3;

/// Query-text truncation budgets, in characters.
const REQUIREMENTS_CHARS: usize = 500;
const CAPABILITIES_CHARS: usize = 300;
const RESUME_CHARS: usize = 400;

pub enum Selection {
    Bank(QuestionBankEntry),
    FollowUp { text: String },
}

pub struct SelectorContext<'a> {
    pub job: &'a JobPosting,
    pub resume_text: Option<&'a str>,
    pub asked: &'a HashSet<QuestionId>,
    /// Categories of previously served questions, most recent last.
    pub recent_categories: &'a [String],
    pub last_evaluation: Option<&'a Evaluation>,
    pub last_question_text: Option<&'a str>,
    pub last_answer: Option<&'a str>,
    /// False once a follow-up has been issued for the current question.
    pub follow_up_available: bool,
}

pub struct QuestionSelector {
    matcher: SkimMatcherV2,
}

impl Default for QuestionSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionSelector {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default(),
        }
    }

    pub async fn select_next(
        &self,
        cfg: &EngineConfig,
        embedder: &dyn Embedder,
        interviewer: &dyn Interviewer,
        bank: &QuestionBank,
        ctx: SelectorContext<'_>,
    ) -> Result<Selection> {
        if let Some(text) = self.follow_up_for_shallow_answer(cfg, interviewer, &ctx).await {
            return Ok(Selection::FollowUp { text });
        }

        let unused: Vec<&QuestionBankEntry> =
            bank.iter().filter(|e| !ctx.asked.contains(&e.id)).collect();
        if unused.is_empty() {
            return Err(EngineError::ExhaustedBank);
        }

        let keywords = job_keywords(ctx.job);
        let mut candidates: Vec<&QuestionBankEntry> = unused
            .iter()
            .copied()
            .filter(|e| self.matches_keywords(e, &keywords, cfg.category_match_threshold))
            .collect();
        // A too-aggressive keyword filter must not starve the session.
        if candidates.is_empty() {
            candidates = unused;
        }

        let query_text = build_query_text(&ctx);
        let query = match retry_upstream(cfg, "selector embedding", || embedder.embed(&query_text))
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                // Safe fallback: serve the lowest-id unused candidate rather
                // than failing the turn over a ranking signal.
                tracing::warn!(error = %e, "embedding unavailable, falling back to unranked draw");
                let entry = candidates
                    .iter()
                    .min_by_key(|e| e.id)
                    .copied()
                    .expect("candidates is non-empty");
                return Ok(Selection::Bank(entry.clone()));
            }
        };

        let mut ranked: Vec<(&QuestionBankEntry, f64)> = candidates
            .into_iter()
            .map(|e| {
                let sim = e
                    .embedding
                    .as_deref()
                    .map(|emb| cosine_similarity(&query, emb))
                    .unwrap_or(0.0);
                (e, sim)
            })
            .collect();

        ranked.sort_by(|(a, sim_a), (b, sim_b)| {
            if (sim_a - sim_b).abs() > SIMILARITY_EPSILON {
                sim_b.partial_cmp(sim_a).unwrap_or(std::cmp::Ordering::Equal)
            } else {
                let lru_a = recency_rank(ctx.recent_categories, &a.category);
                let lru_b = recency_rank(ctx.recent_categories, &b.category);
                lru_a.cmp(&lru_b).then(a.id.cmp(&b.id))
            }
        });

        let (top, sim) = ranked.first().expect("ranked is non-empty");
        tracing::debug!(
            question_id = top.id,
            category = %top.category,
            similarity = sim,
            "selected next question"
        );
        Ok(Selection::Bank((*top).clone()))
    }

    /// Returns the follow-up text when the last answer was shallow and no
    /// follow-up has been issued for the current question yet.
    async fn follow_up_for_shallow_answer(
        &self,
        cfg: &EngineConfig,
        interviewer: &dyn Interviewer,
        ctx: &SelectorContext<'_>,
    ) -> Option<String> {
        if !ctx.follow_up_available {
            return None;
        }
        let structured = match ctx.last_evaluation {
            Some(Evaluation::Structured(s)) if s.score < cfg.follow_up_threshold => s,
            _ => return None,
        };

        // The evaluator already drafted a follow-up in most cases; reuse it
        // before paying for another model call.
        if let Some(text) = &structured.follow_up_question {
            if !text.trim().is_empty() {
                return Some(text.clone());
            }
        }

        let question = ctx.last_question_text?;
        let answer = ctx.last_answer?;
        match retry_upstream(cfg, "follow-up generation", || {
            interviewer.generate_follow_up(question, answer)
        })
        .await
        {
            Ok(text) => Some(text),
            Err(e) => {
                // Degrade to a fresh bank draw; the drill-down is best-effort.
                tracing::warn!(error = %e, "follow-up generation failed, drawing from bank");
                None
            }
        }
    }

    fn matches_keywords(
        &self,
        entry: &QuestionBankEntry,
        keywords: &[String],
        threshold: i64,
    ) -> bool {
        if keywords.is_empty() {
            return true;
        }
        let haystack = format!(
            "{} {} {}",
            entry.category,
            entry.sub_category.as_deref().unwrap_or(""),
            entry.question_text
        )
        .to_lowercase();
        keywords
            .iter()
            .any(|kw| self.matcher.fuzzy_match(&haystack, kw).unwrap_or(0) > threshold)
    }
}

fn build_query_text(ctx: &SelectorContext<'_>) -> String {
    let mut parts = Vec::new();
    if let Some(req) = &ctx.job.requirements {
        parts.push(format!(
            "Job Requirements: {}",
            truncate_chars(req, REQUIREMENTS_CHARS)
        ));
    }
    if let Some(caps) = &ctx.job.target_capabilities {
        parts.push(format!(
            "Target Skills: {}",
            truncate_chars(caps, CAPABILITIES_CHARS)
        ));
    }
    if let Some(resume) = ctx.resume_text {
        parts.push(format!(
            "Candidate Background: {}",
            truncate_chars(resume, RESUME_CHARS)
        ));
    }
    if parts.is_empty() {
        parts.push(format!("Job Title: {}", ctx.job.title));
    }
    parts.join(" | ")
}

fn job_keywords(job: &JobPosting) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for word in job.context().split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() >= 3 && seen.insert(word.clone()) {
            keywords.push(word);
            if keywords.len() >= 32 {
                break;
            }
        }
    }
    keywords
}

/// 0 when the category was never served; otherwise how recently it was
/// (higher = more recent = less preferred).
fn recency_rank(recent: &[String], category: &str) -> usize {
    recent
        .iter()
        .rposition(|c| c == category)
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
