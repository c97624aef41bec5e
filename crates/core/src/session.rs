//! The turn-based session state machine.
//!
//! `SessionEngine` owns every session's mutable scratch state (turn counter,
//! asked-question set, emotion tally, idempotency cache) behind an explicit
//! per-session handle. All turn transitions for one session are serialized
//! through a per-session `tokio::sync::Mutex`; different sessions run fully
//! concurrently. Vision snapshots bypass the turn lock entirely because the
//! aggregator treats each submission as an authoritative full snapshot.

use crate::bank::QuestionBank;
use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::emotion::{EmotionTally, derive_non_verbal_score};
use crate::error::{EngineError, Result};
use crate::evaluator::{AnswerEvaluator, EvaluationRequest};
use crate::interviewer::Interviewer;
use crate::report::{self, SynthesisInput};
use crate::selector::{QuestionSelector, Selection, SelectorContext};
use crate::store::SessionStore;
use crate::types::{
    Evaluation, EvaluationReport, InterviewSession, NextQuestion, QuestionId, QuestionSource,
    Sender, SessionId, SessionSnapshot, SessionStatus, TranscriptEntry, TurnOutcome,
};
use crate::vision::{AffectClassifier, FrameAnalysis};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const INTRO_QUESTION: &str =
    "To begin, please give a brief self-introduction. About one minute is plenty.";
const INTRO_CATEGORY: &str = "BEHAVIORAL / self-introduction";
const CLOSING_MESSAGE: &str = "That brings us to the end of the interview. Thank you for your \
    time and your answers. Your evaluation report will be ready shortly.";
const CLOSING_CATEGORY: &str = "CLOSING";
const FOLLOW_UP_CATEGORY: &str = "FOLLOW_UP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub answer: Option<String>,
    /// Full cumulative emotion counts from the client's capture loop.
    pub vision_counts: Option<HashMap<String, u64>>,
    /// Seconds spent on this answer.
    pub answer_time: Option<u32>,
    /// Seconds elapsed in the whole interview so far.
    pub total_time: Option<u32>,
    /// Optional client-supplied turn identity; retried requests with the
    /// same token replay the previous result instead of re-running the turn.
    pub turn_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedSession {
    pub session_id: SessionId,
    pub greeting: String,
    pub first_question: String,
    pub category: String,
    pub candidate_name: String,
    pub job_title: String,
}

/// Ephemeral per-session scratch state. Lives behind the handle's turn lock.
struct SessionRecord {
    next_seq: u64,
    /// AI questions produced so far (the intro counts as the first).
    ai_turns: u32,
    human_answers: u32,
    asked: HashSet<QuestionId>,
    /// Categories of served bank questions, most recent last.
    recent_categories: Vec<String>,
    last_question: Option<NextQuestion>,
    /// Set while the current question is a follow-up; caps drilling at one
    /// follow-up per original question.
    follow_up_used: bool,
    /// The last committed turn, kept for idempotent replay of retries.
    last_turn: Option<CachedTurn>,
    synthesis_scheduled: bool,
    total_time: Option<u32>,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            next_seq: 0,
            ai_turns: 0,
            human_answers: 0,
            asked: HashSet::new(),
            recent_categories: Vec::new(),
            last_question: None,
            follow_up_used: false,
            last_turn: None,
            synthesis_scheduled: false,
            total_time: None,
        }
    }
}

/// Identity and result of the last committed turn. A retried request is
/// recognized by its client token, or, when none was sent, by re-deriving
/// the key from the turn index this turn executed at plus the answer text.
struct CachedTurn {
    key: String,
    /// `ai_turns` at the time the turn ran, before its commit incremented it.
    turn_index: u32,
    outcome: TurnOutcome,
}

struct SessionHandle {
    record: tokio::sync::Mutex<SessionRecord>,
    /// Written by the vision path without the turn lock; snapshot overwrite
    /// makes that race-free.
    tally: Mutex<EmotionTally>,
    /// Raised by `end_session` before it waits on the turn lock, so an
    /// in-flight turn discards its result instead of appending after the
    /// session ended.
    ended: AtomicBool,
    /// Terminal synthesis failure reason, if any.
    report_failed: Mutex<Option<String>>,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            record: tokio::sync::Mutex::new(SessionRecord::new()),
            tally: Mutex::new(EmotionTally::default()),
            ended: AtomicBool::new(false),
            report_failed: Mutex::new(None),
        }
    }
}

pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    bank: Arc<QuestionBank>,
    interviewer: Arc<dyn Interviewer>,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<dyn AffectClassifier>,
    selector: QuestionSelector,
    evaluator: AnswerEvaluator,
    cfg: EngineConfig,
    handles: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        bank: Arc<QuestionBank>,
        interviewer: Arc<dyn Interviewer>,
        embedder: Arc<dyn Embedder>,
        classifier: Arc<dyn AffectClassifier>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            store,
            bank,
            interviewer,
            embedder,
            classifier,
            selector: QuestionSelector::new(),
            evaluator: AnswerEvaluator::new(),
            cfg,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Creates a session and immediately advances it to the first question.
    pub async fn start_session(
        &self,
        candidate_id: Uuid,
        job_id: Uuid,
        resume_text: Option<String>,
    ) -> Result<StartedSession> {
        let candidate = self.store.fetch_candidate(candidate_id).await?;
        let job = self.store.fetch_job(job_id).await?;

        let session_id = Uuid::new_v4();
        let resume = resume_text.or_else(|| candidate.resume_text.clone());
        self.store
            .insert_session(InterviewSession {
                id: session_id,
                candidate_id,
                job_id,
                resume_text: resume,
                status: SessionStatus::Created,
                turn_count: 0,
                created_at: Utc::now(),
            })
            .await?;

        let handle = Arc::new(SessionHandle::new());
        self.handles
            .lock()
            .unwrap()
            .insert(session_id, handle.clone());

        let greeting = format!(
            "Hello {}! Welcome to your interview for the {} position. I'm your AI \
             interviewer. Take your time with each answer and speak naturally.",
            candidate.name, job.title
        );

        let mut record = handle.record.lock().await;
        self.append_entry(&mut record, session_id, Sender::Ai, greeting.clone(), None, None)
            .await?;
        self.append_entry(
            &mut record,
            session_id,
            Sender::Ai,
            INTRO_QUESTION.to_string(),
            None,
            None,
        )
        .await?;
        record.ai_turns = 1;
        record.last_question = Some(NextQuestion {
            text: INTRO_QUESTION.to_string(),
            category: INTRO_CATEGORY.to_string(),
            source: QuestionSource::Intro,
        });
        self.store
            .update_session_status(session_id, SessionStatus::InProgress)
            .await?;
        self.store.update_turn_count(session_id, 1).await?;

        tracing::info!(%session_id, candidate = %candidate.name, job = %job.title, "session started");
        Ok(StartedSession {
            session_id,
            greeting,
            first_question: INTRO_QUESTION.to_string(),
            category: INTRO_CATEGORY.to_string(),
            candidate_name: candidate.name,
            job_title: job.title,
        })
    }

    /// The primary orchestration entry point: evaluates the prior answer (if
    /// any), produces the next question, and appends both transcript entries
    /// atomically with respect to other turns on the same session.
    pub async fn advance_turn(&self, session_id: SessionId, req: TurnRequest) -> Result<TurnOutcome> {
        let handle = self.handle(session_id)?;

        // Snapshot ingestion is independent of the turn path.
        if let Some(counts) = &req.vision_counts {
            handle.tally.lock().unwrap().overwrite(counts.clone());
        }

        let mut record = handle.record.lock().await;

        // Replay runs before any state checks: a retry of the last committed
        // turn must get its cached outcome back even when that commit closed
        // the session. The derived key is rebuilt with the cached turn's own
        // index, since the commit has already advanced `ai_turns` past it.
        if let Some(cached) = &record.last_turn {
            let retried = match &req.turn_token {
                Some(token) => *token == cached.key,
                None => derived_turn_key(cached.turn_index, req.answer.as_deref()) == cached.key,
            };
            if retried {
                tracing::debug!(%session_id, key = %cached.key, "replaying retried turn");
                return Ok(cached.outcome.clone());
            }
        }

        let session = self.store.fetch_session(session_id).await?;
        if session.status.is_terminal() {
            return Err(EngineError::InvalidSessionState(format!(
                "session {session_id} is {:?}",
                session.status
            )));
        }

        let turn_index = record.ai_turns;
        let turn_key = req
            .turn_token
            .clone()
            .unwrap_or_else(|| derived_turn_key(turn_index, req.answer.as_deref()));

        let job = self.store.fetch_job(session.job_id).await?;
        let job_context = job.context();

        let evaluation = match (&req.answer, &record.last_question) {
            (Some(answer), Some(last)) if last.source != QuestionSource::Closing => {
                let model_answer = match &last.source {
                    QuestionSource::Bank { id } => {
                        self.bank.get(*id).and_then(|e| e.model_answer.as_deref())
                    }
                    _ => None,
                };
                Some(
                    self.evaluator
                        .evaluate(
                            &self.cfg,
                            self.interviewer.as_ref(),
                            self.embedder.as_ref(),
                            EvaluationRequest {
                                job_context: &job_context,
                                question: &last.text,
                                model_answer,
                                answer,
                            },
                        )
                        .await,
                )
            }
            _ => None,
        };

        let next = if record.ai_turns >= self.cfg.max_ai_turns {
            NextQuestion {
                text: CLOSING_MESSAGE.to_string(),
                category: CLOSING_CATEGORY.to_string(),
                source: QuestionSource::Closing,
            }
        } else {
            let selection = self
                .selector
                .select_next(
                    &self.cfg,
                    self.embedder.as_ref(),
                    self.interviewer.as_ref(),
                    &self.bank,
                    SelectorContext {
                        job: &job,
                        resume_text: session.resume_text.as_deref(),
                        asked: &record.asked,
                        recent_categories: &record.recent_categories,
                        last_evaluation: evaluation.as_ref(),
                        last_question_text: record.last_question.as_ref().map(|q| q.text.as_str()),
                        last_answer: req.answer.as_deref(),
                        follow_up_available: !record.follow_up_used,
                    },
                )
                .await;
            match selection {
                Ok(Selection::Bank(entry)) => NextQuestion {
                    text: entry.question_text.clone(),
                    category: entry.category_label(),
                    source: QuestionSource::Bank { id: entry.id },
                },
                Ok(Selection::FollowUp { text }) => NextQuestion {
                    text,
                    category: FOLLOW_UP_CATEGORY.to_string(),
                    source: QuestionSource::FollowUp,
                },
                Err(EngineError::ExhaustedBank) => {
                    // No unused question left: close early instead of failing.
                    tracing::info!(%session_id, "question bank exhausted, closing interview");
                    NextQuestion {
                        text: CLOSING_MESSAGE.to_string(),
                        category: CLOSING_CATEGORY.to_string(),
                        source: QuestionSource::Closing,
                    }
                }
                Err(e) => return Err(e),
            }
        };
        let closing = next.source == QuestionSource::Closing;

        // Commit point. A session ended mid-flight discards the result so
        // the transcript stays gapless and the terminal state stays final.
        if handle.ended.load(Ordering::SeqCst) {
            return Err(EngineError::InvalidSessionState(format!(
                "session {session_id} was ended while the turn was in flight"
            )));
        }

        if let Some(answer) = &req.answer {
            self.append_entry(
                &mut record,
                session_id,
                Sender::Human,
                answer.clone(),
                evaluation.clone(),
                req.answer_time,
            )
            .await?;
            record.human_answers += 1;
        }
        self.append_entry(&mut record, session_id, Sender::Ai, next.text.clone(), None, None)
            .await?;

        match &next.source {
            QuestionSource::Bank { id } => {
                record.asked.insert(*id);
                if let Some(entry) = self.bank.get(*id) {
                    record.recent_categories.push(entry.category.clone());
                }
                record.follow_up_used = false;
            }
            QuestionSource::FollowUp => {
                record.follow_up_used = true;
            }
            _ => {}
        }
        record.ai_turns += 1;
        record.total_time = req.total_time.or(record.total_time);
        record.last_question = Some(next.clone());
        self.store
            .update_turn_count(session_id, record.ai_turns)
            .await?;

        if closing {
            // The closing turn carries no further human input; acknowledging
            // it (successful append + return) completes the session.
            self.store
                .update_session_status(session_id, SessionStatus::Closing)
                .await?;
            self.store
                .update_session_status(session_id, SessionStatus::Completed)
                .await?;
            self.schedule_synthesis(session_id, &handle, &mut record, job_context);
        }

        let outcome = TurnOutcome {
            evaluation,
            next_question: next.text,
            category: next.category,
            question_id: match next.source {
                QuestionSource::Bank { id } => Some(id),
                _ => None,
            },
            done: closing,
        };
        record.last_turn = Some(CachedTurn {
            key: turn_key,
            turn_index,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Explicit termination. Always accepted from any non-terminal state and
    /// idempotent: ending an already-ended session is a no-op success.
    ///
    /// A session ended before the candidate gave any answer is `Canceled`
    /// (there is nothing to report on); otherwise it is `Completed` and the
    /// report synthesizer is scheduled.
    pub async fn end_session(&self, session_id: SessionId) -> Result<()> {
        let handle = self.handle(session_id)?;

        // Raise the flag first: an in-flight turn must not commit after this
        // call returns.
        handle.ended.store(true, Ordering::SeqCst);

        let mut record = handle.record.lock().await;
        let session = self.store.fetch_session(session_id).await?;
        if session.status.is_terminal() {
            return Ok(());
        }

        let job = self.store.fetch_job(session.job_id).await?;
        if record.human_answers == 0 {
            self.store
                .update_session_status(session_id, SessionStatus::Canceled)
                .await?;
            *handle.report_failed.lock().unwrap() =
                Some("session was canceled before any answers were given".to_string());
            tracing::info!(%session_id, "session canceled with no answers");
        } else {
            self.store
                .update_session_status(session_id, SessionStatus::Completed)
                .await?;
            self.schedule_synthesis(session_id, &handle, &mut record, job.context());
            tracing::info!(%session_id, "session ended explicitly");
        }
        Ok(())
    }

    /// Merges the client's authoritative emotion snapshot. Runs concurrently
    /// with an in-flight turn on the same session without locking the turn
    /// path.
    pub fn ingest_emotions(
        &self,
        session_id: SessionId,
        counts: HashMap<String, u64>,
    ) -> Result<()> {
        let handle = self.handle(session_id)?;
        handle.tally.lock().unwrap().overwrite(counts);
        Ok(())
    }

    /// Delegates one webcam frame to the external classifier, degrading to
    /// neutral when it is unreachable.
    pub async fn classify_frame(&self, session_id: SessionId, image_b64: &str) -> Result<FrameAnalysis> {
        // The session must exist, but classification itself never errors.
        self.handle(session_id)?;
        Ok(crate::vision::classify_frame(self.classifier.as_ref(), &self.cfg, image_b64).await)
    }

    /// Read-only snapshot for reconnect/replay.
    pub async fn session_snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot> {
        let session = self.store.fetch_session(session_id).await?;
        let candidate = self.store.fetch_candidate(session.candidate_id).await?;
        let job = self.store.fetch_job(session.job_id).await?;
        let transcript = self.store.transcript(session_id).await?;
        Ok(SessionSnapshot {
            session_id,
            status: session.status,
            candidate_name: candidate.name,
            job_title: job.title,
            created_at: session.created_at,
            transcript,
        })
    }

    /// Returns the persisted report, `ReportNotReady` while synthesis is in
    /// flight, and `ReportFailed` once it can no longer succeed.
    pub async fn get_report(&self, session_id: SessionId) -> Result<EvaluationReport> {
        if let Some(report) = self.store.fetch_report(session_id).await? {
            return Ok(report);
        }
        let session = self.store.fetch_session(session_id).await?;
        if let Ok(handle) = self.handle(session_id) {
            if let Some(reason) = handle.report_failed.lock().unwrap().clone() {
                return Err(EngineError::ReportFailed(reason));
            }
        }
        if session.status == SessionStatus::Canceled {
            return Err(EngineError::ReportFailed(
                "session was canceled before any answers were given".to_string(),
            ));
        }
        Err(EngineError::ReportNotReady)
    }

    fn handle(&self, session_id: SessionId) -> Result<Arc<SessionHandle>> {
        self.handles
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("session", session_id.to_string()))
    }

    async fn append_entry(
        &self,
        record: &mut SessionRecord,
        session_id: SessionId,
        sender: Sender,
        content: String,
        evaluation: Option<Evaluation>,
        answer_time: Option<u32>,
    ) -> Result<()> {
        let entry = TranscriptEntry {
            id: Uuid::new_v4(),
            session_id,
            seq: record.next_seq,
            sender,
            content,
            evaluation,
            answer_time,
            timestamp: Utc::now(),
        };
        self.store.append_transcript(entry).await?;
        record.next_seq += 1;
        Ok(())
    }

    /// Schedules report synthesis exactly once per session, after it is
    /// terminal. Runs in the background under the report SLA; a breach marks
    /// the report terminally failed instead of leaving callers polling a
    /// 404 forever.
    fn schedule_synthesis(
        &self,
        session_id: SessionId,
        handle: &Arc<SessionHandle>,
        record: &mut SessionRecord,
        job_context: String,
    ) {
        if record.synthesis_scheduled {
            return;
        }
        record.synthesis_scheduled = true;

        let non_verbal_score =
            derive_non_verbal_score(&handle.tally.lock().unwrap(), &self.cfg.emotion_weights);
        let input = SynthesisInput {
            session_id,
            job_context,
            non_verbal_score,
            total_time: record.total_time,
        };
        let store = self.store.clone();
        let interviewer = self.interviewer.clone();
        let cfg = self.cfg.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(
                cfg.report_sla,
                report::synthesize(store.as_ref(), interviewer.as_ref(), &cfg, input),
            )
            .await
            {
                Ok(Ok(report)) => {
                    tracing::info!(%session_id, total = report.total_score, "report ready");
                }
                Ok(Err(e)) => {
                    tracing::error!(%session_id, error = %e, "report synthesis failed");
                    *handle.report_failed.lock().unwrap() = Some(e.to_string());
                }
                Err(_) => {
                    tracing::error!(%session_id, "report synthesis exceeded its SLA");
                    *handle.report_failed.lock().unwrap() =
                        Some(format!("synthesis exceeded the {:?} budget", cfg.report_sla));
                }
            }
        });
    }
}

fn derived_turn_key(ai_turns: u32, answer: Option<&str>) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    answer.unwrap_or("").hash(&mut hasher);
    format!("{ai_turns}:{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::interviewer::MockInterviewer;
    use crate::store::MemoryStore;
    use crate::types::{Candidate, JobPosting, QuestionBankEntry};
    use crate::vision::MockAffectClassifier;
    use std::time::Duration;

    const GOOD_EVAL: &str = r#"{"score": 82, "concept_accuracy": 85, "logical_structure": 80,
        "communication": 78, "feedback": "Clear and concrete.",
        "follow_up_question": "What trade-offs did you consider?"}"#;
    const SHALLOW_EVAL: &str = r#"{"score": 15, "concept_accuracy": 15, "logical_structure": 15,
        "communication": 15, "feedback": "Too thin.",
        "follow_up_question": "Could you describe one concrete case you handled?"}"#;
    const SUMMARY_JSON: &str = r#"{"summary": "Competent overall.", "strengths": ["clarity"],
        "weaknesses": ["depth"], "jd_fit": "Reasonable fit."}"#;

    struct Fixture {
        engine: Arc<SessionEngine>,
        store: Arc<MemoryStore>,
        candidate_id: Uuid,
        job_id: Uuid,
    }

    async fn fixture_with(eval_json: &'static str, max_ai_turns: u32) -> Fixture {
        fixture_inner(eval_json, max_ai_turns, 0).await
    }

    async fn fixture_inner(
        eval_json: &'static str,
        max_ai_turns: u32,
        eval_delay_ms: u64,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let candidate_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        store
            .insert_candidate(Candidate {
                id: candidate_id,
                name: "Dana".to_string(),
                resume_text: Some("3 years Python experience".to_string()),
            })
            .await
            .unwrap();
        store
            .insert_job(JobPosting {
                id: job_id,
                title: "Backend Engineer".to_string(),
                description: "Build services".to_string(),
                requirements: Some("Python, FastAPI".to_string()),
                target_capabilities: Some("API design".to_string()),
            })
            .await
            .unwrap();

        let entries = (0..10u32)
            .map(|i| QuestionBankEntry {
                id: i,
                category: if i % 2 == 0 { "BASIC" } else { "INDUSTRY" }.to_string(),
                sub_category: Some("backend".to_string()),
                question_text: format!("Python question number {i}?"),
                model_answer: Some("A reference answer mentioning python internals.".to_string()),
                embedding: Some(vec![1.0, i as f32 / 10.0]),
            })
            .collect();
        let bank = Arc::new(QuestionBank::new(entries).unwrap());

        let mut interviewer = MockInterviewer::new();
        interviewer
            .expect_evaluate_answer()
            .returning(move |_, _, _, _| {
                Box::pin(async move {
                    if eval_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(eval_delay_ms)).await;
                    }
                    Ok(eval_json.to_string())
                })
            });
        interviewer
            .expect_generate_follow_up()
            .returning(|_, _| Box::pin(async { Ok("Tell me more about that.".to_string()) }));
        interviewer
            .expect_summarize_interview()
            .returning(|_, _| Box::pin(async { Ok(SUMMARY_JSON.to_string()) }));

        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .returning(|_| Box::pin(async { Ok(vec![1.0, 0.3]) }));

        let cfg = EngineConfig {
            max_ai_turns,
            upstream_timeout: Duration::from_secs(2),
            upstream_retries: 0,
            retry_backoff: Duration::from_millis(1),
            report_sla: Duration::from_secs(5),
            ..EngineConfig::default()
        };
        let engine = Arc::new(SessionEngine::new(
            store.clone(),
            bank,
            Arc::new(interviewer),
            Arc::new(embedder),
            Arc::new(MockAffectClassifier::new()),
            cfg,
        ));
        Fixture {
            engine,
            store,
            candidate_id,
            job_id,
        }
    }

    async fn poll_report(engine: &SessionEngine, session_id: SessionId) -> EvaluationReport {
        for _ in 0..200 {
            match engine.get_report(session_id).await {
                Ok(report) => return report,
                Err(EngineError::ReportNotReady) => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                Err(e) => panic!("unexpected report error: {e}"),
            }
        }
        panic!("report never became ready");
    }

    fn answered(answer: &str) -> TurnRequest {
        TurnRequest {
            answer: Some(answer.to_string()),
            ..TurnRequest::default()
        }
    }

    #[tokio::test]
    async fn start_session_greets_and_asks_for_an_introduction() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        assert!(!started.first_question.is_empty());
        assert_eq!(started.category, INTRO_CATEGORY);
        assert_eq!(started.candidate_name, "Dana");
        assert_eq!(started.job_title, "Backend Engineer");

        let snapshot = fx.engine.session_snapshot(started.session_id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::InProgress);
        assert_eq!(
            snapshot.transcript.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn answered_turn_evaluates_and_serves_next_question() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        let mut req = answered("I have three years of Python experience building APIs.");
        req.vision_counts = Some(
            [("happy".to_string(), 5), ("neutral".to_string(), 3), ("fear".to_string(), 1)].into(),
        );
        let outcome = fx.engine.advance_turn(started.session_id, req).await.unwrap();

        let eval = outcome.evaluation.expect("answer should be evaluated");
        assert!(eval.score().unwrap() <= 100);
        assert!(!outcome.next_question.is_empty());
        assert!(!outcome.done);
        assert!(outcome.question_id.is_some());

        let snapshot = fx.engine.session_snapshot(started.session_id).await.unwrap();
        let seqs: Vec<u64> = snapshot.transcript.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        // The evaluation rides on the human entry.
        assert!(snapshot.transcript[2].evaluation.is_some());
    }

    #[tokio::test]
    async fn retried_turn_replays_without_double_increment() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        let mut req = answered("An answer about Python.");
        req.turn_token = Some("turn-1".to_string());
        let first = fx
            .engine
            .advance_turn(started.session_id, req.clone())
            .await
            .unwrap();
        let len_after_first = fx.store.transcript(started.session_id).await.unwrap().len();

        let replay = fx.engine.advance_turn(started.session_id, req).await.unwrap();
        assert_eq!(first, replay);

        let transcript = fx.store.transcript(started.session_id).await.unwrap();
        assert_eq!(transcript.len(), len_after_first);
        let session = fx.store.fetch_session(started.session_id).await.unwrap();
        assert_eq!(session.turn_count, 2);
    }

    #[tokio::test]
    async fn derived_turn_identity_also_deduplicates_retries() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        // No client token: the retry carries the identical answer.
        let first = fx
            .engine
            .advance_turn(started.session_id, answered("Same answer."))
            .await
            .unwrap();
        let len_after_first = fx.store.transcript(started.session_id).await.unwrap().len();

        let replay = fx
            .engine
            .advance_turn(started.session_id, answered("Same answer."))
            .await
            .unwrap();
        assert_eq!(first, replay);

        // The retry must not re-run the turn: no extra transcript entries,
        // no second increment, no extra bank question consumed.
        let transcript = fx.store.transcript(started.session_id).await.unwrap();
        assert_eq!(transcript.len(), len_after_first);
        let session = fx.store.fetch_session(started.session_id).await.unwrap();
        assert_eq!(session.turn_count, 2);
        assert_eq!(first.question_id, replay.question_id);
    }

    #[tokio::test]
    async fn retried_closing_turn_replays_after_completion() {
        let fx = fixture_with(GOOD_EVAL, 2).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        fx.engine
            .advance_turn(started.session_id, answered("First answer about Python."))
            .await
            .unwrap();

        let mut last = answered("Second answer about Python.");
        last.turn_token = Some("final-turn".to_string());
        let closing = fx
            .engine
            .advance_turn(started.session_id, last.clone())
            .await
            .unwrap();
        assert!(closing.done);
        let session = fx.store.fetch_session(started.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        let len_after_close = fx.store.transcript(started.session_id).await.unwrap().len();

        // The commit made the session terminal, but a same-identity retry
        // still gets the cached outcome, not a state rejection.
        let replay = fx.engine.advance_turn(started.session_id, last).await.unwrap();
        assert_eq!(closing, replay);
        let transcript = fx.store.transcript(started.session_id).await.unwrap();
        assert_eq!(transcript.len(), len_after_close);

        // A genuinely new turn is still rejected.
        let err = fx
            .engine
            .advance_turn(started.session_id, answered("A different answer."))
            .await;
        assert!(matches!(err, Err(EngineError::InvalidSessionState(_))));
    }

    #[tokio::test]
    async fn interview_closes_after_configured_turns_and_synthesizes_report() {
        let fx = fixture_with(GOOD_EVAL, 3).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        let mut done = false;
        for i in 0..5 {
            let mut req = answered(&format!("Detailed answer number {i} about Python."));
            req.vision_counts =
                Some([("happy".to_string(), 4 + i), ("neutral".to_string(), 2)].into());
            let outcome = fx.engine.advance_turn(started.session_id, req).await.unwrap();
            if outcome.done {
                assert_eq!(outcome.category, CLOSING_CATEGORY);
                done = true;
                break;
            }
        }
        assert!(done, "interview never closed");

        let session = fx.store.fetch_session(started.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let report = poll_report(&fx.engine, started.session_id).await;
        assert!(report.total_score <= 100);
        assert!(report.non_verbal_score.unwrap() >= 50);
        assert_eq!(report.summary, "Competent overall.");

        // Further turns are rejected, repeated reads are stable.
        let err = fx
            .engine
            .advance_turn(started.session_id, answered("one more"))
            .await;
        assert!(matches!(err, Err(EngineError::InvalidSessionState(_))));
        let again = fx.engine.get_report(started.session_id).await.unwrap();
        assert_eq!(report, again);
    }

    #[tokio::test]
    async fn shallow_answer_gets_one_follow_up_then_returns_to_bank() {
        let fx = fixture_with(SHALLOW_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        let first = fx
            .engine
            .advance_turn(started.session_id, answered("I don't know."))
            .await
            .unwrap();
        assert_eq!(first.category, FOLLOW_UP_CATEGORY);
        assert!(first.question_id.is_none());

        // Still shallow, but the follow-up budget for this question is spent.
        let second = fx
            .engine
            .advance_turn(started.session_id, answered("Still not sure."))
            .await
            .unwrap();
        assert_ne!(second.category, FOLLOW_UP_CATEGORY);
        assert!(second.question_id.is_some());
    }

    #[tokio::test]
    async fn end_session_twice_is_idempotent_with_one_report() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();
        fx.engine
            .advance_turn(started.session_id, answered("A real answer about Python."))
            .await
            .unwrap();

        fx.engine.end_session(started.session_id).await.unwrap();
        fx.engine.end_session(started.session_id).await.unwrap();

        let report = poll_report(&fx.engine, started.session_id).await;
        let stored = fx.store.fetch_report(started.session_id).await.unwrap().unwrap();
        assert_eq!(report.id, stored.id);

        let session = fx.store.fetch_session(started.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn ending_before_any_answer_cancels_without_a_report() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        fx.engine.end_session(started.session_id).await.unwrap();
        let session = fx.store.fetch_session(started.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Canceled);
        assert!(matches!(
            fx.engine.get_report(started.session_id).await,
            Err(EngineError::ReportFailed(_))
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            fx.engine.advance_turn(missing, TurnRequest::default()).await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            fx.engine.end_session(missing).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn end_during_in_flight_turn_discards_its_result() {
        let fx = fixture_inner(GOOD_EVAL, 7, 150).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();
        let baseline = fx.store.transcript(started.session_id).await.unwrap().len();

        let engine = fx.engine.clone();
        let session_id = started.session_id;
        let turn = tokio::spawn(async move {
            engine.advance_turn(session_id, answered("A slow answer.")).await
        });
        // Let the turn reach its (slow) evaluation call, then end the session.
        tokio::time::sleep(Duration::from_millis(30)).await;
        fx.engine.end_session(session_id).await.unwrap();

        let result = turn.await.unwrap();
        assert!(matches!(result, Err(EngineError::InvalidSessionState(_))));
        // Nothing from the discarded turn reached the transcript.
        let transcript = fx.store.transcript(session_id).await.unwrap();
        assert_eq!(transcript.len(), baseline);
    }

    #[tokio::test]
    async fn vision_ingestion_is_independent_of_the_turn_path() {
        let fx = fixture_with(GOOD_EVAL, 7).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        fx.engine
            .ingest_emotions(started.session_id, [("happy".to_string(), 3)].into())
            .unwrap();
        // A later snapshot overwrites, it does not add.
        fx.engine
            .ingest_emotions(
                started.session_id,
                [("happy".to_string(), 5), ("neutral".to_string(), 2)].into(),
            )
            .unwrap();

        fx.engine
            .advance_turn(started.session_id, answered("An answer about Python."))
            .await
            .unwrap();
        fx.engine.end_session(started.session_id).await.unwrap();

        let report = poll_report(&fx.engine, started.session_id).await;
        // 5 happy + 2 neutral, not 8 happy + 2 neutral.
        assert!(report.non_verbal_score.is_some());
    }

    #[tokio::test]
    async fn bank_exhaustion_closes_the_interview_early() {
        // More allowed turns than bank questions.
        let fx = fixture_with(GOOD_EVAL, 50).await;
        let started = fx
            .engine
            .start_session(fx.candidate_id, fx.job_id, None)
            .await
            .unwrap();

        let mut closed = false;
        for i in 0..13 {
            let outcome = fx
                .engine
                .advance_turn(started.session_id, answered(&format!("Answer {i} on Python.")))
                .await
                .unwrap();
            if outcome.done {
                closed = true;
                break;
            }
        }
        assert!(closed, "exhausted bank should close the interview");
        let session = fx.store.fetch_session(started.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }
}
