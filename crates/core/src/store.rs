//! Persistence seam.
//!
//! The engine talks to storage through `SessionStore` only. `MemoryStore` is
//! the in-process implementation; a SQL-backed store plugs in behind the same
//! trait. Schema migration tooling is explicitly out of scope.

use crate::error::{EngineError, Result};
use crate::types::{
    Candidate, EvaluationReport, InterviewSession, JobPosting, SessionId, SessionStatus,
    TranscriptEntry,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: InterviewSession) -> Result<()>;
    async fn fetch_session(&self, id: SessionId) -> Result<InterviewSession>;
    async fn update_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()>;
    async fn update_turn_count(&self, id: SessionId, turn_count: u32) -> Result<()>;

    /// Appends one transcript entry. Implementations must reject an entry
    /// whose `seq` is not exactly one past the current tail, preserving the
    /// gapless ordering invariant.
    async fn append_transcript(&self, entry: TranscriptEntry) -> Result<()>;
    async fn transcript(&self, session_id: SessionId) -> Result<Vec<TranscriptEntry>>;

    /// Inserts the report unless one already exists for the session.
    /// Returns `false` (leaving the stored row untouched) when it does;
    /// this is what makes synthesis idempotent under races.
    async fn insert_report(&self, report: EvaluationReport) -> Result<bool>;
    async fn fetch_report(&self, session_id: SessionId) -> Result<Option<EvaluationReport>>;

    async fn insert_job(&self, job: JobPosting) -> Result<()>;
    async fn fetch_job(&self, id: Uuid) -> Result<JobPosting>;
    async fn insert_candidate(&self, candidate: Candidate) -> Result<()>;
    async fn fetch_candidate(&self, id: Uuid) -> Result<Candidate>;
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, InterviewSession>,
    transcripts: HashMap<SessionId, Vec<TranscriptEntry>>,
    reports: HashMap<SessionId, EvaluationReport>,
    jobs: HashMap<Uuid, JobPosting>,
    candidates: HashMap<Uuid, Candidate>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: InterviewSession) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.transcripts.entry(session.id).or_default();
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn fetch_session(&self, id: SessionId) -> Result<InterviewSession> {
        self.inner
            .read()
            .unwrap()
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("session", id.to_string()))
    }

    async fn update_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("session", id.to_string()))?;
        session.status = status;
        Ok(())
    }

    async fn update_turn_count(&self, id: SessionId, turn_count: u32) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("session", id.to_string()))?;
        session.turn_count = turn_count;
        Ok(())
    }

    async fn append_transcript(&self, entry: TranscriptEntry) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let log = inner
            .transcripts
            .get_mut(&entry.session_id)
            .ok_or_else(|| EngineError::not_found("session", entry.session_id.to_string()))?;
        let expected = log.last().map(|e| e.seq + 1).unwrap_or(0);
        if entry.seq != expected {
            return Err(EngineError::Internal(format!(
                "transcript gap for session {}: expected seq {expected}, got {}",
                entry.session_id, entry.seq
            )));
        }
        log.push(entry);
        Ok(())
    }

    async fn transcript(&self, session_id: SessionId) -> Result<Vec<TranscriptEntry>> {
        self.inner
            .read()
            .unwrap()
            .transcripts
            .get(&session_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("session", session_id.to_string()))
    }

    async fn insert_report(&self, report: EvaluationReport) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if inner.reports.contains_key(&report.session_id) {
            return Ok(false);
        }
        inner.reports.insert(report.session_id, report);
        Ok(true)
    }

    async fn fetch_report(&self, session_id: SessionId) -> Result<Option<EvaluationReport>> {
        Ok(self.inner.read().unwrap().reports.get(&session_id).cloned())
    }

    async fn insert_job(&self, job: JobPosting) -> Result<()> {
        self.inner.write().unwrap().jobs.insert(job.id, job);
        Ok(())
    }

    async fn fetch_job(&self, id: Uuid) -> Result<JobPosting> {
        self.inner
            .read()
            .unwrap()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("job posting", id.to_string()))
    }

    async fn insert_candidate(&self, candidate: Candidate) -> Result<()> {
        self.inner
            .write()
            .unwrap()
            .candidates
            .insert(candidate.id, candidate);
        Ok(())
    }

    async fn fetch_candidate(&self, id: Uuid) -> Result<Candidate> {
        self.inner
            .read()
            .unwrap()
            .candidates
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("candidate", id.to_string()))
    }
}
