//! The question bank index: an immutable, searchable corpus of interview
//! questions with embeddings and model answers. Consumed by the selector,
//! never mutated by the engine.

use crate::error::{EngineError, Result};
use crate::types::{QuestionBankEntry, QuestionId};
use std::collections::HashMap;

pub struct QuestionBank {
    entries: Vec<QuestionBankEntry>,
    by_id: HashMap<QuestionId, usize>,
}

impl QuestionBank {
    pub fn new(entries: Vec<QuestionBankEntry>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id, idx).is_some() {
                return Err(EngineError::Config(format!(
                    "duplicate question id {} in bank",
                    entry.id
                )));
            }
        }
        Ok(Self { entries, by_id })
    }

    /// Loads a bank from a JSON array of entries.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<QuestionBankEntry> = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid question bank JSON: {e}")))?;
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: QuestionId) -> Option<&QuestionBankEntry> {
        self.by_id.get(&id).map(|&idx| &self.entries[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuestionBankEntry> {
        self.entries.iter()
    }
}
