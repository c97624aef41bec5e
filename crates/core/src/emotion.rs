//! Vision emotion aggregation.
//!
//! The client runs the webcam capture loop and is authoritative for the
//! running tally: every submission is the full cumulative count per emotion,
//! so merging is a last-write overwrite per turn, not an increment. That
//! snapshot semantic is what lets vision ingestion run concurrently with an
//! in-flight turn without taking the turn lock.

use crate::config::EmotionWeights;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-session mapping of emotion label to cumulative sample count. The
/// client only ever grows its counts, so successive snapshots are monotone;
/// the tally resets only at session creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionTally {
    counts: HashMap<String, u64>,
}

impl EmotionTally {
    pub fn from_counts(counts: HashMap<String, u64>) -> Self {
        Self { counts }
    }

    /// Replaces the tally with the client's latest full snapshot.
    pub fn overwrite(&mut self, snapshot: HashMap<String, u64>) {
        self.counts = snapshot;
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn counts(&self) -> &HashMap<String, u64> {
        &self.counts
    }
}

/// Weighted non-verbal score in 0..=100, or `None` when there are no samples
/// (camera unavailable). `None` means "no data", never a penalized zero.
///
/// The score is the weight-average of the sample distribution, so raising the
/// proportion of the highest-weighted (positive) label while holding the
/// others fixed can only move the score up.
pub fn derive_non_verbal_score(tally: &EmotionTally, weights: &EmotionWeights) -> Option<u8> {
    let total = tally.total();
    if total == 0 {
        return None;
    }
    let weighted: f64 = tally
        .counts()
        .iter()
        .map(|(label, &count)| weights.weight(label) * count as f64)
        .sum();
    let score = (weighted / total as f64 * 100.0).round();
    Some(score.clamp(0.0, 100.0) as u8)
}

/// One line of report feedback from the non-verbal score band.
pub fn non_verbal_feedback(score: Option<u8>) -> String {
    match score {
        None => "No webcam data was available for this interview.".to_string(),
        Some(s) if s >= 75 => {
            "The candidate appeared composed and engaged throughout the interview.".to_string()
        }
        Some(s) if s >= 50 => {
            "The candidate appeared mostly calm, with occasional signs of tension.".to_string()
        }
        Some(_) => {
            "The candidate showed frequent signs of nervousness; interview practice under \
             realistic conditions may help."
                .to_string()
        }
    }
}
