//! Candidate arbitration for single-shot requests.
//!
//! Platforms with several providers can answer one request with several
//! fixes. Candidates accumulate while the request deadline is armed; when
//! it fires, exactly one winner is chosen.

use std::time::Duration;

use crate::position::{PositionUpdate, UpdateAttribute};

/// Reported-timestamp gap beyond which recency beats accuracy.
const RECENCY_DOMINANCE: Duration = Duration::from_secs(20);

/// Buffers single-request candidates and selects the best of them.
///
/// Selection rule, pairwise against the current best:
/// 1. a candidate more than 20 seconds newer (by reported timestamp) wins
///    regardless of accuracy;
/// 2. within 20 seconds of each other, when both carry horizontal accuracy
///    the smaller value wins;
/// 3. when only one carries horizontal accuracy, it wins.
#[derive(Debug, Default)]
pub struct SingleRequestArbiter {
    candidates: Vec<PositionUpdate>,
}

impl SingleRequestArbiter {
    /// Create an empty arbiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one candidate.
    pub fn push(&mut self, candidate: PositionUpdate) {
        self.candidates.push(candidate);
    }

    /// Number of buffered candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Drop all buffered candidates (request satisfied elsewhere).
    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    /// Consume the buffer and return the winner, `None` when empty.
    pub fn select_best(&mut self) -> Option<PositionUpdate> {
        let mut candidates = std::mem::take(&mut self.candidates).into_iter();
        let mut best = candidates.next()?;

        for candidate in candidates {
            if Self::beats(&candidate, &best) {
                best = candidate;
            }
        }
        Some(best)
    }

    /// Whether `candidate` replaces `best` under the selection rule.
    fn beats(candidate: &PositionUpdate, best: &PositionUpdate) -> bool {
        // Recency dominance: a gap over 20s decides either way.
        match candidate.timestamp().duration_since(best.timestamp()) {
            Ok(newer_by) if newer_by > RECENCY_DOMINANCE => return true,
            Ok(_) => {}
            Err(e) => {
                if e.duration() > RECENCY_DOMINANCE {
                    return false;
                }
            }
        }

        let candidate_accuracy = candidate.attribute(UpdateAttribute::HorizontalAccuracy);
        let best_accuracy = best.attribute(UpdateAttribute::HorizontalAccuracy);

        match (candidate_accuracy, best_accuracy) {
            (Some(c), Some(b)) => c < b,
            // Prefer the fix that carries accuracy information at all.
            (Some(_), None) => true,
            _ => false,
        }
    }
}
