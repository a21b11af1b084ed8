// Score aggregation
//
// Folds the per-model scores of one evaluation into the single number the
// caller sees. Strategies are data (serde-tagged) so configs can echo them
// to listeners.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{EvalError, Result};

/// Strategy for combining per-model scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ScoreAggregator {
    /// Arithmetic mean
    #[default]
    Average,
    Min,
    Max,
    /// Interpolates between the two middle values for even counts
    Median,
    /// Mean, but fails when the models disagree by more than `tolerance`
    Consensus { tolerance: f64 },
}

impl ScoreAggregator {
    /// Fold a non-empty model → score map into one score.
    ///
    /// An empty map is a caller bug and returns an error rather than a
    /// fabricated score.
    pub fn aggregate(&self, scores: &HashMap<String, f64>) -> Result<f64> {
        if scores.is_empty() {
            return Err(EvalError::EmptyScores);
        }
        let mut values: Vec<f64> = scores.values().copied().collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;

        match self {
            ScoreAggregator::Average => Ok(mean),
            ScoreAggregator::Min => Ok(values.iter().copied().fold(f64::INFINITY, f64::min)),
            ScoreAggregator::Max => Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            ScoreAggregator::Median => {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = values.len() / 2;
                if values.len() % 2 == 1 {
                    Ok(values[mid])
                } else {
                    Ok((values[mid - 1] + values[mid]) / 2.0)
                }
            }
            ScoreAggregator::Consensus { tolerance } => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let spread = max - min;
                if spread > *tolerance {
                    Err(EvalError::ConsensusNotReached {
                        spread,
                        tolerance: *tolerance,
                    })
                } else {
                    Ok(mean)
                }
            }
        }
    }
}
