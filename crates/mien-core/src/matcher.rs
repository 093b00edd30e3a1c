//! Linear-scan embedding matcher.
//!
//! The metric is cosine similarity — thresholds calibrated for one metric do
//! not transfer to another, so the choice is fixed here rather than
//! configurable.

use thiserror::Error;

use crate::types::{FaceRecord, ModelRegistry};

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("unknown embedding model tag: {0}")]
    UnknownModel(String),
    #[error("embedding has {got} dimensions, model {model} expects {expected}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        got: usize,
    },
}

/// Result of matching a query embedding against stored records.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub recognized: bool,
    /// The best-matching record when `recognized` is true.
    pub record: Option<FaceRecord>,
    /// Best similarity seen, reported for diagnostics even on non-match.
    /// 0.0 when there were no comparable records.
    pub best_score: f32,
}

impl MatchOutcome {
    fn no_match(best_score: f32) -> Self {
        Self {
            recognized: false,
            record: None,
            best_score,
        }
    }
}

/// Match a query embedding against candidate records.
///
/// Scans every candidate with a matching model tag and tracks the maximum
/// cosine similarity. A best score at or above `threshold` is a recognition.
/// Exact ties resolve to the record inserted first (lowest id), regardless
/// of candidate order. An empty candidate set is a non-match, not an error.
///
/// Candidates with a different model tag, or with a stored vector whose
/// length does not match the query, are skipped. The query itself must have
/// the exact dimensionality registered for `model`.
pub fn match_embedding(
    registry: &ModelRegistry,
    candidates: &[FaceRecord],
    query: &[f32],
    model: &str,
    threshold: f32,
) -> Result<MatchOutcome, MatchError> {
    let expected = registry
        .dimension(model)
        .ok_or_else(|| MatchError::UnknownModel(model.to_string()))?;
    if query.len() != expected {
        return Err(MatchError::DimensionMismatch {
            model: model.to_string(),
            expected,
            got: query.len(),
        });
    }

    let query = crate::types::Embedding::new(query.to_vec(), model);

    let mut best: Option<(usize, f32)> = None;
    for (idx, record) in candidates.iter().enumerate() {
        if record.embedding.model != model {
            continue;
        }
        if record.embedding.values.len() != expected {
            tracing::warn!(
                id = record.id,
                len = record.embedding.values.len(),
                expected,
                "skipping record with malformed stored embedding"
            );
            continue;
        }

        let score = query.similarity(&record.embedding);
        let replace = match best {
            None => true,
            Some((best_idx, best_score)) => {
                score > best_score
                    || (score == best_score && record.id < candidates[best_idx].id)
            }
        };
        if replace {
            best = Some((idx, score));
        }
    }

    match best {
        Some((idx, score)) if score >= threshold => Ok(MatchOutcome {
            recognized: true,
            record: Some(candidates[idx].clone()),
            best_score: score,
        }),
        Some((_, score)) => Ok(MatchOutcome::no_match(score)),
        None => Ok(MatchOutcome::no_match(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    const TAG: &str = "w600k_r50";
    const DIM: usize = 512;

    fn unit_vec(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[hot] = 1.0;
        v
    }

    fn record(id: i64, name: &str, values: Vec<f32>) -> FaceRecord {
        FaceRecord {
            id,
            name: name.to_string(),
            email: None,
            phone: None,
            embedding: Embedding::new(values, TAG),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn self_match_scores_one() {
        let reg = ModelRegistry::default();
        let v = unit_vec(3);
        let records = vec![record(1, "ada", v.clone())];

        let out = match_embedding(&reg, &records, &v, TAG, 0.99).unwrap();
        assert!(out.recognized);
        assert_eq!(out.record.as_ref().unwrap().id, 1);
        assert!((out.best_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_candidates_is_no_match() {
        let reg = ModelRegistry::default();
        let out = match_embedding(&reg, &[], &unit_vec(0), TAG, 0.5).unwrap();
        assert!(!out.recognized);
        assert!(out.record.is_none());
        assert_eq!(out.best_score, 0.0);
    }

    #[test]
    fn below_threshold_reports_best_score() {
        let reg = ModelRegistry::default();
        let records = vec![record(1, "ada", unit_vec(0))];

        let out = match_embedding(&reg, &records, &unit_vec(1), TAG, 0.5).unwrap();
        assert!(!out.recognized);
        assert!(out.record.is_none());
        assert!(out.best_score.abs() < 1e-6);
    }

    #[test]
    fn exact_tie_returns_lowest_id() {
        let reg = ModelRegistry::default();
        let v = unit_vec(7);
        // Higher id first: the scan order must not decide the winner.
        let records = vec![
            record(9, "later", v.clone()),
            record(2, "earlier", v.clone()),
        ];

        let out = match_embedding(&reg, &records, &v, TAG, 0.5).unwrap();
        assert!(out.recognized);
        assert_eq!(out.record.as_ref().unwrap().id, 2);
    }

    #[test]
    fn best_match_wins_over_earlier_weaker() {
        let reg = ModelRegistry::default();
        let mut close = unit_vec(0);
        close[1] = 0.2;
        let records = vec![
            record(1, "weak", unit_vec(1)),
            record(2, "strong", close),
        ];

        let out = match_embedding(&reg, &records, &unit_vec(0), TAG, 0.5).unwrap();
        assert!(out.recognized);
        assert_eq!(out.record.as_ref().unwrap().name, "strong");
    }

    #[test]
    fn wrong_query_length_is_rejected() {
        let reg = ModelRegistry::default();
        let err = match_embedding(&reg, &[], &[1.0, 2.0], TAG, 0.5).unwrap_err();
        assert!(matches!(
            err,
            MatchError::DimensionMismatch {
                expected: 512,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn unknown_model_tag_is_rejected() {
        let reg = ModelRegistry::default();
        let err = match_embedding(&reg, &[], &[1.0], "mystery", 0.5).unwrap_err();
        assert!(matches!(err, MatchError::UnknownModel(tag) if tag == "mystery"));
    }

    #[test]
    fn other_model_tags_are_skipped() {
        let reg = ModelRegistry::default();
        let v = unit_vec(0);
        let mut foreign = record(1, "vgg", vec![1.0; 2622]);
        foreign.embedding.model = "VGG-Face".to_string();
        let records = vec![foreign, record(2, "arc", v.clone())];

        let out = match_embedding(&reg, &records, &v, TAG, 0.5).unwrap();
        assert!(out.recognized);
        assert_eq!(out.record.as_ref().unwrap().name, "arc");
    }

    #[test]
    fn malformed_stored_vector_is_skipped() {
        let reg = ModelRegistry::default();
        let records = vec![record(1, "short", vec![1.0, 0.0]), record(2, "ok", unit_vec(0))];

        let out = match_embedding(&reg, &records, &unit_vec(0), TAG, 0.5).unwrap();
        assert!(out.recognized);
        assert_eq!(out.record.as_ref().unwrap().id, 2);
    }
}
