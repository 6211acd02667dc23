//! Reciprocal rank fusion of vector and keyword result lists.
//!
//! Combines ranked lists from heterogeneous scorers without needing their
//! scores to be comparable: only ranks matter. Each source contributes
//! `weight / (k + rank + 1)` per item; an item missing from a source is
//! treated as ranked one past the requested limit rather than absent, so a
//! single-source hit is dampened but not excluded.

use std::collections::{HashMap, HashSet};

use mnemo_types::Id;

use crate::store::RankedChunk;

/// A fused search hit with its combined score.
#[derive(Debug, Clone)]
pub struct FusedChunk {
    pub chunk: crate::store::ChunkRecord,
    /// Normalized fusion score in (0, 1]; the top result is always 1.0.
    pub score: f32,
}

/// Fuse two ranked lists with weighted reciprocal rank fusion.
///
/// `limit` is the rank assigned to items a source did not return. Scores
/// are normalized so the best result scores 1.0; an empty fusion yields an
/// empty list.
pub fn reciprocal_rank_fusion(
    vector: Vec<RankedChunk>,
    keyword: Vec<RankedChunk>,
    vector_weight: f32,
    keyword_weight: f32,
    k: f32,
    limit: usize,
) -> Vec<FusedChunk> {
    let missing_rank = limit as f32;

    let vector_ranks: HashMap<Id, usize> = vector
        .iter()
        .enumerate()
        .map(|(rank, r)| (r.chunk.id, rank))
        .collect();
    let keyword_ranks: HashMap<Id, usize> = keyword
        .iter()
        .enumerate()
        .map(|(rank, r)| (r.chunk.id, rank))
        .collect();

    // Union of both lists, first occurrence keeps the chunk payload.
    let mut chunks: Vec<crate::store::ChunkRecord> = Vec::new();
    let mut seen: HashSet<Id> = HashSet::new();
    for ranked in vector.into_iter().chain(keyword) {
        if seen.insert(ranked.chunk.id) {
            chunks.push(ranked.chunk);
        }
    }

    let mut fused: Vec<FusedChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let vector_rank = vector_ranks
                .get(&chunk.id)
                .map(|&r| r as f32)
                .unwrap_or(missing_rank);
            let keyword_rank = keyword_ranks
                .get(&chunk.id)
                .map(|&r| r as f32)
                .unwrap_or(missing_rank);

            let score = vector_weight / (k + vector_rank + 1.0)
                + keyword_weight / (k + keyword_rank + 1.0);

            FusedChunk { chunk, score }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(top) = fused.first().map(|f| f.score) {
        if top > 0.0 {
            for item in &mut fused {
                item.score /= top;
            }
        }
    }

    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkMetadata, ChunkRecord};
    use mnemo_types::{new_id, now};

    fn ranked(content: &str) -> RankedChunk {
        RankedChunk {
            chunk: ChunkRecord {
                id: new_id(),
                document_id: new_id(),
                workspace_id: None,
                agent_id: None,
                collection: "general".to_string(),
                seq: 0,
                content: content.to_string(),
                content_hash: String::new(),
                embedding: vec![],
                metadata: ChunkMetadata::default(),
                created_at: now(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn test_empty_inputs() {
        let fused = reciprocal_rank_fusion(vec![], vec![], 0.7, 0.3, 60.0, 10);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_top_result_normalized_to_one() {
        let fused = reciprocal_rank_fusion(
            vec![ranked("a"), ranked("b")],
            vec![],
            0.7,
            0.3,
            60.0,
            10,
        );
        assert_eq!(fused[0].score, 1.0);
        assert!(fused[1].score < 1.0);
    }

    #[test]
    fn test_agreement_beats_single_source() {
        let both = ranked("in both lists");
        let vector_only = ranked("vector only");
        let keyword_only = ranked("keyword only");

        let fused = reciprocal_rank_fusion(
            vec![vector_only.clone(), both.clone()],
            vec![keyword_only.clone(), both.clone()],
            0.5,
            0.5,
            60.0,
            10,
        );

        // The chunk present in both lists wins despite ranking second in each.
        assert_eq!(fused[0].chunk.id, both.chunk.id);
    }

    #[test]
    fn test_vector_weight_dominates() {
        let v = ranked("vector top");
        let kw = ranked("keyword top");

        let fused = reciprocal_rank_fusion(
            vec![v.clone()],
            vec![kw.clone()],
            0.7,
            0.3,
            60.0,
            10,
        );

        assert_eq!(fused[0].chunk.id, v.chunk.id);
        assert_eq!(fused[1].chunk.id, kw.chunk.id);
    }

    #[test]
    fn test_single_source_preserves_order() {
        let first = ranked("first");
        let second = ranked("second");

        let fused = reciprocal_rank_fusion(
            vec![first.clone(), second.clone()],
            vec![],
            0.7,
            0.3,
            60.0,
            10,
        );

        assert_eq!(fused[0].chunk.id, first.chunk.id);
        assert_eq!(fused[1].chunk.id, second.chunk.id);
    }
}
