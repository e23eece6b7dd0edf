//! 다변화 - MMR 선택 + 소스별 상한
//!
//! MMR (Maximal Marginal Relevance)은 관련성과 기선택 항목과의 유사도를
//! 맞바꾸며 반복 선택하는 알고리즘입니다. 벡터 유사도(코사인)를
//! 다양성 지표로 재사용합니다.
//!
//! ref: Carbonell & Goldstein, "The Use of MMR, Diversity-Based Reranking
//! for Reordering Documents and Producing Summaries" (SIGIR '98)

use std::collections::HashMap;

use crate::store::KnowledgeItem;

use super::score::cosine_similarity;

// ============================================================================
// Types
// ============================================================================

/// 쿼리별 스코어링 레코드
///
/// 검색 호출마다 새로 생성되고 호출이 끝나면 버려집니다.
/// 영속화되지 않습니다.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub item: KnowledgeItem,
    pub embedding: Vec<f32>,
    /// 코사인 유사도, [-1, 1]
    pub semantic: f32,
    /// 토큰 겹침 비율, [0, 1]
    pub lexical: f32,
    /// 주 관련성 신호
    pub hybrid: f32,
}

// ============================================================================
// MMR
// ============================================================================

/// MMR 선택
///
/// `pool`에서 최대 `k`개를 선택 순서대로 반환합니다. 매 라운드마다
/// `lambda * hybrid - (1 - lambda) * max(기선택과의 코사인)`이 가장 큰
/// 후보를 옮깁니다. 동점은 입력 순서가 앞선 후보가 이깁니다 (결정성).
///
/// `k >= |pool|`이어도 통과가 아니라 유사도 패널티가 적용된 전체
/// 재정렬입니다.
///
/// 임베딩 유사도 평가가 O(k * |pool|)이므로 풀 크기 수천 개까지가
/// 실용 한계입니다.
pub fn mmr(pool: Vec<Candidate>, k: usize, lambda: f32) -> Vec<Candidate> {
    let mut pool = pool;
    let mut selected: Vec<Candidate> = Vec::with_capacity(k.min(pool.len()));

    while selected.len() < k && !pool.is_empty() {
        let mut best_idx = 0;
        let mut best_val = f32::NEG_INFINITY;

        for (i, candidate) in pool.iter().enumerate() {
            let diversity = if selected.is_empty() {
                0.0
            } else {
                selected
                    .iter()
                    .map(|s| cosine_similarity(&candidate.embedding, &s.embedding))
                    .fold(f32::NEG_INFINITY, f32::max)
            };

            let value = lambda * candidate.hybrid - (1.0 - lambda) * diversity;
            // 엄격한 비교: 동점이면 먼저 본 후보 유지
            if value > best_val {
                best_val = value;
                best_idx = i;
            }
        }

        selected.push(pool.remove(best_idx));
    }

    selected
}

// ============================================================================
// Source Capper
// ============================================================================

/// 소스별 상한 적용
///
/// 이미 정렬된 리스트를 한 번 순회하며 소스별 누적 개수가
/// `max_per_source` 미만인 항목만 내보냅니다. `limit`개를 채우거나
/// 입력이 소진되면 멈춥니다.
///
/// 소스가 없는 항목은 하나의 공유 버킷으로 취급됩니다
/// ("무제한"이 아님).
pub fn cap_by_source(
    ordered: Vec<Candidate>,
    max_per_source: usize,
    limit: usize,
) -> Vec<Candidate> {
    let mut counts: HashMap<Option<String>, usize> = HashMap::new();
    let mut out = Vec::with_capacity(limit.min(ordered.len()));

    for candidate in ordered {
        if out.len() >= limit {
            break;
        }

        let count = counts.entry(candidate.item.source.clone()).or_insert(0);
        if *count < max_per_source {
            *count += 1;
            out.push(candidate);
        }
    }

    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate(id: &str, hybrid: f32, embedding: Vec<f32>, source: Option<&str>) -> Candidate {
        Candidate {
            item: KnowledgeItem {
                id: id.to_string(),
                batch_id: "batch".to_string(),
                question: format!("question {}", id),
                answer: format!("answer {}", id),
                source: source.map(|s| s.to_string()),
                created_at: Utc::now(),
            },
            embedding,
            semantic: hybrid,
            lexical: 0.0,
            hybrid,
        }
    }

    #[test]
    fn test_mmr_k1_returns_top_score() {
        // selected가 비어 있으면 다양성 항이 0이므로 k=1은 최고 점수 후보
        let pool = vec![
            candidate("a", 0.5, vec![1.0, 0.0], None),
            candidate("b", 0.9, vec![0.0, 1.0], None),
            candidate("c", 0.7, vec![0.5, 0.5], None),
        ];

        let picked = mmr(pool, 1, 0.6);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].item.id, "b");
    }

    #[test]
    fn test_mmr_suppresses_near_duplicate() {
        // A(0.9)와 B(0.88)는 같은 방향, C(0.6)는 직교.
        // k=2, lambda=0.5이면 중복인 B 대신 C가 두 번째로 선택되어야 합니다.
        let pool = vec![
            candidate("a", 0.90, vec![1.0, 0.0], None),
            candidate("b", 0.88, vec![1.0, 0.0], None),
            candidate("c", 0.60, vec![0.0, 1.0], None),
        ];

        let picked = mmr(pool, 2, 0.5);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].item.id, "a");
        assert_eq!(picked[1].item.id, "c");
    }

    #[test]
    fn test_mmr_k_exceeds_pool() {
        // 풀보다 큰 k: 패널티가 적용된 전체 순서를 반환
        let pool = vec![
            candidate("a", 0.90, vec![1.0, 0.0], None),
            candidate("b", 0.88, vec![1.0, 0.0], None),
            candidate("c", 0.60, vec![0.0, 1.0], None),
        ];

        let picked = mmr(pool, 10, 0.5);
        assert_eq!(picked.len(), 3);
        let ids: Vec<&str> = picked.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_mmr_tie_keeps_input_order() {
        let pool = vec![
            candidate("first", 0.8, vec![1.0, 0.0], None),
            candidate("second", 0.8, vec![0.0, 1.0], None),
        ];

        let picked = mmr(pool, 1, 0.6);
        assert_eq!(picked[0].item.id, "first");
    }

    #[test]
    fn test_mmr_empty_pool() {
        assert!(mmr(Vec::new(), 5, 0.6).is_empty());
    }

    #[test]
    fn test_cap_single_source() {
        // 같은 소스 5개, 상한 3, limit 10 -> 정확히 3개
        let ordered: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("x{}", i), 0.9, vec![1.0], Some("X")))
            .collect();

        let capped = cap_by_source(ordered, 3, 10);
        assert_eq!(capped.len(), 3);
        assert!(capped.iter().all(|c| c.item.source.as_deref() == Some("X")));
    }

    #[test]
    fn test_cap_missing_source_shares_bucket() {
        // 소스 없는 항목도 함께 상한 적용
        let ordered: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("n{}", i), 0.9, vec![1.0], None))
            .collect();

        let capped = cap_by_source(ordered, 3, 10);
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn test_cap_respects_limit() {
        let ordered: Vec<Candidate> = (0..6)
            .map(|i| {
                let src = format!("src-{}", i);
                candidate(&format!("s{}", i), 0.9, vec![1.0], Some(src.as_str()))
            })
            .collect();

        let capped = cap_by_source(ordered, 3, 4);
        assert_eq!(capped.len(), 4);
    }

    #[test]
    fn test_cap_preserves_order() {
        let ordered = vec![
            candidate("a", 0.9, vec![1.0], Some("X")),
            candidate("b", 0.8, vec![1.0], Some("Y")),
            candidate("c", 0.7, vec![1.0], Some("X")),
        ];

        let capped = cap_by_source(ordered, 1, 10);
        let ids: Vec<&str> = capped.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
