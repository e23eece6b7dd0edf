//! 검색 오케스트레이터
//!
//! 로더 → 하이브리드 스코어링 → MMR 다변화 → 소스 상한 순으로
//! 파이프라인을 실행하는 공개 진입점입니다. 검색 한 번은 공유 상태에
//! 부작용이 없으며, 완전한 랭킹을 반환하거나 전체가 실패합니다
//! (부분 결과 없음).

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::store::ItemStore;

use super::diversity::{cap_by_source, mmr, Candidate};
use super::loader::CandidatePages;
use super::score::{cosine_similarity, hybrid_score, lexical_score};
use super::SearchError;

// ============================================================================
// Configuration
// ============================================================================

/// 관측된 시맨틱 스코어 하한 (약한 히트 숨김)
pub const SEMANTIC_FLOOR: f32 = 0.48;

/// 관측된 하이브리드 스코어 하한 (채팅 경로)
pub const HYBRID_FLOOR: f32 = 0.42;

/// 검색 설정
///
/// 튜닝 상수는 전부 여기에 모입니다. 호출부마다 다른 값이 관측된
/// 상수(가중치, 플로어)는 기본값을 하드코딩하지 않고 노브로 노출합니다.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// 렉시컬 가중치 w: `hybrid = (1-w)*semantic + w*lexical`
    pub lexical_weight: f32,
    /// MMR 람다 (클수록 관련성 우선)
    pub mmr_lambda: f32,
    /// 시맨틱 스코어 하한. `None`이면 미적용. [`SEMANTIC_FLOOR`] 참고.
    pub semantic_floor: Option<f32>,
    /// 하이브리드 스코어 하한. `None`이면 미적용. [`HYBRID_FLOOR`] 참고.
    pub hybrid_floor: Option<f32>,
    /// 소스당 최대 결과 수
    pub max_per_source: usize,
    /// MMR 오버페치 배수 - 소스 상한이 깎을 여유분 확보용
    pub overfetch: usize,
    /// 저장소 페이지 크기
    pub page_size: usize,
    /// k 상한
    pub max_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.25,
            mmr_lambda: 0.6,
            semantic_floor: None,
            hybrid_floor: None,
            max_per_source: 3,
            overfetch: 3,
            page_size: 2000,
            max_k: 50,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 검색 히트 - 외부에 노출되는 결과
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub batch_id: String,
    pub question: String,
    pub answer: String,
    pub source: Option<String>,
    /// 하이브리드 스코어 (주 정렬 키)
    pub score: f32,
    /// 관측용 점수 내역
    pub scores: ScoreBreakdown,
}

/// 점수 내역
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f32,
    pub lexical: f32,
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색 엔진
///
/// 저장소 핸들과 임베딩 프로바이더를 시작 시 한 번 주입받아
/// 이후 읽기 전용으로 재사용합니다. 동시 검색 간 공유 가변 상태가
/// 없으므로 별도 잠금이 필요 없습니다.
pub struct Retriever {
    store: Arc<dyn ItemStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl Retriever {
    /// 기본 설정으로 생성
    pub fn new(store: Arc<dyn ItemStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_config(store, embedder, SearchConfig::default())
    }

    /// 설정을 지정하여 생성
    pub fn with_config(
        store: Arc<dyn ItemStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// 지식베이스 검색
    ///
    /// 빈/공백 쿼리는 에러가 아니라 빈 결과이며 임베딩 호출 없이
    /// 반환됩니다. `k`는 `1..=max_k` 범위를 벗어나면 InvalidInput입니다.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        if k == 0 || k > self.config.max_k {
            return Err(SearchError::InvalidInput(format!(
                "k must be in 1..={}, got {}",
                self.config.max_k, k
            )));
        }

        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let pool = self.load_and_score(query, &query_embedding).await?;

        if pool.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("candidate pool: {} items", pool.len());

        // 소스 상한이 중복 소스를 떨어뜨려도 k개를 채울 수 있도록
        // k보다 많이 선택합니다
        let want = k.saturating_mul(self.config.overfetch).min(pool.len());
        let mut picked = mmr(pool, want, self.config.mmr_lambda);

        sort_by_score(&mut picked);
        let capped = cap_by_source(picked, self.config.max_per_source, k);

        Ok(capped.into_iter().map(to_hit).collect())
    }

    /// 후보 스트리밍 + 스코어링 + 플로어 필터
    async fn load_and_score(
        &self,
        query: &str,
        query_embedding: &[f32],
    ) -> Result<Vec<Candidate>, SearchError> {
        let mut pool = Vec::new();
        let mut pages = CandidatePages::new(self.store.as_ref(), self.config.page_size);

        while let Some(page) = pages.next_page().await? {
            for row in page {
                // 차원 불일치는 0 유사도가 아니라 설정 오류로 보고합니다
                if row.embedding.len() != query_embedding.len() {
                    return Err(SearchError::Configuration(format!(
                        "embedding dimension mismatch: query={}, item {}={}",
                        query_embedding.len(),
                        row.item.id,
                        row.embedding.len()
                    )));
                }

                // 답변 없는 아이템은 검색 대상이 아닙니다
                if row.item.answer.trim().is_empty() {
                    continue;
                }

                let semantic = cosine_similarity(query_embedding, &row.embedding);
                if let Some(floor) = self.config.semantic_floor {
                    if semantic < floor {
                        continue;
                    }
                }

                let lexical = lexical_score(query, &row.item.question);
                let hybrid = hybrid_score(semantic, lexical, self.config.lexical_weight);
                if let Some(floor) = self.config.hybrid_floor {
                    if hybrid < floor {
                        continue;
                    }
                }

                pool.push(Candidate {
                    item: row.item,
                    embedding: row.embedding,
                    semantic,
                    lexical,
                    hybrid,
                });
            }
        }

        // MMR 입력 순서 고정: 점수 내림차순, 동점이면 id 오름차순
        sort_by_score(&mut pool);
        Ok(pool)
    }
}

/// 하이브리드 점수 내림차순 정렬, 동점은 id 오름차순 (결정성)
fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.hybrid
            .partial_cmp(&a.hybrid)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
}

fn to_hit(candidate: Candidate) -> SearchHit {
    SearchHit {
        id: candidate.item.id,
        batch_id: candidate.item.batch_id,
        question: candidate.item.question,
        answer: candidate.item.answer,
        source: candidate.item.source,
        score: candidate.hybrid,
        scores: ScoreBreakdown {
            semantic: candidate.semantic,
            lexical: candidate.lexical,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::store::{KnowledgeItem, MemoryStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// 고정 벡터를 반환하는 테스트용 임베더 (호출 횟수 기록)
    struct FixedEmbedding {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedEmbedding {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(AtomicOrdering::Relaxed)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(self.vector.clone())
        }

        fn dimension(&self) -> usize {
            self.vector.len()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn item(id: &str, question: &str, answer: &str, source: Option<&str>) -> KnowledgeItem {
        KnowledgeItem {
            id: id.to_string(),
            batch_id: "batch-1".to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            source: source.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }

    fn retriever(
        store: MemoryStore,
        query_vector: Vec<f32>,
        config: SearchConfig,
    ) -> (Retriever, Arc<FixedEmbedding>) {
        let embedder = Arc::new(FixedEmbedding::new(query_vector));
        let retriever = Retriever::with_config(Arc::new(store), embedder.clone(), config);
        (retriever, embedder)
    }

    #[tokio::test]
    async fn test_empty_query_skips_embedding() {
        let (engine, embedder) = retriever(MemoryStore::new(), vec![1.0], SearchConfig::default());

        let hits = engine.search("   ", 5).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_k_out_of_range() {
        let (engine, _) = retriever(MemoryStore::new(), vec![1.0], SearchConfig::default());

        assert!(matches!(
            engine.search("query", 0).await,
            Err(SearchError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.search("query", 51).await,
            Err(SearchError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_single_hit_end_to_end() {
        let mut store = MemoryStore::new();
        store.insert(
            item(
                "refund",
                "What is the refund policy?",
                "Refunds are issued within 30 days",
                Some("policy.pdf"),
            ),
            vec![0.6, 0.8],
        );
        // 플로어 아래로 떨어지는 무관한 아이템
        store.insert(item("other", "Shipping times?", "3 to 5 days", None), vec![-0.8, 0.6]);

        let config = SearchConfig {
            semantic_floor: Some(SEMANTIC_FLOOR),
            ..SearchConfig::default()
        };
        let (engine, _) = retriever(store, vec![0.6, 0.8], config);

        let hits = engine.search("refund policy", 5).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hit = &hits[0];
        assert_eq!(hit.id, "refund");
        assert_eq!(hit.answer, "Refunds are issued within 30 days");
        // semantic = 1.0, lexical = 2/3, hybrid = 0.75 + 0.25 * 2/3
        assert!((hit.scores.semantic - 1.0).abs() < 1e-5);
        assert!((hit.scores.lexical - 2.0 / 3.0).abs() < 1e-5);
        assert!((hit.score - (0.75 + 0.25 * 2.0 / 3.0)).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_empty_answer_excluded() {
        let mut store = MemoryStore::new();
        store.insert(item("curated", "question one", "a real answer", None), vec![1.0, 0.0]);
        store.insert(item("draft", "question two", "   ", None), vec![1.0, 0.0]);

        let (engine, _) = retriever(store, vec![1.0, 0.0], SearchConfig::default());

        let hits = engine.search("question", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "curated");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_configuration_error() {
        let mut store = MemoryStore::new();
        store.insert(item("a", "q", "a", None), vec![1.0, 0.0, 0.0]);

        let (engine, _) = retriever(store, vec![1.0, 0.0], SearchConfig::default());

        let result = engine.search("query", 5).await;
        assert!(matches!(result, Err(SearchError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_source_cap_applied() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.insert(
                item(&format!("x{}", i), "the same question", "an answer", Some("X")),
                vec![1.0, 0.0],
            );
        }

        let (engine, _) = retriever(store, vec![1.0, 0.0], SearchConfig::default());

        let hits = engine.search("question", 10).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_hybrid_floor() {
        let mut store = MemoryStore::new();
        store.insert(item("strong", "refund policy question", "yes", None), vec![1.0, 0.0]);
        store.insert(item("weak", "unrelated topic entirely", "yes", None), vec![0.3, 0.9]);

        let config = SearchConfig {
            hybrid_floor: Some(HYBRID_FLOOR),
            ..SearchConfig::default()
        };
        let (engine, _) = retriever(store, vec![1.0, 0.0], config);

        let hits = engine.search("refund policy question", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "strong");
    }

    #[tokio::test]
    async fn test_pagination_through_engine() {
        // 2500행을 페이지 1000으로 전부 소비 (3 페이지, 마지막 부분)
        let mut store = MemoryStore::new();
        for i in 0..2500 {
            let src = format!("doc-{}", i); // 소스 상한이 걸리지 않도록 전부 다른 소스
            store.insert(
                item(&format!("item-{:05}", i), "question", "answer", Some(src.as_str())),
                vec![1.0, 0.0],
            );
        }

        let config = SearchConfig {
            page_size: 1000,
            ..SearchConfig::default()
        };
        let (engine, _) = retriever(store, vec![1.0, 0.0], config);

        let hits = engine.search("question", 10).await.unwrap();
        assert_eq!(hits.len(), 10);

        // 결과 중복 없음
        let mut ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn test_results_ordered_by_score_then_id() {
        let mut store = MemoryStore::new();
        store.insert(item("b", "exact question match", "a", Some("1")), vec![1.0, 0.0]);
        store.insert(item("a", "exact question match", "a", Some("2")), vec![1.0, 0.0]);
        store.insert(item("c", "different text here", "a", Some("3")), vec![0.9, 0.1]);

        let (engine, _) = retriever(store, vec![1.0, 0.0], SearchConfig::default());

        let hits = engine.search("exact question match", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        // 동점인 a/b는 id 순, c는 점수가 낮아 마지막
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
        assert_eq!(hits[2].id, "c");
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty() {
        let (engine, embedder) = retriever(MemoryStore::new(), vec![1.0], SearchConfig::default());

        let hits = engine.search("anything", 5).await.unwrap();
        assert!(hits.is_empty());
        // 쿼리가 비어 있지 않으므로 임베딩은 호출됩니다
        assert_eq!(embedder.calls(), 1);
    }
}
