//! kb-rag - 지식베이스 하이브리드 검색 엔진
//!
//! 시맨틱(코사인) + 렉시컬(토큰 겹침) 하이브리드 스코어링에
//! MMR 다변화와 소스별 상한을 적용한 Q/A 검색 라이브러리입니다.
//!
//! 후보는 저장소에서 페이지 단위로 스트리밍되며 (전체 적재 불가 전제),
//! 검색 한 번은 완전한 랭킹을 반환하거나 전체가 실패합니다.

pub mod cli;
pub mod embedding;
pub mod retrieval;
pub mod store;

// Re-exports
pub use embedding::{
    get_api_key, has_api_key, EmbeddingError, EmbeddingProvider, OpenAiEmbedding, RetryPolicy,
};
pub use retrieval::{
    cosine_similarity, hybrid_score, lexical_score, Candidate, Retriever, ScoreBreakdown,
    SearchConfig, SearchError, SearchHit, HYBRID_FLOOR, SEMANTIC_FLOOR,
};
pub use store::{
    get_data_dir, EmbeddingRow, ItemStore, KnowledgeItem, MemoryStore, NewItem, SqliteStore,
    StoreError, StoreStats,
};
