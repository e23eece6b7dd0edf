//! Retrieval 모듈 - 하이브리드 검색 + MMR 다변화 엔진
//!
//! 쿼리 하나와 후보 풀에서 k개의 점수순·소스 다변화 결과를 만듭니다.
//!
//! - score: 렉시컬/시맨틱 스코어러 + 하이브리드 결합
//! - loader: 페이지 단위 후보 스트리밍 + 메타데이터 조인
//! - diversity: MMR 선택 + 소스별 상한
//! - engine: 검색 오케스트레이터 (`Retriever::search`)

mod diversity;
mod engine;
mod loader;
mod score;

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::store::StoreError;

pub use diversity::{cap_by_source, mmr, Candidate};
pub use engine::{
    Retriever, ScoreBreakdown, SearchConfig, SearchHit, HYBRID_FLOOR, SEMANTIC_FLOOR,
};
pub use loader::{CandidatePages, CandidateRow};
pub use score::{cosine_similarity, hybrid_score, lexical_score, tokenize};

// ============================================================================
// Errors
// ============================================================================

/// 검색 에러 분류
///
/// 모든 에러는 `search` 호출자에게 동기적으로 전파됩니다.
/// 코어 내부에 로깅 후 계속 진행하는 경로는 없습니다.
#[derive(Debug, Error)]
pub enum SearchError {
    /// 범위를 벗어난 k 등 입력 오류. 호출자가 수정 후 재시도 가능.
    /// (빈 쿼리는 에러가 아니라 빈 결과입니다.)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 임베딩 프로바이더 실패 (인증, 쿼터, 타임아웃). 그대로 노출되며
    /// 이 코어는 정책 소진 후 재시도하지 않습니다.
    #[error("embedding provider error: {0}")]
    Provider(#[from] EmbeddingError),

    /// 저장소 실패. 진행 중인 검색이 중단되고 부분 결과는 없습니다 -
    /// 불완전한 풀 위의 랭킹은 관련성을 조용히 왜곡하기 때문입니다.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 설정 오류 (예: 쿼리와 저장 벡터의 임베딩 차원 불일치).
    /// 0 유사도와 혼동하면 안 되는 별도 분류입니다.
    #[error("configuration error: {0}")]
    Configuration(String),
}
