//! Store 모듈 - 지식 아이템 + 임베딩 저장소
//!
//! 검색 엔진은 저장소를 읽기 전용 `ItemStore` 트레이트로만 소비합니다.
//! 저장소 핸들은 시작 시 한 번 생성되어 명시적으로 주입됩니다
//! (암묵적 전역 싱글톤 없음).
//!
//! - SqliteStore: rusqlite 기반 구현체 (kb_items + kb_embeddings)
//! - MemoryStore: 테스트/소규모 데모용 인메모리 구현체

mod memory;
mod sqlite;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.kb-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kb-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 지식 아이템 - 검색의 기본 단위 (Q/A 쌍)
///
/// 수집 시 한 번 생성되며 검색 엔진 입장에서는 읽기 전용입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    /// 수집 배치 ID (출처 그룹)
    pub batch_id: String,
    pub question: String,
    /// 답변 텍스트. 비어 있으면 검색 대상에서 제외됩니다.
    pub answer: String,
    /// 출처 라벨 (원본 문서명 등). 없을 수 있습니다.
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 새 아이템 입력용 구조체 (임베딩 포함)
#[derive(Debug, Clone)]
pub struct NewItem {
    pub question: String,
    pub answer: String,
    pub source: Option<String>,
    pub embedding: Vec<f32>,
}

/// 임베딩 행 - 페이지 단위 읽기 결과
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub item_id: String,
    pub batch_id: String,
    pub embedding: Vec<f32>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub item_count: usize,
    pub vector_count: usize,
    pub batch_count: usize,
}

// ============================================================================
// Errors
// ============================================================================

/// 저장소 에러
///
/// 검색 도중 발생하면 해당 검색 전체가 중단됩니다 (부분 결과 없음).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned: {0}")]
    Lock(String),

    #[error("embedding blob decode failed: {0}")]
    Decode(String),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

// ============================================================================
// ItemStore Trait
// ============================================================================

/// ItemStore 트레이트 (async, 읽기 전용)
///
/// 검색 엔진이 소비하는 저장소 인터페이스입니다.
/// 구현체는 `page_embeddings`의 정렬 키가 호출 간에 안정적임을 보장해야 합니다.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// 임베딩 행 페이지 읽기
    ///
    /// item_id 순으로 정렬된 행을 `offset`부터 최대 `limit`개 반환합니다.
    /// `limit`보다 적게 반환되면 스트림의 끝입니다.
    async fn page_embeddings(&self, offset: usize, limit: usize)
        -> Result<Vec<EmbeddingRow>, StoreError>;

    /// id 목록으로 아이템 메타데이터 배치 조회
    async fn items_by_ids(&self, ids: &[String]) -> Result<Vec<KnowledgeItem>, StoreError>;

    /// 배치 ID로 아이템 조회 (수집 배치 확인용)
    async fn items_by_batch(&self, batch_id: &str) -> Result<Vec<KnowledgeItem>, StoreError>;
}
