//! In-Memory Item Store - 테스트 및 소규모 데모용
//!
//! 페이지 읽기 횟수를 기록하므로 페이지네이션 동작 검증에도 사용됩니다.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{EmbeddingRow, ItemStore, KnowledgeItem, StoreError};

/// 인메모리 지식 아이템 저장소
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Vec<KnowledgeItem>,
    rows: Vec<EmbeddingRow>,
    page_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 아이템과 임베딩을 함께 추가
    pub fn insert(&mut self, item: KnowledgeItem, embedding: Vec<f32>) {
        self.rows.push(EmbeddingRow {
            item_id: item.id.clone(),
            batch_id: item.batch_id.clone(),
            embedding,
        });
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 지금까지 수행된 페이지 읽기 횟수
    pub fn page_reads(&self) -> usize {
        self.page_reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn page_embeddings(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EmbeddingRow>, StoreError> {
        self.page_reads.fetch_add(1, Ordering::Relaxed);

        // 호출 간 안정적 정렬 키: item_id
        let mut sorted: Vec<&EmbeddingRow> = self.rows.iter().collect();
        sorted.sort_by(|a, b| a.item_id.cmp(&b.item_id));

        Ok(sorted
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn items_by_ids(&self, ids: &[String]) -> Result<Vec<KnowledgeItem>, StoreError> {
        Ok(self
            .items
            .iter()
            .filter(|it| ids.contains(&it.id))
            .cloned()
            .collect())
    }

    async fn items_by_batch(&self, batch_id: &str) -> Result<Vec<KnowledgeItem>, StoreError> {
        Ok(self
            .items
            .iter()
            .filter(|it| it.batch_id == batch_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
