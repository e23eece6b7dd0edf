//! 후보 로더 - 페이지 단위 스트리밍 + 메타데이터 배치 조인
//!
//! 원격 저장소는 통째로 메모리에 올릴 수 없으므로 임베딩 행을
//! 고정 크기 페이지로 읽고, 페이지마다 한 번의 배치 조회로 텍스트
//! 메타데이터를 조인합니다 (아이템 단위 조회는 성능 버그).

use std::collections::HashMap;

use crate::store::{ItemStore, KnowledgeItem};

use super::SearchError;

/// 페이지 조인 결과 행
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub item: KnowledgeItem,
    pub embedding: Vec<f32>,
}

/// 페이지 커서
///
/// 검색 호출마다 offset 0에서 새로 생성됩니다. 중간 재개 토큰은
/// 없습니다. 페이지가 `page_size`보다 적은 행을 반환하면 스트림의
/// 끝입니다.
pub struct CandidatePages<'a> {
    store: &'a dyn ItemStore,
    page_size: usize,
    offset: usize,
    done: bool,
}

impl<'a> CandidatePages<'a> {
    pub fn new(store: &'a dyn ItemStore, page_size: usize) -> Self {
        Self {
            store,
            page_size,
            offset: 0,
            done: false,
        }
    }

    /// 다음 페이지 로드. 스트림이 끝나면 `Ok(None)`.
    ///
    /// 페이지 조회나 조인 조회가 실패하면 검색 전체가 해당 에러로
    /// 중단됩니다. 이미 내보낸 페이지의 부분 결과는 호출부가
    /// 버립니다.
    pub async fn next_page(&mut self) -> Result<Option<Vec<CandidateRow>>, SearchError> {
        if self.done {
            return Ok(None);
        }

        let rows = self
            .store
            .page_embeddings(self.offset, self.page_size)
            .await?;

        if rows.len() < self.page_size {
            self.done = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }
        self.offset += rows.len();

        // 메타데이터 배치 조인 (페이지당 1회)
        let ids: Vec<String> = rows.iter().map(|r| r.item_id.clone()).collect();
        let items = self.store.items_by_ids(&ids).await?;

        let mut by_id: HashMap<String, KnowledgeItem> =
            items.into_iter().map(|it| (it.id.clone(), it)).collect();

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match by_id.remove(&row.item_id) {
                Some(item) => out.push(CandidateRow {
                    item,
                    embedding: row.embedding,
                }),
                None => {
                    // 메타데이터 없는 고아 임베딩 행은 검색 불가
                    tracing::warn!("embedding row without item metadata: {}", row.item_id);
                }
            }
        }

        Ok(Some(out))
    }
}

// ============================================================================
// Tests
// ============================================================================
