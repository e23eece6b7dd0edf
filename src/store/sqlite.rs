//! SQLite Item Store - rusqlite 기반 지식 아이템 저장소
//!
//! 아이템 메타데이터(kb_items)와 임베딩 벡터(kb_embeddings)를
//! 하나의 SQLite 파일에 저장합니다. 임베딩은 리틀 엔디언 f32 BLOB입니다.
//! 저장 위치: ~/.kb-rag/knowledge.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use uuid::Uuid;

use super::{get_data_dir, EmbeddingRow, ItemStore, KnowledgeItem, NewItem, StoreError, StoreStats};

/// IN (...) 절 파라미터 청크 크기 (SQLite 변수 개수 제한 안쪽)
const MAX_IN_PARAMS: usize = 500;

// ============================================================================
// SqliteStore
// ============================================================================

/// SQLite 기반 지식 아이템 저장소
///
/// 시작 시 한 번 열어 `Arc`로 공유합니다. 검색은 읽기만 수행하므로
/// 동시 검색 간 별도 동기화가 필요 없습니다.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(format!("create db directory: {}", e)))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.kb-rag/knowledge.db)
    pub fn open_default() -> Result<Self, StoreError> {
        let db_path = get_data_dir().join("knowledge.db");
        Self::open(&db_path)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kb_items (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL DEFAULT '',
                source TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_kb_items_batch ON kb_items(batch_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kb_embeddings (
                item_id TEXT PRIMARY KEY REFERENCES kb_items(id),
                batch_id TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_kb_embeddings_batch ON kb_embeddings(batch_id)",
            [],
        )?;

        tracing::debug!("item store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 아이템 배치 저장 (아이템 + 임베딩을 한 트랜잭션으로)
    ///
    /// 새 배치 ID를 생성하여 반환합니다. 배치 내 모든 임베딩은
    /// 같은 차원이어야 합니다 (차원 혼합은 설정 오류).
    pub fn add_batch(&self, items: &[NewItem]) -> Result<String, StoreError> {
        let batch_id = Uuid::new_v4().to_string();
        if items.is_empty() {
            return Ok(batch_id);
        }

        let dimension = items[0].embedding.len();
        for item in items {
            if item.embedding.len() != dimension {
                return Err(StoreError::InvalidEmbedding(format!(
                    "mixed dimensions in batch: expected {}, got {}",
                    dimension,
                    item.embedding.len()
                )));
            }
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for item in items {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO kb_items (id, batch_id, question, answer, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, batch_id, item.question, item.answer, item.source, now],
            )?;
            tx.execute(
                "INSERT INTO kb_embeddings (item_id, batch_id, dimension, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    batch_id,
                    dimension as i64,
                    encode_embedding(&item.embedding)
                ],
            )?;
        }

        tx.commit()?;
        tracing::info!("Added batch {} ({} items, dim={})", batch_id, items.len(), dimension);

        Ok(batch_id)
    }

    /// 최근 아이템 목록 조회
    pub fn list_items(&self, limit: usize) -> Result<Vec<KnowledgeItem>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, batch_id, question, answer, source, created_at FROM kb_items
             ORDER BY created_at DESC, id
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;

        let item_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM kb_items", [], |row| row.get(0))?;
        let vector_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM kb_embeddings", [], |row| row.get(0))?;
        let batch_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT batch_id) FROM kb_items",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            item_count: item_count as usize,
            vector_count: vector_count as usize,
            batch_count: batch_count as usize,
        })
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn page_embeddings(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EmbeddingRow>, StoreError> {
        let raw: Vec<(String, String, Vec<u8>)> = {
            let conn = self.lock()?;

            let mut stmt = conn.prepare(
                "SELECT item_id, batch_id, embedding FROM kb_embeddings
                 ORDER BY item_id
                 LIMIT ?1 OFFSET ?2",
            )?;

            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

            let mut raw = Vec::new();
            for row in rows {
                raw.push(row?);
            }
            raw
        };

        let mut out = Vec::with_capacity(raw.len());
        for (item_id, batch_id, blob) in raw {
            let embedding = decode_embedding(&blob)
                .map_err(|e| StoreError::Decode(format!("item {}: {}", item_id, e)))?;
            out.push(EmbeddingRow {
                item_id,
                batch_id,
                embedding,
            });
        }

        Ok(out)
    }

    async fn items_by_ids(&self, ids: &[String]) -> Result<Vec<KnowledgeItem>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut items = Vec::with_capacity(ids.len());

        // SQLite 변수 개수 제한 안쪽으로 청크 분할 (청크당 쿼리 1회)
        for chunk in ids.chunks(MAX_IN_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT id, batch_id, question, answer, source, created_at FROM kb_items
                 WHERE id IN ({})",
                placeholders
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_item)?;

            for row in rows {
                items.push(row?);
            }
        }

        Ok(items)
    }

    async fn items_by_batch(&self, batch_id: &str) -> Result<Vec<KnowledgeItem>, StoreError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, batch_id, question, answer, source, created_at FROM kb_items
             WHERE batch_id = ?1
             ORDER BY id",
        )?;

        let rows = stmt.query_map(params![batch_id], row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeItem> {
    Ok(KnowledgeItem {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        question: row.get(2)?,
        answer: row.get(3)?,
        source: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// f32 벡터를 리틀 엔디언 BLOB으로 인코딩
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// 리틀 엔디언 BLOB을 f32 벡터로 디코딩
fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!("blob length {} is not a multiple of 4", bytes.len()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
