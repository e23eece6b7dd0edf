//! CLI 모듈
//!
//! kb-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::embedding::{has_api_key, EmbeddingProvider, OpenAiEmbedding};
use crate::retrieval::{Retriever, SearchConfig, SEMANTIC_FLOOR};
use crate::store::{get_data_dir, NewItem, SqliteStore};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "kb-rag")]
#[command(version, about = "지식베이스 하이브리드 검색 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Q/A 아이템 수집 (JSONL 파일)
    Ingest {
        /// JSONL 파일 경로 (한 줄에 {"question", "answer", "source"?} 하나)
        #[arg(short, long)]
        file: PathBuf,

        /// 전체 아이템에 적용할 소스 라벨 (레코드별 소스보다 우선)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// 지식베이스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (1~50)
        #[arg(short, long, default_value = "8")]
        k: usize,

        /// 시맨틱 스코어 하한
        #[arg(long, default_value_t = SEMANTIC_FLOOR)]
        floor: f32,

        /// 스코어 하한 미적용
        #[arg(long)]
        no_floor: bool,
    },

    /// 저장된 아이템 목록
    List {
        /// 수집 배치 ID로 필터
        #[arg(short, long)]
        batch: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { file, source } => cmd_ingest(&file, source).await,
        Commands::Query {
            query,
            k,
            floor,
            no_floor,
        } => cmd_query(&query, k, if no_floor { None } else { Some(floor) }).await,
        Commands::List { batch, limit } => cmd_list(batch, limit).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 파일의 레코드 형식
#[derive(Debug, Deserialize)]
struct IngestRecord {
    question: String,
    answer: String,
    #[serde(default)]
    source: Option<String>,
}

/// 수집 명령어 (ingest)
///
/// JSONL 파일의 Q/A 레코드를 임베딩하여 새 배치로 저장합니다.
async fn cmd_ingest(file: &PathBuf, source_override: Option<String>) -> Result<()> {
    ensure_api_key()?;

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("파일을 읽을 수 없습니다: {}", file.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: IngestRecord = serde_json::from_str(line)
            .with_context(|| format!("{}번째 줄 파싱 실패", line_no + 1))?;
        records.push(record);
    }

    if records.is_empty() {
        println!("[!] 수집할 레코드가 없습니다.");
        return Ok(());
    }

    let embedder = OpenAiEmbedding::from_env().context("임베딩 프로바이더 초기화 실패")?;
    let store = SqliteStore::open_default().context("저장소 열기 실패")?;

    println!(
        "[*] {} 레코드 임베딩 중 (모델: {})...",
        records.len(),
        embedder.name()
    );

    // 질문 + 답변을 합쳐 임베딩 (둘 다 의미를 담으므로)
    let texts: Vec<String> = records
        .iter()
        .map(|r| format!("{}\n{}", r.question, r.answer))
        .collect();
    let embeddings = embedder
        .embed_batch(&texts)
        .await
        .context("임베딩 생성 실패")?;

    let items: Vec<NewItem> = records
        .into_iter()
        .zip(embeddings)
        .map(|(r, embedding)| NewItem {
            question: r.question,
            answer: r.answer,
            source: source_override.clone().or(r.source),
            embedding,
        })
        .collect();

    let batch_id = store.add_batch(&items).context("배치 저장 실패")?;

    println!("[OK] {} 아이템이 저장되었습니다", items.len());
    println!("     배치 ID: {}", batch_id);

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(query: &str, k: usize, semantic_floor: Option<f32>) -> Result<()> {
    ensure_api_key()?;

    println!("[*] 검색 중: \"{}\"", query);

    let store = Arc::new(SqliteStore::open_default().context("저장소 열기 실패")?);
    let embedder = Arc::new(OpenAiEmbedding::from_env().context("임베딩 프로바이더 초기화 실패")?);

    let config = SearchConfig {
        semantic_floor,
        ..SearchConfig::default()
    };
    let retriever = Retriever::with_config(store, embedder, config);

    let hits = retriever.search(query, k).await.context("검색 실패")?;

    if hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] (sem {:.4} / lex {:.4})",
            i + 1,
            hit.score,
            hit.scores.semantic,
            hit.scores.lexical
        );
        println!("   Q: {}", truncate_text(&hit.question, 120));
        println!("   A: {}", truncate_text(&hit.answer, 200));
        if let Some(ref source) = hit.source {
            println!("   출처: {}", source);
        }
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(batch: Option<String>, limit: usize) -> Result<()> {
    let store = SqliteStore::open_default().context("저장소 열기 실패")?;

    let items = if let Some(ref batch_id) = batch {
        use crate::store::ItemStore;
        store
            .items_by_batch(batch_id)
            .await
            .context("배치 조회 실패")?
    } else {
        store.list_items(limit).context("아이템 목록 조회 실패")?
    };

    if items.is_empty() {
        println!("[!] 저장된 아이템이 없습니다.");
        return Ok(());
    }

    println!("[OK] 아이템 ({} 건):\n", items.len());

    for item in items.iter().take(limit) {
        let source = item.source.as_deref().unwrap_or("-");
        println!("  {} [{}]", item.id, source);
        println!("    Q: {}", truncate_text(&item.question, 80));
        println!("    A: {}", truncate_text(&item.answer, 80));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("kb-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    match SqliteStore::open_default() {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] 아이템: {} 건 ({} 배치)", stats.item_count, stats.batch_count);
                println!("     임베딩: {} 건", stats.vector_count);
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] 저장소 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn ensure_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\
             설정: export OPENAI_API_KEY=your-key"
        );
    }
    Ok(())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
