//! 임베딩 모듈 - OpenAI API를 통한 텍스트 벡터화
//!
//! 텍스트를 고정 길이 벡터로 변환하는 임베딩 프로바이더입니다.
//! 재시도 정책은 호출부마다 손으로 말아 넣지 않고 `RetryPolicy`로
//! 어댑터에 주입합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_env()?;
//! let embedding = embedder.embed("What is the refund policy?").await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// 임베딩 프로바이더 에러
///
/// 검색 호출자에게 그대로 전파됩니다. 이 크레이트는 `RetryPolicy`가
/// 소진된 후에는 추가로 재시도하지 않습니다.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("API key not set: {0}")]
    MissingKey(String),

    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("embedding failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("unexpected embedding response: {0}")]
    Parse(String),
}

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 고정 차원 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Retry Policy
// ============================================================================

/// 재시도 정책 (어댑터에 주입)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 지수 백오프 기본 간격
    pub backoff_base: Duration,
    /// 재시도 대상 HTTP 상태 코드
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(2000),
            retryable_statuses: vec![429, 500, 502, 503],
        }
    }
}

impl RetryPolicy {
    /// n번째 시도 후 대기 시간 (지수 백오프)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 임베딩 API 엔드포인트
/// ref: https://platform.openai.com/docs/api-reference/embeddings
const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// 기본 임베딩 모델
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// 기본 임베딩 차원 (text-embedding-3-small)
pub const DEFAULT_DIMENSION: usize = 1536;

/// OpenAI 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbedding {
    /// 새 OpenAI 임베딩 인스턴스 생성 (기본 모델)
    pub fn new(api_key: String) -> Result<Self, EmbeddingError> {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    /// 모델을 지정하여 생성
    pub fn with_model(api_key: String, model: String) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let dimension = model_dimension(&model);

        Ok(Self {
            api_key,
            model,
            client,
            dimension,
            retry: RetryPolicy::default(),
        })
    }

    /// 환경변수에서 생성
    ///
    /// API 키: `OPENAI_API_KEY`, 모델: `EMBEDDING_MODEL` (선택)
    pub fn from_env() -> Result<Self, EmbeddingError> {
        let api_key = get_api_key()?;
        let model =
            std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::with_model(api_key, model)
    }

    /// 재시도 정책 교체
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 모델 이름 반환
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// 모델별 기본 차원
fn model_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        _ => DEFAULT_DIMENSION,
    }
}

/// OpenAI API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// OpenAI API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// OpenAI API 에러 응답
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // 빈 텍스트는 API 호출 없이 영벡터 반환
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        // text-embedding-3-* 계열만 차원 축소 파라미터 지원
        let dimensions = if self.model.starts_with("text-embedding-3") {
            Some(self.dimension)
        } else {
            None
        };

        let request = EmbedRequest {
            model: &self.model,
            input: text,
            dimensions,
        };

        let mut last_message = String::new();

        for attempt in 0..self.retry.max_attempts {
            let response = match self
                .client
                .post(OPENAI_EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_message = e.to_string();
                    if attempt + 1 < self.retry.max_attempts {
                        let backoff = self.retry.backoff(attempt);
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            self.retry.max_attempts
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status().as_u16();
            let body = response.text().await?;

            if (200..300).contains(&status) {
                let parsed: EmbedResponse = serde_json::from_str(&body)
                    .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

                let embedding = parsed
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| EmbeddingError::Parse("empty data array".to_string()))?;

                if embedding.len() != self.dimension {
                    return Err(EmbeddingError::Parse(format!(
                        "expected dimension {}, got {}",
                        self.dimension,
                        embedding.len()
                    )));
                }

                return Ok(embedding);
            }

            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);

            // 재시도 불가 상태 코드는 즉시 실패
            if !self.retry.is_retryable(status) {
                return Err(EmbeddingError::Api { status, message });
            }

            last_message = format!("{} ({})", message, status);
            if attempt + 1 < self.retry.max_attempts {
                let backoff = self.retry.backoff(attempt);
                tracing::warn!(
                    "Embedding API returned {}, backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    self.retry.max_attempts
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(EmbeddingError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            message: last_message,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (OPENAI_API_KEY 환경변수)
pub fn get_api_key() -> Result<String, EmbeddingError> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(EmbeddingError::MissingKey(
            "set the OPENAI_API_KEY environment variable".to_string(),
        )),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var("OPENAI_API_KEY")
        .map(|key| !key.is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
