//! 스코어링 - 렉시컬 / 시맨틱 / 하이브리드
//!
//! 두 관련성 신호를 계산하고 하나의 랭킹 스코어로 결합합니다.
//!
//! - 렉시컬: 토큰 집합 겹침 비율, [0, 1]
//! - 시맨틱: 임베딩 코사인 유사도, [-1, 1]
//! - 하이브리드: 두 신호의 가중 결합, 주 관련성 신호

use std::collections::HashSet;

/// 렉시컬 분모 하한
///
/// 토큰이 1~2개뿐인 쿼리/후보가 사소한 겹침만으로 1.0에 포화되는 것을
/// 방지합니다.
const MIN_TOKEN_DENOM: usize = 3;

/// 텍스트를 토큰 집합으로 분해
///
/// 소문자화 후 영숫자 외 문자를 공백으로 치환하고 공백 기준으로
/// 분리합니다. 중복 토큰은 하나로 접힙니다 (집합 의미론).
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// 렉시컬 스코어 - 토큰 집합 겹침 비율
///
/// `|교집합| / max(3, min(|A|, |B|))`, 결과는 [0, 1].
/// 어느 한쪽 토큰 집합이 비어 있으면 0입니다.
pub fn lexical_score(query: &str, candidate: &str) -> f32 {
    let query_tokens = tokenize(query);
    let candidate_tokens = tokenize(candidate);

    if query_tokens.is_empty() || candidate_tokens.is_empty() {
        return 0.0;
    }

    let intersection = query_tokens.intersection(&candidate_tokens).count();
    let denom = MIN_TOKEN_DENOM.max(query_tokens.len().min(candidate_tokens.len()));

    intersection as f32 / denom as f32
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 어느 한쪽 벡터의 크기가 0이면
/// 0을 반환합니다 (0으로 나누기 없음).
///
/// 길이가 다른 벡터는 차원 설정 오류이며, 호출부(검색 엔진)가 스코어링
/// 전에 검증합니다. 이 함수 자체는 불일치 시 0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 하이브리드 스코어 - 시맨틱과 렉시컬의 볼록 결합
///
/// `(1 - w) * semantic + w * lexical`. `w`는 설정값이며
/// 확률로 해석하면 안 됩니다.
pub fn hybrid_score(semantic: f32, lexical: f32, lexical_weight: f32) -> f32 {
    (1.0 - lexical_weight) * semantic + lexical_weight * lexical
}

// ============================================================================
// Tests
// ============================================================================
