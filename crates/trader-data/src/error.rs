//! 영속성 에러 타입.

use thiserror::Error;

/// 저장소 작업 에러.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 데이터베이스 에러
    #[error("데이터베이스 에러: {0}")]
    Database(#[from] sqlx::Error),

    /// 저장된 값을 해석할 수 없음
    #[error("손상된 레코드: {0}")]
    Corrupt(String),
}

/// 저장소 Result 타입.
pub type Result<T> = std::result::Result<T, StoreError>;
