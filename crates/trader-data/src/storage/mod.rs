//! 저장소 구현.

pub mod sqlite;
