//! CLI 명령 구현.

pub mod replay;
pub mod run;
pub mod status;
