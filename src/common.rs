//! 全局基础类型、常量与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// 全局单调递增的行序号
pub type RowId   = u64;
/// 分片号：`row_id / SHARD_WIDTH`
pub type ShardId = u64;
/// 字符串字段的 CRC32 代理值
pub type Hash32  = u32;

// ── 常量 ──────────────────────────────────────────────────────────────────────

pub const SHARD_WIDTH_EXPONENT: u32 = 20;

/// 每个分片容纳的行数（2^20）
pub const SHARD_WIDTH: u64 = 1 << SHARD_WIDTH_EXPONENT;

/// 位平面编号
pub const EXISTS_PLANE: u32 = 0;
pub const SIGN_PLANE:   u32 = 1;
pub const OFFSET_PLANE: u32 = 2;

/// 保留字段名
pub const FIELD_DOMAIN:    &str = "domain";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_DATE:      &str = "date";
pub const FIELD_UID:       &str = "uid";
pub const FIELD_SESSION:   &str = "session";
pub const FIELD_VIEW:      &str = "view";
pub const FIELD_BOUNCE:    &str = "bounce";
pub const FIELD_DURATION:  &str = "duration";
pub const FIELD_EVENT:     &str = "event";

pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error during {op} ({context}): {source}")]
    Storage {
        op:      &'static str,
        context: String,
        #[source]
        source:  rocksdb::Error,
    },
    #[error("corrupt bitmap: {context}")]
    CorruptBitmap { context: String },
    #[error("corrupt value: {0}")]
    CorruptValue(String),
    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("query cancelled")]
    Cancelled,
    #[error("ingester closed")]
    Closed,
}

impl EngineError {
    pub(crate) fn storage(op: &'static str, context: impl Into<String>, source: rocksdb::Error) -> Self {
        Self::Storage { op, context: context.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
