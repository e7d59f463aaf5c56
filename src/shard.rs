//! 分片布局与存储 key 编码
//!
//! ```text
//! 0x01                              → 下一个行序号        (u64 BE)
//! 0x02 | shard u64 | field          → 字段 BSI 位图      (roaring，merge 合并)
//! 0x03 | shard u64                  → 分片最小时间戳      (i64 BE)
//! 0x04 | shard u64                  → 分片最大时间戳      (i64 BE)
//! 0x05 | field | 0x00 | hash u32    → 字典：hash → 字符串
//! 0x06 | field | 0x00 | value       → 字典：字符串 → hash（去重标记 / 正则扫描空间）
//! ```
//!
//! 所有整数大端编码，保证同一前缀下按分片号有序。

use byteorder::{BigEndian, ByteOrder};
use crate::common::{EngineError, Hash32, Result, RowId, ShardId, SHARD_WIDTH};

pub const PREFIX_SEQUENCE:      u8 = 0x01;
pub const PREFIX_FIELD:         u8 = 0x02;
pub const PREFIX_TIME_MIN:      u8 = 0x03;
pub const PREFIX_TIME_MAX:      u8 = 0x04;
pub const PREFIX_TRANSLATE_ID:  u8 = 0x05;
pub const PREFIX_TRANSLATE_KEY: u8 = 0x06;

const FIELD_SEP: u8 = 0x00;

// ── 行号 → (分片, 片内偏移) ───────────────────────────────────────────────────

#[inline]
pub fn shard_of(id: RowId) -> ShardId {
    id / SHARD_WIDTH
}

#[inline]
pub fn fragment_of(id: RowId) -> u32 {
    (id % SHARD_WIDTH) as u32
}

// ── Key 构造 ──────────────────────────────────────────────────────────────────

pub fn sequence_key() -> [u8; 1] {
    [PREFIX_SEQUENCE]
}

fn shard_key(prefix: u8, shard: ShardId, extra: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + extra);
    key.push(prefix);
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, shard);
    key.extend_from_slice(&buf);
    key
}

pub fn field_key(shard: ShardId, field: &str) -> Vec<u8> {
    let mut key = shard_key(PREFIX_FIELD, shard, field.len());
    key.extend_from_slice(field.as_bytes());
    key
}

pub fn time_min_key(shard: ShardId) -> Vec<u8> {
    shard_key(PREFIX_TIME_MIN, shard, 0)
}

pub fn time_max_key(shard: ShardId) -> Vec<u8> {
    shard_key(PREFIX_TIME_MAX, shard, 0)
}

fn field_scoped(prefix: u8, field: &str, extra: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + field.len() + extra);
    key.push(prefix);
    key.extend_from_slice(field.as_bytes());
    key.push(FIELD_SEP);
    key
}

pub fn translate_id_key(field: &str, hash: Hash32) -> Vec<u8> {
    let mut key = field_scoped(PREFIX_TRANSLATE_ID, field, 4);
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, hash);
    key.extend_from_slice(&buf);
    key
}

pub fn translate_key_key(field: &str, value: &str) -> Vec<u8> {
    let mut key = field_scoped(PREFIX_TRANSLATE_KEY, field, value.len());
    key.extend_from_slice(value.as_bytes());
    key
}

/// 某字段全部字典字符串所在的 key 前缀
pub fn translate_key_prefix(field: &str) -> Vec<u8> {
    field_scoped(PREFIX_TRANSLATE_KEY, field, 0)
}

// ── Key / Value 解析 ──────────────────────────────────────────────────────────

/// 解析 `prefix | shard` 形式 key 中的分片号
pub fn parse_shard(key: &[u8]) -> Option<ShardId> {
    if key.len() < 9 { return None; }
    Some(BigEndian::read_u64(&key[1..9]))
}

pub fn encode_i64(v: i64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_i64(&mut buf, v);
    buf
}

pub fn decode_i64(data: &[u8]) -> Result<i64> {
    if data.len() != 8 {
        return Err(EngineError::CorruptValue(format!("expected 8 bytes, got {}", data.len())));
    }
    Ok(BigEndian::read_i64(data))
}

pub fn encode_u64(v: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, v);
    buf
}

pub fn decode_u64(data: &[u8]) -> Result<u64> {
    if data.len() != 8 {
        return Err(EngineError::CorruptValue(format!("expected 8 bytes, got {}", data.len())));
    }
    Ok(BigEndian::read_u64(data))
}

pub fn encode_u32(v: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, v);
    buf
}

pub fn decode_u32(data: &[u8]) -> Result<u32> {
    if data.len() != 4 {
        return Err(EngineError::CorruptValue(format!("expected 4 bytes, got {}", data.len())));
    }
    Ok(BigEndian::read_u32(data))
}

// ── 分片时间范围 ──────────────────────────────────────────────────────────────

/// 分片内观测到的 [min, max] 事件时间（闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub min: i64,
    pub max: i64,
}

impl TimeRange {
    pub fn new(min: i64, max: i64) -> Self { Self { min, max } }

    /// 尚未观测任何时间戳
    pub fn empty() -> Self { Self { min: i64::MAX, max: i64::MIN } }

    pub fn is_empty(&self) -> bool { self.min > self.max }

    pub fn observe(&mut self, ts: i64) {
        self.min = self.min.min(ts);
        self.max = self.max.max(ts);
    }

    /// 与查询区间 [start, end) 是否相交
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        !self.is_empty() && self.min < end && self.max >= start
    }
}

impl Default for TimeRange {
    fn default() -> Self { Self::empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_boundary() {
        assert_eq!(shard_of(0), 0);
        assert_eq!(shard_of(SHARD_WIDTH - 1), 0);
        assert_eq!(fragment_of(SHARD_WIDTH - 1), (SHARD_WIDTH - 1) as u32);
        assert_eq!(shard_of(SHARD_WIDTH), 1);
        assert_eq!(fragment_of(SHARD_WIDTH), 0);
    }

    #[test]
    fn field_keys_sort_by_shard() {
        let a = field_key(1, "zzz");
        let b = field_key(2, "aaa");
        assert!(a < b);
        assert_eq!(parse_shard(&a), Some(1));
        assert_eq!(parse_shard(&time_max_key(7)), Some(7));
    }

    #[test]
    fn translate_keys_are_field_scoped() {
        let prefix = translate_key_prefix("country");
        assert!(translate_key_key("country", "US").starts_with(&prefix));
        // "country2" 不能落入 "country" 的前缀空间
        assert!(!translate_key_key("country2", "US").starts_with(&prefix));
    }

    #[test]
    fn time_range_overlap() {
        let r = TimeRange::new(100, 200);
        assert!(r.overlaps(0, 101));
        assert!(!r.overlaps(0, 100));
        assert!(r.overlaps(200, 300));
        assert!(!r.overlaps(201, 300));
        assert!(!TimeRange::empty().overlaps(i64::MIN, i64::MAX));
    }
}
