//! 写入器：把事件行累积成当前分片的字段位图，分片翻转或定期 flush 时
//! 以一次原子 WriteBatch 写出（字段位图走 merge，时间范围与字典走 put）
//!
//! Batch 不是并发安全的：同一时刻只能有一个线程持有并调用 `write`。

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use roaring::RoaringBitmap;
use rocksdb::WriteBatch;
use tracing::{debug, info, warn};

use crate::bsi::encode_int;
use crate::common::{Hash32, Result, RowId, ShardId, FIELD_DATE, FIELD_TIMESTAMP, MILLIS_PER_DAY};
use crate::dictionary::{self, Dictionary};
use crate::merge::encode_bitmap;
use crate::shard::{
    encode_i64, encode_u32, encode_u64, field_key, sequence_key, shard_of, time_max_key,
    time_min_key, translate_id_key, translate_key_key, TimeRange,
};
use crate::store::Store;

/// 写入单行时暴露给调用方的能力
///
/// `timestamp` 与 `date` 由 [`Batch::write`] 自动写入，调用方对这两个
/// 字段的写入会被忽略并记录 warn。
pub trait Index {
    fn int64(&mut self, field: &str, value: i64);
    fn string(&mut self, field: &str, value: &str);
    fn bool(&mut self, field: &str, value: bool);
}

/// 事件时间截断到 UTC 当日零点
pub fn truncate_to_day(ts: i64) -> i64 {
    ts - ts.rem_euclid(MILLIS_PER_DAY)
}

pub struct Batch {
    store:     Store,
    /// 当前打开的分片
    shard:     Option<ShardId>,
    fields:    HashMap<String, RoaringBitmap>,
    /// 尚未持久化的字典条目
    translate: HashMap<(String, Hash32), String>,
    /// 当前分片的 [min, max]，跨 flush 保留，分片翻转时重置
    range:     TimeRange,
    pending:   u64,
}

impl Batch {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            store,
            shard:     None,
            fields:    HashMap::new(),
            translate: HashMap::new(),
            range:     TimeRange::empty(),
            pending:   0,
        }
    }

    /// 当前打开的分片号
    pub fn shard(&self) -> Option<ShardId> { self.shard }

    /// 自上次 flush 以来累积的行数
    pub fn pending_rows(&self) -> u64 { self.pending }

    /// 写入一行：分配行号，必要时先 flush 上一个分片，再由 `f` 编码字段
    pub fn write<F>(&mut self, timestamp: i64, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Index),
    {
        let id    = self.store.sequence().load(Ordering::Acquire);
        let shard = shard_of(id);
        match self.shard {
            Some(open) if open == shard => {}
            Some(_) => {
                // flush 失败时保持旧分片打开，行号也不消耗
                self.flush()?;
                self.open_shard(shard)?;
            }
            None => self.open_shard(shard)?,
        }
        self.store.sequence().store(id + 1, Ordering::Release);

        let mut row = Row {
            id,
            fields:     &mut self.fields,
            translate:  &mut self.translate,
            dictionary: self.store.dictionary(),
        };
        row.encode(FIELD_TIMESTAMP, timestamp);
        row.encode(FIELD_DATE, truncate_to_day(timestamp));
        f(&mut row);

        self.range.observe(timestamp);
        self.pending += 1;
        Ok(())
    }

    fn open_shard(&mut self, shard: ShardId) -> Result<()> {
        // 进程重启后续写同一分片：沿用已持久化的范围，避免覆盖时缩小
        self.range = self.store.shard_time_range(shard)?.unwrap_or_else(TimeRange::empty);
        self.shard = Some(shard);
        Ok(())
    }

    /// 写出累积的位图、时间范围、字典与行序号；分片保持打开
    pub fn flush(&mut self) -> Result<()> {
        let Some(shard) = self.shard else { return Ok(()) };
        if self.pending == 0 { return Ok(()); }

        let mut wb = WriteBatch::default();
        for (name, bitmap) in &self.fields {
            wb.merge(field_key(shard, name), encode_bitmap(bitmap));
        }
        if !self.range.is_empty() {
            wb.put(time_min_key(shard), encode_i64(self.range.min));
            wb.put(time_max_key(shard), encode_i64(self.range.max));
        }
        for ((field, hash), value) in &self.translate {
            wb.put(translate_id_key(field, *hash), value.as_bytes());
            wb.put(translate_key_key(field, value), encode_u32(*hash));
        }
        wb.put(sequence_key(), encode_u64(self.store.sequence().load(Ordering::Acquire)));

        // 写失败时累积状态原样保留，可重试
        self.store.write(wb, format!("shard={shard}"))?;

        let dict = self.store.dictionary();
        for ((field, hash), value) in self.translate.drain() {
            dict.remember(&field, hash, &value);
        }
        debug!(shard, rows = self.pending, fields = self.fields.len(), "flushed shard");
        self.fields.clear();
        self.pending = 0;
        Ok(())
    }

    /// 最终 flush 并持久化行序号
    pub fn release(&mut self) -> Result<()> {
        self.flush()?;
        let next = self.store.sequence().load(Ordering::Acquire);
        let mut wb = WriteBatch::default();
        wb.put(sequence_key(), encode_u64(next));
        self.store.write(wb, "release")?;
        info!(sequence = next, "batch released");
        Ok(())
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.pending > 0 {
            warn!(shard = ?self.shard, rows = self.pending, "batch dropped with unflushed rows");
        }
    }
}

// ── 单行写入视图 ─────────────────────────────────────────────────────────────

struct Row<'b> {
    id:         RowId,
    fields:     &'b mut HashMap<String, RoaringBitmap>,
    translate:  &'b mut HashMap<(String, Hash32), String>,
    dictionary: &'b Dictionary,
}

fn is_reserved(field: &str) -> bool {
    field == FIELD_TIMESTAMP || field == FIELD_DATE
}

impl Row<'_> {
    fn encode(&mut self, field: &str, value: i64) {
        let id = self.id;
        let bitmap = self.fields.entry(field.to_string()).or_default();
        encode_int(bitmap, id, value);
    }

    /// 保留字段已由 `Batch::write` 写入，再写会把两个值的位 OR 在一起
    fn accepts(&self, field: &str) -> bool {
        if is_reserved(field) {
            warn!(field, row = self.id, "ignoring write to reserved field");
            return false;
        }
        true
    }
}

impl Index for Row<'_> {
    fn int64(&mut self, field: &str, value: i64) {
        if self.accepts(field) {
            self.encode(field, value);
        }
    }

    fn string(&mut self, field: &str, value: &str) {
        if !self.accepts(field) { return; }
        let hash = dictionary::hash(field, value);
        self.encode(field, hash as i64);
        if !self.dictionary.contains(field, hash) {
            self.translate
                .entry((field.to_string(), hash))
                .or_insert_with(|| value.to_string());
        }
    }

    fn bool(&mut self, field: &str, value: bool) {
        if self.accepts(field) {
            self.encode(field, value as i64);
        }
    }
}
