//! 字符串字典
//!
//! 字符串字段写入 BSI 的数值是 `CRC32("field=value")`；字典只负责
//! hash → 字符串的反查（展示 breakdown 分组）以及正则过滤时的值扫描。
//! 两类 key 都按字段隔离，见 `shard` 模块的 key 布局。

use std::num::NonZeroUsize;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use rocksdb::{Direction, IteratorMode, Snapshot};
use crate::common::{EngineError, Hash32, Result};
use crate::shard::{decode_u32, translate_id_key, translate_key_prefix};

/// 字段值的 32 位代理值
pub fn hash(field: &str, value: &str) -> Hash32 {
    let mut h = crc32fast::Hasher::new();
    h.update(field.as_bytes());
    h.update(b"=");
    h.update(value.as_bytes());
    h.finalize()
}

/// 有界的反查缓存；读多写少，单把锁足够
pub struct Dictionary {
    cache: Mutex<LruCache<(String, Hash32), String>>,
}

impl Dictionary {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self { cache: Mutex::new(LruCache::new(cap)) }
    }

    /// 是否已缓存（不刷新 LRU 顺序）
    pub fn contains(&self, field: &str, hash: Hash32) -> bool {
        self.cache.lock().contains(&(field.to_string(), hash))
    }

    pub fn remember(&self, field: &str, hash: Hash32, value: &str) {
        self.cache.lock().put((field.to_string(), hash), value.to_string());
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// hash → 原始字符串；先查缓存，未命中再读快照并回填
    pub fn translate(&self, snapshot: &Snapshot<'_>, field: &str, hash: Hash32) -> Result<Option<String>> {
        let key = (field.to_string(), hash);
        if let Some(v) = self.cache.lock().get(&key) {
            return Ok(Some(v.clone()));
        }
        let raw = snapshot
            .get(translate_id_key(field, hash))
            .map_err(|e| EngineError::storage("translate", format!("field={field} hash={hash}"), e))?;
        let Some(raw) = raw else { return Ok(None) };
        let value = String::from_utf8(raw)
            .map_err(|e| EngineError::CorruptValue(format!("dictionary value for {field}: {e}")))?;
        self.cache.lock().put(key, value.clone());
        Ok(Some(value))
    }

    /// 扫描字段的全部字典字符串，返回匹配 `re` 的 hash 列表
    pub fn search(&self, snapshot: &Snapshot<'_>, field: &str, re: &Regex) -> Result<Vec<Hash32>> {
        let prefix = translate_key_prefix(field);
        let mut out = Vec::new();
        for item in snapshot.iterator(IteratorMode::From(prefix.as_slice(), Direction::Forward)) {
            let (key, value) = item
                .map_err(|e| EngineError::storage("dictionary scan", format!("field={field}"), e))?;
            if !key.starts_with(&prefix) { break; }
            let Ok(text) = std::str::from_utf8(&key[prefix.len()..]) else { continue };
            if re.is_match(text) {
                out.push(decode_u32(&value)?);
            }
        }
        Ok(out)
    }
}
