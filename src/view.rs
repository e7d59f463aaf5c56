//! 单次查询、单个分片上的 BSI 解码缓存
//!
//! View 绑定一个快照；切换分片时必须 [`View::reset`]，否则会读到上一个
//! 分片的字段。正则扫描结果与分片无关，跨分片保留。

use std::collections::HashMap;
use regex::Regex;
use rocksdb::Snapshot;
use crate::bsi::Bsi;
use crate::common::{EngineError, Hash32, Result, ShardId};
use crate::dictionary::Dictionary;
use crate::merge::decode_bitmap;
use crate::shard::field_key;

pub struct View<'a> {
    snapshot:   &'a Snapshot<'a>,
    dictionary: &'a Dictionary,
    shard:      ShardId,
    fields:     HashMap<String, Bsi>,
    /// (field, pattern) → 匹配的 hash
    searches:   HashMap<(String, String), Vec<Hash32>>,
}

impl<'a> View<'a> {
    pub fn new(snapshot: &'a Snapshot<'a>, dictionary: &'a Dictionary, shard: ShardId) -> Self {
        Self {
            snapshot, dictionary, shard,
            fields:   HashMap::new(),
            searches: HashMap::new(),
        }
    }

    pub fn shard(&self) -> ShardId { self.shard }

    /// 切换到下一个分片并清空字段缓存
    pub fn reset(&mut self, shard: ShardId) {
        self.shard = shard;
        self.fields.clear();
    }

    /// 取字段的 BSI；分片内不存在的字段返回空 BSI
    pub fn field(&mut self, name: &str) -> Result<&Bsi> {
        if !self.fields.contains_key(name) {
            let bsi = self.load(name)?;
            self.fields.insert(name.to_string(), bsi);
        }
        Ok(&self.fields[name])
    }

    fn load(&self, name: &str) -> Result<Bsi> {
        let shard = self.shard;
        let raw = self.snapshot
            .get(field_key(shard, name))
            .map_err(|e| EngineError::storage("read field", format!("shard={shard} field={name}"), e))?;
        let Some(raw) = raw else { return Ok(Bsi::default()) };
        let bitmap = decode_bitmap(&raw).map_err(|e| EngineError::CorruptBitmap {
            context: format!("shard={shard} field={name}: {e}"),
        })?;
        Ok(Bsi::from_bitmap(&bitmap))
    }

    /// 字段字典中匹配 `re` 的全部 hash
    pub fn search(&mut self, field: &str, re: &Regex) -> Result<Vec<Hash32>> {
        let key = (field.to_string(), re.as_str().to_string());
        if let Some(hit) = self.searches.get(&key) {
            return Ok(hit.clone());
        }
        let hashes = self.dictionary.search(self.snapshot, field, re)?;
        self.searches.insert(key, hashes.clone());
        Ok(hashes)
    }
}
