//! 查询投影与指标计算
//!
//! 分片内 BSI 的位置是片内 fragment，不同分片的同号 fragment 是不同的行，
//! 因此 Projection 按分片保存各字段的局部 BSI：求和逐分片累加，
//! 去重计数（访客、分组键）对各分片转置结果取并集。

use std::collections::{BTreeMap, HashMap};
use rayon::prelude::*;
use roaring::RoaringTreemap;
use crate::bsi::Bsi;
use crate::common::{
    ShardId, FIELD_BOUNCE, FIELD_DURATION, FIELD_EVENT, FIELD_SESSION, FIELD_UID, FIELD_VIEW,
};

#[derive(Debug, Clone, Default)]
pub struct Projection {
    shards:         BTreeMap<ShardId, HashMap<String, Bsi>>,
    shards_scanned: usize,
}

impl Projection {
    pub fn new() -> Self { Self::default() }

    pub(crate) fn set_shards_scanned(&mut self, n: usize) {
        self.shards_scanned = n;
    }

    pub(crate) fn add_shard(&mut self, shard: ShardId, fields: HashMap<String, Bsi>) {
        if fields.is_empty() { return; }
        let slot = self.shards.entry(shard).or_default();
        slot.extend(fields);
    }

    /// 时间剪枝后实际访问的分片数
    pub fn shards_scanned(&self) -> usize { self.shards_scanned }

    /// 有命中行的分片数
    pub fn shard_count(&self) -> usize { self.shards.len() }

    pub fn is_empty(&self) -> bool { self.shards.is_empty() }

    /// 字段在各分片上的局部 BSI
    pub fn field(&self, name: &str) -> impl Iterator<Item = &Bsi> + '_ {
        let name = name.to_string();
        self.shards.values().filter_map(move |fields| fields.get(&name))
    }

    // ── 基础指标 ─────────────────────────────────────────────────────────────

    pub fn sum(&self, name: &str) -> i64 {
        self.field(name).fold(0i64, |acc, bsi| acc.saturating_add(bsi.sum(None)))
    }

    /// 字段的去重值集合（跨分片并集）
    pub fn distinct(&self, name: &str) -> RoaringTreemap {
        let parts: Vec<&Bsi> = self.field(name).collect();
        if parts.len() <= 1 {
            return parts.first().map(|b| b.transpose(None)).unwrap_or_default();
        }
        parts.par_iter()
            .map(|b| b.transpose(None))
            .reduce(RoaringTreemap::new, |a, b| a | b)
    }

    /// 去重访客数：`uid` 的不同取值个数
    pub fn visitors(&self) -> u64 { self.distinct(FIELD_UID).len() }

    pub fn visits(&self)     -> i64 { self.sum(FIELD_SESSION) }
    pub fn page_views(&self) -> i64 { self.sum(FIELD_VIEW) }
    pub fn events(&self)     -> i64 { self.sum(FIELD_EVENT) }
    pub fn duration(&self)   -> i64 { self.sum(FIELD_DURATION) }

    /// 跳出数；负数截断为 0
    pub fn bounce(&self) -> i64 { self.sum(FIELD_BOUNCE).max(0) }

    // ── 派生比率 ─────────────────────────────────────────────────────────────

    pub fn bounce_rate(&self) -> f64 {
        let visits = self.visits();
        if visits == 0 { return 0.0; }
        self.bounce() as f64 / visits as f64
    }

    pub fn views_per_visit(&self) -> f64 {
        let visits = self.visits();
        if visits == 0 { return 0.0; }
        self.page_views() as f64 / visits as f64
    }

    /// 平均访问时长（秒）
    pub fn visit_duration(&self) -> f64 {
        let visits   = self.visits();
        let duration = self.duration();
        if visits == 0 || duration == 0 { return 0.0; }
        (duration as f64 / 1000.0) / visits as f64
    }

    // ── 分组 ─────────────────────────────────────────────────────────────────

    /// 按 `property` 的取值分组；每组是其余字段保留到该取值行集后的子投影
    pub fn group_by(&self, property: &str) -> BTreeMap<i64, Projection> {
        let partials: Vec<(ShardId, Vec<(i64, HashMap<String, Bsi>)>)> = self.shards
            .par_iter()
            .filter_map(|(&shard, fields)| {
                let prop = fields.get(property)?;
                Some((shard, group_shard(property, prop, fields)))
            })
            .collect();

        let mut groups: BTreeMap<i64, Projection> = BTreeMap::new();
        for (shard, entries) in partials {
            for (key, fields) in entries {
                groups.entry(key).or_default().add_shard(shard, fields);
            }
        }
        groups
    }
}

fn group_shard(property: &str, prop: &Bsi, fields: &HashMap<String, Bsi>) -> Vec<(i64, HashMap<String, Bsi>)> {
    let mut out = Vec::new();
    for raw in prop.transpose(None).iter() {
        let key   = raw as i64;
        let found = prop.compare_eq(key, prop.exists());
        let sub: HashMap<String, Bsi> = fields.iter()
            .filter(|(name, _)| name.as_str() != property)
            .map(|(name, bsi)| (name.clone(), bsi.retain(&found)))
            .filter(|(_, bsi)| !bsi.is_empty())
            .collect();
        out.push((key, sub));
    }
    out
}
