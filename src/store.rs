//! 顶层存储句柄：RocksDB 实例、merge operator 注册、行序号与字典缓存
//!
//! 写入端通过 [`Store::batch`] 取得唯一的 [`Batch`]；读取端 [`Store::select`]
//! 每次打开独立快照，可被任意多个线程并发调用。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use roaring::RoaringBitmap;
use rocksdb::{DBCompressionType, Direction, IteratorMode, Options, Snapshot, WriteBatch, DB};
use tracing::{debug, info, instrument};

use crate::batch::Batch;
use crate::bsi::Bsi;
use crate::common::{EngineError, Result, ShardId, FIELD_DOMAIN, FIELD_TIMESTAMP};
use crate::config::StoreConfig;
use crate::dictionary::{self, Dictionary};
use crate::filter::Filter;
use crate::merge::{bitmap_full_merge, BITMAP_MERGE_OPERATOR_NAME};
use crate::projection::Projection;
use crate::shard::{
    decode_i64, decode_u64, parse_shard, sequence_key, time_max_key, time_min_key,
    TimeRange, PREFIX_TIME_MAX, PREFIX_TIME_MIN,
};
use crate::view::View;

// ── 取消令牌 ──────────────────────────────────────────────────────────────────

/// 查询取消标志；在分片之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::Relaxed); }

    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() { Err(EngineError::Cancelled) } else { Ok(()) }
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

struct StoreInner {
    db:         DB,
    config:     StoreConfig,
    dictionary: Dictionary,
    /// 下一个待分配的行号
    sequence:   AtomicU64,
}

/// 可廉价克隆的引擎句柄
#[derive(Clone)]
pub struct Store(Arc<StoreInner>);

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_merge_operator_associative(BITMAP_MERGE_OPERATOR_NAME, bitmap_full_merge);

        let db = DB::open(&opts, &config.path)
            .map_err(|e| EngineError::storage("open", config.path.display().to_string(), e))?;

        let sequence = match db.get(sequence_key()).map_err(|e| EngineError::storage("open", "sequence", e))? {
            Some(raw) => decode_u64(&raw)?,
            None      => 0,
        };
        info!(path = %config.path.display(), sequence, "store opened");

        let dictionary = Dictionary::new(config.dictionary_cache_size);
        Ok(Self(Arc::new(StoreInner {
            db, config, dictionary,
            sequence: AtomicU64::new(sequence),
        })))
    }

    pub fn config(&self) -> &StoreConfig { &self.0.config }

    pub fn dictionary(&self) -> &Dictionary { &self.0.dictionary }

    pub(crate) fn sequence(&self) -> &AtomicU64 { &self.0.sequence }

    /// 已分配出去的行数
    pub fn row_count(&self) -> u64 { self.0.sequence.load(Ordering::Acquire) }

    /// 创建写入器。调用方保证同一时刻只有一个 Batch 在写
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// 手动触发全量 compaction（merge operand 会在此时被折叠）
    pub fn compact(&self) {
        self.0.db.compact_range::<&[u8], &[u8]>(None, None);
    }

    /// 当前时刻的一致性快照
    pub(crate) fn snapshot(&self) -> Snapshot<'_> {
        self.0.db.snapshot()
    }

    /// 用最新快照反查字典
    pub fn translate(&self, field: &str, hash: u32) -> Result<Option<String>> {
        let snapshot = self.0.db.snapshot();
        self.0.dictionary.translate(&snapshot, field, hash)
    }

    // ── 时间范围索引 ─────────────────────────────────────────────────────────

    /// 读取单个分片的持久化时间范围
    pub fn shard_time_range(&self, shard: ShardId) -> Result<Option<TimeRange>> {
        let db  = &self.0.db;
        let ctx = || format!("shard={shard}");
        let min = db.get(time_min_key(shard)).map_err(|e| EngineError::storage("time range", ctx(), e))?;
        let max = db.get(time_max_key(shard)).map_err(|e| EngineError::storage("time range", ctx(), e))?;
        match (min, max) {
            (Some(min), Some(max)) => Ok(Some(TimeRange::new(decode_i64(&min)?, decode_i64(&max)?))),
            _ => Ok(None),
        }
    }

    /// 扫描快照内所有分片的 [min, max]
    pub(crate) fn time_ranges(snapshot: &Snapshot<'_>) -> Result<BTreeMap<ShardId, TimeRange>> {
        let mut ranges: BTreeMap<ShardId, TimeRange> = BTreeMap::new();
        for prefix in [PREFIX_TIME_MIN, PREFIX_TIME_MAX] {
            let start = [prefix];
            for item in snapshot.iterator(IteratorMode::From(&start[..], Direction::Forward)) {
                let (key, value) = item.map_err(|e| EngineError::storage("time range scan", "", e))?;
                if key.first() != Some(&prefix) { break; }
                let Some(shard) = parse_shard(&key) else { continue };
                let ts = decode_i64(&value)?;
                let range = ranges.entry(shard).or_default();
                if prefix == PREFIX_TIME_MIN { range.min = ts; } else { range.max = ts; }
            }
        }
        Ok(ranges)
    }

    // ── Select ───────────────────────────────────────────────────────────────

    /// 扫描 [start, end) 内属于 `domain` 且通过 `filter` 的行，投影 `fields`
    pub fn select(
        &self,
        start:  i64,
        end:    i64,
        domain: &str,
        filter: &Filter,
        fields: &[&str],
    ) -> Result<Projection> {
        self.select_with(start, end, domain, filter, fields, &CancelToken::new())
    }

    #[instrument(level = "debug", skip_all, fields(domain = domain, start = start, end = end))]
    pub fn select_with(
        &self,
        start:  i64,
        end:    i64,
        domain: &str,
        filter: &Filter,
        fields: &[&str],
        cancel: &CancelToken,
    ) -> Result<Projection> {
        let snapshot = self.0.db.snapshot();
        self.select_in(&snapshot, start, end, domain, filter, fields, cancel)
    }

    /// 在调用方给定的快照上执行 select，便于后续字典反查读到同一时刻
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn select_in(
        &self,
        snapshot: &Snapshot<'_>,
        start:    i64,
        end:      i64,
        domain:   &str,
        filter:   &Filter,
        fields:   &[&str],
        cancel:   &CancelToken,
    ) -> Result<Projection> {
        let shards: Vec<ShardId> = Self::time_ranges(snapshot)?
            .into_iter()
            .filter(|(_, r)| r.overlaps(start, end))
            .map(|(shard, _)| shard)
            .collect();

        let mut projection = Projection::new();
        if shards.is_empty() {
            debug!("no shard overlaps the query range");
            return Ok(projection);
        }

        let scan = ShardScan {
            domain: dictionary::hash(FIELD_DOMAIN, domain) as i64,
            start, end, filter, fields,
        };
        let dict = &self.0.dictionary;

        let partials: Vec<Option<(ShardId, HashMap<String, Bsi>)>> =
            if self.0.config.parallel_select && shards.len() > 1 {
                shards.par_iter()
                    .map(|&shard| {
                        cancel.check()?;
                        let mut view = View::new(snapshot, dict, shard);
                        scan.run(&mut view)
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                let mut view = View::new(snapshot, dict, shards[0]);
                let mut out = Vec::with_capacity(shards.len());
                for &shard in &shards {
                    cancel.check()?;
                    view.reset(shard);
                    out.push(scan.run(&mut view)?);
                }
                out
            };

        projection.set_shards_scanned(shards.len());
        for (shard, fields) in partials.into_iter().flatten() {
            projection.add_shard(shard, fields);
        }
        debug!(shards = shards.len(), matched = projection.shard_count(), "select done");
        Ok(projection)
    }
}

/// 单个分片上的 select 步骤
struct ShardScan<'q> {
    domain: i64,
    start:  i64,
    end:    i64,
    filter: &'q Filter,
    fields: &'q [&'q str],
}

impl ShardScan<'_> {
    fn run(&self, view: &mut View<'_>) -> Result<Option<(ShardId, HashMap<String, Bsi>)>> {
        // 1. domain
        let domain = view.field(FIELD_DOMAIN)?;
        let found  = domain.compare_eq(self.domain, domain.exists());
        if found.is_empty() { return Ok(None); }

        // 2. 时间区间
        let found = view.field(FIELD_TIMESTAMP)?.compare_range(self.start, self.end, &found);
        if found.is_empty() { return Ok(None); }

        // 3. 调用方过滤
        let found: RoaringBitmap = self.filter.apply(view, &found)?;
        if found.is_empty() { return Ok(None); }

        // 4. 投影
        let mut out = HashMap::with_capacity(self.fields.len());
        for &name in self.fields {
            let bsi = view.field(name)?.retain(&found);
            if !bsi.is_empty() {
                out.insert(name.to_string(), bsi);
            }
        }
        Ok(Some((view.shard(), out)))
    }
}

// Batch 写入时使用的底层原语
impl Store {
    pub(crate) fn write(&self, batch: WriteBatch, context: impl Into<String>) -> Result<()> {
        self.0.db.write(batch).map_err(|e| EngineError::storage("flush", context, e))
    }
}
