//! # bsi-storage-engine
//!
//! Web 统计分析的嵌入式存储/查询引擎：每条访问事件以位切片索引（BSI）
//! 的形式写入 RocksDB，聚合、分组、时间序列、在线访客查询全部直接在
//! 压缩位图上完成，不物化行。
//!
//! ## 整体架构
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Store                              │
//! │   RocksDB ── merge operator (bitmap union)                    │
//! │   sequence (AtomicU64)      Dictionary (LRU hash → string)    │
//! │                                                               │
//! │  写入端                              读取端                    │
//! │  Ingester ──▶ Batch.write            Store.select             │
//! │   (有界队列 +   │ encode_int           │ snapshot             │
//! │    flush 定时)  │ 分片翻转 flush       │ 时间范围剪枝          │
//! │                 ▼                      ▼                      │
//! │        WriteBatch { merge 位图,      View (每分片 BSI 缓存)    │
//! │          put 时间范围/字典/序号 }      │ domain = hash        │
//! │                                        │ timestamp ∈ [s, e)   │
//! │                                        │ Filter.apply         │
//! │                                        ▼                      │
//! │                               Projection (按分片的局部 BSI)    │
//! │                                 ├─ Aggregate                  │
//! │                                 ├─ Breakdown  (group_by)      │
//! │                                 ├─ Timeseries (group_by date) │
//! │                                 └─ CurrentVisitor             │
//! └───────────────────────────────────────────────────────────────┘
//! ```

// ── 基础 ─────────────────────────────────────────────────────────────────────
pub mod common;
pub mod config;
pub mod shard;

// ── 编码与存储 ───────────────────────────────────────────────────────────────
pub mod bsi;
pub mod merge;
pub mod dictionary;
pub mod store;
pub mod batch;
pub mod ingest;

// ── 查询 ─────────────────────────────────────────────────────────────────────
pub mod view;
pub mod filter;
pub mod projection;
pub mod query;

pub use batch::{Batch, Index};
pub use common::{EngineError, Result, SHARD_WIDTH};
pub use config::{IngestConfig, StoreConfig, CURRENT_VISITOR_WINDOW};
pub use filter::Filter;
pub use ingest::{Event, Ingester};
pub use projection::Projection;
pub use query::{Aggregate, Breakdown, BreakdownGroup, Metric, Timeseries, TimeseriesPoint};
pub use store::{CancelToken, Store};
