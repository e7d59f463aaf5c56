//! 存储与摄入配置

use std::path::{Path, PathBuf};
use std::time::Duration;

/// 当前在线访客的默认统计窗口
pub const CURRENT_VISITOR_WINDOW: Duration = Duration::from_secs(5 * 60);

/// `Store::open` 的参数
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path:                  PathBuf,
    /// 字典反查缓存（hash → 字符串）的最大条目数
    pub dictionary_cache_size: usize,
    /// 查询时是否用 rayon 并行扫描分片
    pub parallel_select:       bool,
    pub create_if_missing:     bool,
    pub write_buffer_size:     usize,
}

impl StoreConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path:                  path.as_ref().to_path_buf(),
            dictionary_cache_size: 16 * 1024,
            parallel_select:       true,
            create_if_missing:     true,
            write_buffer_size:     64 << 20,
        }
    }

    pub fn with_dictionary_cache_size(mut self, n: usize) -> Self {
        self.dictionary_cache_size = n.max(1); self
    }
    pub fn with_parallel_select(mut self, on: bool) -> Self {
        self.parallel_select = on; self
    }
    pub fn with_create_if_missing(mut self, on: bool) -> Self {
        self.create_if_missing = on; self
    }
    pub fn with_write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes; self
    }
}

/// 摄入管线参数
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// 有界队列容量；队列满时 `send` 阻塞
    pub queue_capacity: usize,
    /// 周期性 flush 间隔
    pub flush_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { queue_capacity: 4096, flush_interval: Duration::from_secs(1) }
    }
}

impl IngestConfig {
    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n.max(1); self
    }
    pub fn with_flush_interval(mut self, d: Duration) -> Self {
        self.flush_interval = d; self
    }
}
