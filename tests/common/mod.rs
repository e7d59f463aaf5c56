#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;

use bsi_storage_engine::{Index, Store, StoreConfig};
use tracing_subscriber::EnvFilter;

pub const T0: i64 = 1_700_000_000_000;
pub const SECOND: i64 = 1_000;

/// 初始化一次 tracing；遵循 RUST_LOG，默认 warn
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

pub fn open_store(dir: &Path) -> Store {
    init_test_logging();
    Store::open(StoreConfig::new(dir)).expect("open store")
}

/// `domain` 上的一次页面浏览
pub fn page_view(idx: &mut dyn Index, domain: &str, uid: i64) {
    idx.string("domain", domain);
    idx.int64("uid", uid);
    idx.bool("view", true);
}
