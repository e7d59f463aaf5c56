//! # bsi-storage-engine 完整使用案例
//!
//! 演示引擎的全部核心功能：
//!
//! 1. 打开 Store（RocksDB + 位图 merge operator）
//! 2. 通过 Batch 直接写入访问事件
//! 3. 通过 Ingester 后台管线写入
//! 4. Aggregate 聚合指标
//! 5. Breakdown 按属性分组
//! 6. Timeseries 按天序列
//! 7. Filter 组合过滤
//! 8. 在线访客与分片时间范围

use std::time::Duration;

use bsi_storage_engine::{
    Event, Filter, IngestConfig, Ingester, Store, StoreConfig, CURRENT_VISITOR_WINDOW,
};

const DAY: i64 = 86_400_000;
const T0: i64 = 1_700_000_000_000;

fn main() -> bsi_storage_engine::Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   bsi-storage-engine 演示                                 ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 打开 Store
    // =========================================================================
    let path = std::env::temp_dir().join("bsi-demo");
    println!("【1】打开 Store: {} ...", path.display());
    let store = Store::open(StoreConfig::new(&path).with_dictionary_cache_size(1024))?;
    println!("    已有行数 = {}\n", store.row_count());

    // =========================================================================
    // 2. Batch 直接写入
    // =========================================================================
    println!("【2】Batch 写入 3 天的访问 ...");
    let mut batch = store.batch();
    let countries = ["US", "FR", "DE"];
    for day in 0..3 {
        for uid in 0..20i64 {
            let ts = T0 + day * DAY + uid * 1000;
            batch.write(ts, |idx| {
                idx.string("domain", "shop.test");
                idx.int64("uid", uid + day * 5);
                idx.bool("session", true);
                idx.bool("view", true);
                idx.bool("bounce", uid % 4 == 0);
                idx.int64("duration", 30_000 + uid * 1000);
                idx.string("country", countries[(uid % 3) as usize]);
                idx.string("browser", if uid % 2 == 0 { "Chrome" } else { "Firefox" });
            })?;
        }
    }
    batch.release()?;
    println!("    ✓ 当前分片 = {:?}  总行数 = {}\n", batch.shard(), store.row_count());

    // =========================================================================
    // 3. Ingester 管线
    // =========================================================================
    println!("【3】Ingester 后台写入 ...");
    let ingester = Ingester::spawn(
        store.clone(),
        IngestConfig::default().with_flush_interval(Duration::from_millis(200)),
    );
    for uid in 100..110 {
        ingester.send(
            Event::new(T0 + 2 * DAY + uid)
                .with_str("domain", "shop.test")
                .with_int("uid", uid)
                .with_bool("view", true)
                .with_bool("event", true)
                .with_str("country", "JP"),
        )?;
    }
    ingester.shutdown()?;
    println!("    ✓ 总行数 = {}\n", store.row_count());

    let (start, end) = (T0, T0 + 3 * DAY);
    let metrics = ["visitors", "visits", "pageviews", "bounce_rate", "visit_duration", "events"];

    // =========================================================================
    // 4. Aggregate
    // =========================================================================
    println!("【4】Aggregate ...");
    let agg = store.aggregate("shop.test", start, end, &Filter::noop(), &metrics)?;
    println!("    visitors       = {}", agg.visitors);
    println!("    visits         = {}", agg.visits);
    println!("    pageviews      = {}", agg.page_views);
    println!("    bounce_rate    = {:.3}", agg.bounce_rate);
    println!("    visit_duration = {:.1}s", agg.visit_duration);
    println!("    events         = {}\n", agg.events);

    // =========================================================================
    // 5. Breakdown
    // =========================================================================
    println!("【5】Breakdown by country ...");
    let by_country = store.breakdown("shop.test", start, end, &Filter::noop(), &["visitors", "pageviews"], "country")?;
    for g in &by_country.groups {
        println!("    {:<4} visitors={:<3} pageviews={}", g.key, g.aggregate.visitors, g.aggregate.page_views);
    }
    println!();

    // =========================================================================
    // 6. Timeseries
    // =========================================================================
    println!("【6】Timeseries ...");
    let series = store.timeseries("shop.test", start, end, &Filter::noop(), &["visitors"])?;
    for p in &series.points {
        let day = p.day().map(|d| d.to_string()).unwrap_or_else(|| p.date.to_string());
        println!("    {day}  visitors={}", p.aggregate.visitors);
    }
    println!();

    // =========================================================================
    // 7. Filter
    // =========================================================================
    println!("【7】Filter: browser = Chrome 且 country !~ ^(US|FR)$ ...");
    let filter = Filter::all(vec![
        Filter::new_eq("browser", "Chrome"),
        Filter::new_nre("country", "^(US|FR)$")?,
    ]);
    let agg = store.aggregate("shop.test", start, end, &filter, &["visitors", "pageviews"])?;
    println!("    visitors = {}  pageviews = {}\n", agg.visitors, agg.page_views);

    // =========================================================================
    // 8. 在线访客与时间范围
    // =========================================================================
    println!("【8】在线访客 & 分片时间范围 ...");
    let now = T0 + 2 * DAY + 200;
    let online = store.current_visitor_at("shop.test", now, CURRENT_VISITOR_WINDOW)?;
    println!("    {}s 窗口内访客 = {online}", CURRENT_VISITOR_WINDOW.as_secs());
    if let Some(range) = store.shard_time_range(0)? {
        println!("    shard 0: [{}, {}]", range.min, range.max);
    }
    store.compact();
    println!("    ✓ compaction 完成");

    println!("\n═══════════════════════════════════════════════════════════");
    println!("   演示完成");
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
