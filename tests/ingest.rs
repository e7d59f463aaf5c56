mod common;

use std::time::Duration;

use anyhow::Result;
use bsi_storage_engine::{Event, Filter, IngestConfig, Ingester};
use common::{open_store, SECOND, T0};

fn visit(ts: i64, uid: i64, path: &str) -> Event {
    Event::new(ts)
        .with_str("domain", "shop.test")
        .with_int("uid", uid)
        .with_int("session", 1)
        .with_bool("view", true)
        .with_str("path", path)
}

#[test]
fn shutdown_drains_the_queue() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(dir.path());
    let ingester = Ingester::spawn(store.clone(), IngestConfig::default().with_queue_capacity(8));
    for uid in 0..50 {
        ingester.send(visit(T0 + uid * SECOND, uid % 20, if uid % 2 == 0 { "/" } else { "/cart" }))?;
    }
    ingester.shutdown()?;

    assert_eq!(store.row_count(), 50);
    let agg = store.aggregate("shop.test", T0, T0 + 100 * SECOND, &Filter::noop(), &["visitors", "visits", "pageviews"])?;
    assert_eq!(agg.visitors, 20);
    assert_eq!(agg.visits, 50);
    assert_eq!(agg.page_views, 50);

    let by_path = store.breakdown("shop.test", T0, T0 + 100 * SECOND, &Filter::noop(), &["pageviews"], "path")?;
    assert_eq!(by_path.group("/").map(|a| a.page_views), Some(25));
    assert_eq!(by_path.group("/cart").map(|a| a.page_views), Some(25));
    Ok(())
}

#[test]
fn periodic_flush_makes_rows_visible() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(dir.path());
    let config = IngestConfig::default().with_flush_interval(Duration::from_millis(20));
    let ingester = Ingester::spawn(store.clone(), config);
    ingester.send(visit(T0, 1, "/"))?;

    let mut visitors = 0;
    for _ in 0..100 {
        visitors = store.aggregate("shop.test", T0, T0 + SECOND, &Filter::noop(), &["visitors"])?.visitors;
        if visitors == 1 { break; }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(visitors, 1);
    ingester.shutdown()?;
    Ok(())
}

#[test]
fn events_apply_through_the_index() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(dir.path());
    let mut batch = store.batch();
    let event = Event::new(T0)
        .with_str("domain", "shop.test")
        .with_int("uid", 3)
        .with_bool("event", true)
        .with_bool("bounce", false);
    batch.write(event.timestamp, |idx| event.apply(idx))?;
    batch.flush()?;

    let agg = store.aggregate("shop.test", T0, T0 + 1, &Filter::noop(), &["visitors", "events"])?;
    assert_eq!(agg.visitors, 1);
    assert_eq!(agg.events, 1);
    Ok(())
}

#[test]
fn dropping_the_ingester_releases_the_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(dir.path());
    {
        let ingester = Ingester::spawn(store.clone(), IngestConfig::default());
        ingester.send(visit(T0, 7, "/"))?;
        ingester.send(visit(T0 + SECOND, 8, "/"))?;
    }
    let agg = store.aggregate("shop.test", T0, T0 + 2 * SECOND, &Filter::noop(), &["visitors"])?;
    assert_eq!(agg.visitors, 2);
    Ok(())
}
