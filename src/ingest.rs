//! 单消费者摄入管线
//!
//! 所有写入经有界队列汇入一个后台线程，该线程独占 [`Batch`]；
//! `recv_timeout` 兼作定时器，每个 `flush_interval` 触发一次 flush。
//! 写入失败的事件留在重试槽里按退避重试，不会因一次 flush 失败而丢失。

use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::batch::Index;
use crate::common::{EngineError, Result};
use crate::config::IngestConfig;
use crate::store::Store;

/// 事件字段值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
}

/// 一条待写入的事件
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: i64,
    pub fields:    Vec<(String, Value)>,
}

impl Event {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp, fields: Vec::new() }
    }

    pub fn with_int(mut self, field: &str, v: i64) -> Self {
        self.fields.push((field.into(), Value::Int(v))); self
    }
    pub fn with_str(mut self, field: &str, v: &str) -> Self {
        self.fields.push((field.into(), Value::Str(v.into()))); self
    }
    pub fn with_bool(mut self, field: &str, v: bool) -> Self {
        self.fields.push((field.into(), Value::Bool(v))); self
    }

    pub fn apply(&self, index: &mut dyn Index) {
        for (field, value) in &self.fields {
            match value {
                Value::Int(v)  => index.int64(field, *v),
                Value::Str(v)  => index.string(field, v),
                Value::Bool(v) => index.bool(field, *v),
            }
        }
    }
}

/// 首次重试前的等待；之后每次失败翻倍，上限为 flush 间隔
const RETRY_BACKOFF: Duration = Duration::from_millis(10);
/// 单个事件的最大写入尝试次数
const MAX_ATTEMPTS: u32 = 16;

// ── 失败事件的重试槽 ─────────────────────────────────────────────────────────

/// 写入失败（通常是分片翻转时 flush 失败）的事件暂存在这里；
/// 槽位非空时不再从队列取新事件，保证行序不乱。
struct Pending {
    event:    Option<Event>,
    attempts: u32,
    retry_at: Instant,
}

impl Pending {
    fn new() -> Self {
        Self { event: None, attempts: 0, retry_at: Instant::now() }
    }

    fn is_empty(&self) -> bool { self.event.is_none() }

    fn due(&self, now: Instant) -> bool {
        !self.is_empty() && now >= self.retry_at
    }

    fn park(&mut self, event: Event, error: &EngineError, now: Instant, cap: Duration) {
        self.attempts += 1;
        let wait = backoff(self.attempts, cap);
        warn!(error = %error, attempts = self.attempts, ?wait, "event write failed, will retry");
        self.event    = Some(event);
        self.retry_at = now + wait;
    }

    /// 重试暂存事件；成功或放弃后槽位清空
    fn retry<F>(&mut self, now: Instant, cap: Duration, write: F)
    where
        F: FnOnce(&Event) -> Result<()>,
    {
        let Some(event) = self.event.take() else { return };
        match write(&event) {
            Ok(()) => {
                if self.attempts > 0 {
                    info!(attempts = self.attempts, "event written after retry");
                }
                self.attempts = 0;
            }
            Err(e) if self.attempts + 1 >= MAX_ATTEMPTS => {
                error!(error = %e, attempts = self.attempts + 1, ts = event.timestamp, "giving up on event");
                self.attempts = 0;
            }
            Err(e) => self.park(event, &e, now, cap),
        }
    }
}

fn backoff(attempts: u32, cap: Duration) -> Duration {
    let shift = attempts.saturating_sub(1).min(16);
    RETRY_BACKOFF.saturating_mul(1 << shift).min(cap.max(RETRY_BACKOFF))
}

// ── Ingester ─────────────────────────────────────────────────────────────────

pub struct Ingester {
    tx:     Option<SyncSender<Event>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Ingester {
    pub fn spawn(store: Store, config: IngestConfig) -> Self {
        let (tx, rx) = sync_channel::<Event>(config.queue_capacity);
        let interval = config.flush_interval;

        let handle = thread::spawn(move || {
            info!(capacity = config.queue_capacity, ?interval, "ingester started");
            let mut batch    = store.batch();
            let mut pending  = Pending::new();
            let mut deadline = Instant::now() + interval;
            let mut open     = true;
            while open || !pending.is_empty() {
                let now = Instant::now();
                if pending.due(now) {
                    pending.retry(now, interval, |e| batch.write(e.timestamp, |idx| e.apply(idx)));
                }

                if pending.is_empty() {
                    if !open { break; }
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok(event) => {
                            if let Err(e) = batch.write(event.timestamp, |idx| event.apply(idx)) {
                                pending.park(event, &e, Instant::now(), interval);
                            }
                        }
                        Err(RecvTimeoutError::Timeout)      => {}
                        Err(RecvTimeoutError::Disconnected) => open = false,
                    }
                } else {
                    let wake = pending.retry_at.min(deadline);
                    thread::sleep(wake.saturating_duration_since(Instant::now()));
                }

                if Instant::now() >= deadline {
                    if let Err(e) = batch.flush() {
                        warn!(error = %e, "periodic flush failed, retrying next tick");
                    }
                    deadline = Instant::now() + interval;
                }
            }
            batch.release()
        });

        Self { tx: Some(tx), handle: Some(handle) }
    }

    /// 入队；队列满时阻塞
    pub fn send(&self, event: Event) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(EngineError::Closed)?;
        tx.send(event).map_err(|_| EngineError::Closed)
    }

    /// 关闭队列，等待后台线程排空并 release
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        drop(self.tx.take());
        match self.handle.take() {
            Some(h) => h.join().map_err(|_| EngineError::Closed)?,
            None    => Ok(()),
        }
    }
}

impl Drop for Ingester {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "ingester shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::filter::Filter;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let cap = Duration::from_millis(50);
        assert_eq!(backoff(1, cap), RETRY_BACKOFF);
        assert_eq!(backoff(2, cap), RETRY_BACKOFF * 2);
        assert_eq!(backoff(3, cap), RETRY_BACKOFF * 4);
        assert_eq!(backoff(30, cap), cap);
    }

    #[test]
    fn failed_write_is_retried_until_it_lands() {
        let dir   = tempfile::tempdir().unwrap();
        let store = Store::open(StoreConfig::new(dir.path())).unwrap();
        let mut batch   = store.batch();
        let mut pending = Pending::new();
        let cap = Duration::from_millis(100);

        let event = Event::new(T0).with_str("domain", "a.test").with_int("uid", 9);
        // 第一次写入失败，事件进入重试槽
        let err = EngineError::CorruptValue("injected".into());
        pending.park(event, &err, Instant::now(), cap);
        assert!(!pending.is_empty());
        assert!(!pending.due(Instant::now()));

        // 到期前再失败一次，仍然保留
        let later = pending.retry_at;
        pending.retry(later, cap, |_| Err(EngineError::CorruptValue("again".into())));
        assert_eq!(pending.attempts, 2);
        assert!(pending.retry_at >= later + RETRY_BACKOFF * 2);

        pending.retry(pending.retry_at, cap, |e| batch.write(e.timestamp, |idx| e.apply(idx)));
        assert!(pending.is_empty());
        assert_eq!(pending.attempts, 0);
        batch.flush().unwrap();

        let agg = store.aggregate("a.test", T0, T0 + 1, &Filter::noop(), &["visitors"]).unwrap();
        assert_eq!(agg.visitors, 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut pending = Pending::new();
        let cap = Duration::from_millis(1);
        pending.park(Event::new(T0), &EngineError::Closed, Instant::now(), cap);
        for _ in 1..MAX_ATTEMPTS {
            assert!(!pending.is_empty());
            pending.retry(pending.retry_at, cap, |_| Err(EngineError::Closed));
        }
        assert!(pending.is_empty());
        assert_eq!(pending.attempts, 0);
    }
}
