//! 面向调用方的查询接口：Aggregate / Breakdown / Timeseries / CurrentVisitor

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::Snapshot;
use tracing::debug;

use crate::common::{
    EngineError, Result, FIELD_BOUNCE, FIELD_DATE, FIELD_DURATION, FIELD_EVENT, FIELD_SESSION,
    FIELD_UID, FIELD_VIEW,
};
use crate::filter::Filter;
use crate::projection::Projection;
use crate::store::{CancelToken, Store};

// ── 指标 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Visitors,
    Visits,
    PageViews,
    ViewsPerVisit,
    BounceRate,
    VisitDuration,
    Events,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Self::Visitors      => "visitors",
            Self::Visits        => "visits",
            Self::PageViews     => "pageviews",
            Self::ViewsPerVisit => "views_per_visit",
            Self::BounceRate    => "bounce_rate",
            Self::VisitDuration => "visit_duration",
            Self::Events        => "events",
        }
    }

    /// 计算该指标需要投影的字段
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Visitors      => &[FIELD_UID],
            Self::Visits        => &[FIELD_SESSION],
            Self::PageViews     => &[FIELD_VIEW],
            Self::ViewsPerVisit => &[FIELD_VIEW, FIELD_SESSION],
            Self::BounceRate    => &[FIELD_BOUNCE, FIELD_SESSION],
            Self::VisitDuration => &[FIELD_DURATION, FIELD_SESSION],
            Self::Events        => &[FIELD_EVENT],
        }
    }

    /// 解析指标名列表；未知名称报错
    pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<Metric>> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl FromStr for Metric {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "visitors"        => Self::Visitors,
            "visits"          => Self::Visits,
            "pageviews"       => Self::PageViews,
            "views_per_visit" => Self::ViewsPerVisit,
            "bounce_rate"     => Self::BounceRate,
            "visit_duration"  => Self::VisitDuration,
            "events"          => Self::Events,
            other             => return Err(EngineError::UnknownMetric(other.into())),
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn projected_fields(metrics: &[Metric], extra: Option<&'static str>) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    for f in metrics.iter().flat_map(|m| m.fields()).copied().chain(extra) {
        if !out.contains(&f) { out.push(f); }
    }
    out
}

// ── 结果类型 ──────────────────────────────────────────────────────────────────

/// 一组指标值；未请求的指标保持为 0
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub visitors:        u64,
    pub visits:          i64,
    pub page_views:      i64,
    pub views_per_visit: f64,
    pub bounce_rate:     f64,
    pub visit_duration:  f64,
    pub events:          i64,
}

impl Aggregate {
    pub fn compute(projection: &Projection, metrics: &[Metric]) -> Self {
        let mut out = Self::default();
        for m in metrics {
            match m {
                Metric::Visitors      => out.visitors        = projection.visitors(),
                Metric::Visits        => out.visits          = projection.visits(),
                Metric::PageViews     => out.page_views      = projection.page_views(),
                Metric::ViewsPerVisit => out.views_per_visit = projection.views_per_visit(),
                Metric::BounceRate    => out.bounce_rate     = projection.bounce_rate(),
                Metric::VisitDuration => out.visit_duration  = projection.visit_duration(),
                Metric::Events        => out.events          = projection.events(),
            }
        }
        out
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Visitors      => self.visitors as f64,
            Metric::Visits        => self.visits as f64,
            Metric::PageViews     => self.page_views as f64,
            Metric::ViewsPerVisit => self.views_per_visit,
            Metric::BounceRate    => self.bounce_rate,
            Metric::VisitDuration => self.visit_duration,
            Metric::Events        => self.events as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakdownGroup {
    pub key:       String,
    pub aggregate: Aggregate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Breakdown {
    pub property: String,
    /// 按首个请求指标降序，相同时按 key 升序
    pub groups:   Vec<BreakdownGroup>,
}

impl Breakdown {
    pub fn group(&self, key: &str) -> Option<&Aggregate> {
        self.groups.iter().find(|g| g.key == key).map(|g| &g.aggregate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesPoint {
    /// UTC 当日零点（毫秒）
    pub date:      i64,
    pub aggregate: Aggregate,
}

impl TimeseriesPoint {
    pub fn day(&self) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp_millis(self.date).map(|dt| dt.date_naive())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeseries {
    /// 按日期升序
    pub points: Vec<TimeseriesPoint>,
}

// ── Store 查询接口 ───────────────────────────────────────────────────────────

impl Store {
    pub fn aggregate<S: AsRef<str>>(
        &self,
        domain:  &str,
        start:   i64,
        end:     i64,
        filter:  &Filter,
        metrics: &[S],
    ) -> Result<Aggregate> {
        let metrics = Metric::parse_all(metrics)?;
        let fields  = projected_fields(&metrics, None);
        let projection = self.select(start, end, domain, filter, &fields)?;
        Ok(Aggregate::compute(&projection, &metrics))
    }

    pub fn breakdown<S: AsRef<str>>(
        &self,
        domain:   &str,
        start:    i64,
        end:      i64,
        filter:   &Filter,
        metrics:  &[S],
        property: &str,
    ) -> Result<Breakdown> {
        let metrics = Metric::parse_all(metrics)?;
        let mut fields: Vec<&str> = projected_fields(&metrics, None);
        if !fields.contains(&property) { fields.push(property); }

        // 分组标签与投影读自同一快照
        let snapshot   = self.snapshot();
        let projection = self.select_in(&snapshot, start, end, domain, filter, &fields, &CancelToken::new())?;
        let mut groups = Vec::new();
        for (key, sub) in projection.group_by(property) {
            groups.push(BreakdownGroup {
                key:       self.group_label(&snapshot, property, key)?,
                aggregate: Aggregate::compute(&sub, &metrics),
            });
        }

        if let Some(&first) = metrics.first() {
            groups.sort_by(|a, b| {
                b.aggregate.get(first)
                    .total_cmp(&a.aggregate.get(first))
                    .then_with(|| a.key.cmp(&b.key))
            });
        }
        debug!(property, groups = groups.len(), "breakdown");
        Ok(Breakdown { property: property.into(), groups })
    }

    /// 字符串属性反查字典；查不到则按整数展示
    fn group_label(&self, snapshot: &Snapshot<'_>, property: &str, key: i64) -> Result<String> {
        if let Ok(hash) = u32::try_from(key) {
            if let Some(text) = self.dictionary().translate(snapshot, property, hash)? {
                return Ok(text);
            }
        }
        Ok(key.to_string())
    }

    pub fn timeseries<S: AsRef<str>>(
        &self,
        domain:  &str,
        start:   i64,
        end:     i64,
        filter:  &Filter,
        metrics: &[S],
    ) -> Result<Timeseries> {
        let metrics = Metric::parse_all(metrics)?;
        let fields  = projected_fields(&metrics, Some(FIELD_DATE));
        let projection = self.select(start, end, domain, filter, &fields)?;
        let points = projection.group_by(FIELD_DATE)
            .into_iter()
            .map(|(date, sub)| TimeseriesPoint { date, aggregate: Aggregate::compute(&sub, &metrics) })
            .collect();
        Ok(Timeseries { points })
    }

    /// 最近 `window` 内的去重访客数
    pub fn current_visitor(&self, domain: &str, window: Duration) -> Result<u64> {
        self.current_visitor_at(domain, Utc::now().timestamp_millis(), window)
    }

    /// 以 `now`（毫秒）为终点的 [now - window, now] 内去重访客数
    pub fn current_visitor_at(&self, domain: &str, now: i64, window: Duration) -> Result<u64> {
        let window = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let start  = now.saturating_sub(window);
        let projection = self.select(start, now.saturating_add(1), domain, &Filter::noop(), &[FIELD_UID])?;
        Ok(projection.visitors())
    }
}
