//! 过滤代数
//!
//! 过滤器在一个分片的 [`View`] 上把 found-set 进一步收窄：
//! - **EQ / NEQ** — 与 `hash(field=value)` 等值比较；NEQ 为 found-set 内补集
//! - **RE / NRE** — 在字段字典中找出匹配的字符串，取其 hash 的等值并集；NRE 为补集
//! - **Noop / Reject** — 原样通过 / 全部拒绝
//! - **All** — 依次应用，found-set 为空时提前结束

use regex::Regex;
use roaring::RoaringBitmap;
use crate::common::Result;
use crate::dictionary;
use crate::view::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Re,
    Nre,
}

#[derive(Debug, Clone)]
enum Matcher {
    Value(u32),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct TextFilter {
    pub field: String,
    pub op:    Op,
    pub value: String,
    matcher:   Matcher,
}

#[derive(Debug, Clone)]
pub enum Filter {
    Noop,
    Reject,
    Text(TextFilter),
    All(Vec<Filter>),
}

impl Filter {
    pub fn noop()   -> Self { Self::Noop }
    pub fn reject() -> Self { Self::Reject }

    pub fn new_eq(field: &str, value: &str) -> Self {
        Self::text(field, Op::Eq, value, Matcher::Value(dictionary::hash(field, value)))
    }

    pub fn new_neq(field: &str, value: &str) -> Self {
        Self::text(field, Op::Neq, value, Matcher::Value(dictionary::hash(field, value)))
    }

    /// 正则编译失败返回错误，而不是当作“不匹配”
    pub fn new_re(field: &str, pattern: &str) -> Result<Self> {
        Ok(Self::text(field, Op::Re, pattern, Matcher::Pattern(Regex::new(pattern)?)))
    }

    pub fn new_nre(field: &str, pattern: &str) -> Result<Self> {
        Ok(Self::text(field, Op::Nre, pattern, Matcher::Pattern(Regex::new(pattern)?)))
    }

    pub fn all(filters: Vec<Filter>) -> Self {
        Self::All(filters)
    }

    fn text(field: &str, op: Op, value: &str, matcher: Matcher) -> Self {
        Self::Text(TextFilter { field: field.into(), op, value: value.into(), matcher })
    }

    /// 返回 `found` 中满足本过滤器的行
    pub fn apply(&self, view: &mut View<'_>, found: &RoaringBitmap) -> Result<RoaringBitmap> {
        match self {
            Self::Noop   => Ok(found.clone()),
            Self::Reject => Ok(RoaringBitmap::new()),
            Self::Text(f) => f.apply(view, found),
            Self::All(filters) => {
                let mut acc = found.clone();
                for f in filters {
                    if acc.is_empty() { break; }
                    acc = f.apply(view, &acc)?;
                }
                Ok(acc)
            }
        }
    }
}

impl TextFilter {
    fn apply(&self, view: &mut View<'_>, found: &RoaringBitmap) -> Result<RoaringBitmap> {
        let matched = match &self.matcher {
            Matcher::Value(hash) => view.field(&self.field)?.compare_eq(*hash as i64, found),
            Matcher::Pattern(re) => {
                let hashes = view.search(&self.field, re)?;
                let bsi = view.field(&self.field)?;
                let mut acc = RoaringBitmap::new();
                for hash in hashes {
                    acc |= bsi.compare_eq(hash as i64, found);
                }
                acc
            }
        };
        Ok(match self.op {
            Op::Eq | Op::Re   => matched,
            Op::Neq | Op::Nre => found - matched,
        })
    }
}
