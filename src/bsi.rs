//! 位切片索引（BSI）编解码
//!
//! 一个字段在一个分片内存储为单个 roaring 位图，位置编码为
//! `plane * SHARD_WIDTH + fragment`：
//!
//! ```text
//! plane 0        存在位（该行有值）
//! plane 1        符号位（值为负）
//! plane 2..=65   幅值第 0..=63 位
//! ```
//!
//! 读取时按最大位置推导深度（`max / SHARD_WIDTH`），不需要 schema。
//! 比较运算采用逐位平面的 O'Neil 算法，全程在位图上完成，不解码行值。

use roaring::{RoaringBitmap, RoaringTreemap};
use crate::common::{RowId, EXISTS_PLANE, OFFSET_PLANE, SHARD_WIDTH, SIGN_PLANE};
use crate::shard::fragment_of;

const WIDTH: u32 = SHARD_WIDTH as u32;

// ── 写入端 ───────────────────────────────────────────────────────────────────

/// 把 `value` 编码进字段位图 `bitmap`（行 `id`）
pub fn encode_int(bitmap: &mut RoaringBitmap, id: RowId, value: i64) {
    let fragment = fragment_of(id);
    bitmap.insert(EXISTS_PLANE * WIDTH + fragment);
    if value < 0 {
        bitmap.insert(SIGN_PLANE * WIDTH + fragment);
    }
    let mut magnitude = value.unsigned_abs();
    while magnitude != 0 {
        let bit = magnitude.trailing_zeros();
        bitmap.insert((OFFSET_PLANE + bit) * WIDTH + fragment);
        magnitude &= magnitude - 1;
    }
}

/// 解码位图中落在 `found` 内的 (fragment, value) 对，按 fragment 升序
pub fn decode_int(bitmap: &RoaringBitmap, found: &RoaringBitmap) -> Vec<(u32, i64)> {
    Bsi::from_bitmap(bitmap).values(Some(found))
}

// ── Bsi ──────────────────────────────────────────────────────────────────────

/// 一个分片内某字段的解码形态：各位平面拆成独立位图，位置为片内 fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bsi {
    exists: RoaringBitmap,
    sign:   RoaringBitmap,
    /// planes[i] = 幅值第 i 位
    planes: Vec<RoaringBitmap>,
}

impl Bsi {
    pub fn from_bitmap(bitmap: &RoaringBitmap) -> Self {
        let Some(max) = bitmap.max() else { return Self::default() };
        let depth = (max / WIDTH) as usize;

        let mut all: Vec<RoaringBitmap> = (0..=depth).map(|_| RoaringBitmap::new()).collect();
        // 位图有序遍历，每个平面内 fragment 也严格递增，可以直接 push
        for pos in bitmap.iter() {
            all[(pos / WIDTH) as usize].push(pos % WIDTH);
        }

        let mut it = all.into_iter();
        let exists = it.next().unwrap_or_default();
        let sign   = it.next().unwrap_or_default();
        let planes = it.collect();
        Self { exists, sign, planes }
    }

    pub fn exists(&self) -> &RoaringBitmap { &self.exists }
    pub fn depth(&self)  -> usize { self.planes.len() }
    pub fn is_empty(&self) -> bool { self.exists.is_empty() }
    pub fn len(&self) -> u64 { self.exists.len() }

    fn rows(&self, found: Option<&RoaringBitmap>) -> RoaringBitmap {
        match found {
            Some(f) => &self.exists & f,
            None    => self.exists.clone(),
        }
    }

    /// 单行取值
    pub fn value(&self, col: u32) -> Option<i64> {
        if !self.exists.contains(col) { return None; }
        let mut mag = 0u64;
        for (i, plane) in self.planes.iter().enumerate() {
            if plane.contains(col) { mag |= 1 << i; }
        }
        Some(apply_sign(mag, self.sign.contains(col)))
    }

    /// 解码 `found` 内所有行
    pub fn values(&self, found: Option<&RoaringBitmap>) -> Vec<(u32, i64)> {
        let rows = self.rows(found);
        let mut mags = vec![0u64; rows.len() as usize];
        for (i, plane) in self.planes.iter().enumerate() {
            for col in (plane & &rows).iter() {
                // rank 从 1 开始计数
                mags[(rows.rank(col) - 1) as usize] |= 1 << i;
            }
        }
        rows.iter()
            .zip(mags)
            .map(|(col, mag)| (col, apply_sign(mag, self.sign.contains(col))))
            .collect()
    }

    // ── 比较 ─────────────────────────────────────────────────────────────────

    /// 无符号幅值比较：返回 candidates 中 (幅值 > c, 幅值 == c) 的行
    fn compare_magnitude(&self, candidates: &RoaringBitmap, c: u64) -> (RoaringBitmap, RoaringBitmap) {
        let depth = self.planes.len() as u32;
        if depth < 64 && (c >> depth) != 0 {
            // c 超出所有已写入幅值
            return (RoaringBitmap::new(), RoaringBitmap::new());
        }
        let mut gt = RoaringBitmap::new();
        let mut eq = candidates.clone();
        for i in (0..depth).rev() {
            let plane = &self.planes[i as usize];
            if (c >> i) & 1 == 1 {
                eq &= plane;
            } else {
                gt |= &eq & plane;
                eq -= plane;
            }
        }
        (gt, eq)
    }

    pub fn compare_eq(&self, value: i64, found: &RoaringBitmap) -> RoaringBitmap {
        let base = &self.exists & found;
        let candidates = if value < 0 { &base & &self.sign } else { &base - &self.sign };
        self.compare_magnitude(&candidates, value.unsigned_abs()).1
    }

    /// `found` 中值 >= value 的行
    pub fn compare_ge(&self, value: i64, found: &RoaringBitmap) -> RoaringBitmap {
        let base = &self.exists & found;
        let pos  = &base - &self.sign;
        let neg  = &base & &self.sign;
        if value >= 0 {
            let (gt, eq) = self.compare_magnitude(&pos, value as u64);
            gt | eq
        } else {
            // 负数：幅值越小值越大
            let (gt, _) = self.compare_magnitude(&neg, value.unsigned_abs());
            pos | (neg - gt)
        }
    }

    /// `found` 中值落在 [lo, hi) 的行
    pub fn compare_range(&self, lo: i64, hi: i64, found: &RoaringBitmap) -> RoaringBitmap {
        if hi <= lo { return RoaringBitmap::new(); }
        self.compare_ge(lo, found) - self.compare_ge(hi, found)
    }

    // ── 聚合 ─────────────────────────────────────────────────────────────────

    /// 有符号求和；结果超出 i64 时饱和
    pub fn sum(&self, found: Option<&RoaringBitmap>) -> i64 {
        let rows = self.rows(found);
        let pos  = &rows - &self.sign;
        let neg  = &rows & &self.sign;
        let mut total: i128 = 0;
        for (i, plane) in self.planes.iter().enumerate() {
            let weight = 1i128 << i;
            total += weight * plane.intersection_len(&pos) as i128;
            total -= weight * plane.intersection_len(&neg) as i128;
        }
        total.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// 转置：把行值本身当作位置，得到去重后的值集合
    pub fn transpose(&self, found: Option<&RoaringBitmap>) -> RoaringTreemap {
        let mut out = RoaringTreemap::new();
        for (_, v) in self.values(found) {
            out.insert(v as u64);
        }
        out
    }

    /// 仅保留 `found` 内的行
    pub fn retain(&self, found: &RoaringBitmap) -> Bsi {
        let mut planes: Vec<RoaringBitmap> = self.planes.iter().map(|p| p & found).collect();
        while planes.last().map(|p| p.is_empty()).unwrap_or(false) {
            planes.pop();
        }
        Bsi {
            exists: &self.exists & found,
            sign:   &self.sign & found,
            planes,
        }
    }
}

fn apply_sign(mag: u64, negative: bool) -> i64 {
    if negative { (mag as i64).wrapping_neg() } else { mag as i64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bsi_of(values: &[(RowId, i64)]) -> Bsi {
        let mut bm = RoaringBitmap::new();
        for &(id, v) in values {
            encode_int(&mut bm, id, v);
        }
        Bsi::from_bitmap(&bm)
    }

    fn set(cols: &[u32]) -> RoaringBitmap {
        cols.iter().copied().collect()
    }

    impl Bsi {
        /// 重新拼回存储形态
        fn to_bitmap(&self) -> RoaringBitmap {
            let mut out = RoaringBitmap::new();
            let all = [&self.exists, &self.sign].into_iter().chain(self.planes.iter());
            for (plane, bm) in all.enumerate() {
                let base = plane as u32 * WIDTH;
                for col in bm.iter() {
                    out.push(base + col);
                }
            }
            out
        }
    }

    #[test]
    fn round_trip_extremes() {
        for (id, v) in [(0u64, 0i64), (1, 1), (7, -1), (42, i64::MAX), (43, i64::MIN), (SHARD_WIDTH + 9, -123_456)] {
            let mut bm = RoaringBitmap::new();
            encode_int(&mut bm, id, v);
            let found = set(&[fragment_of(id)]);
            assert_eq!(decode_int(&bm, &found), vec![(fragment_of(id), v)], "value {v}");
        }
    }

    #[test]
    fn bitmap_round_trip_preserves_layout() {
        let mut bm = RoaringBitmap::new();
        encode_int(&mut bm, 3, -9);
        encode_int(&mut bm, 5, 1 << 40);
        let bsi = Bsi::from_bitmap(&bm);
        assert_eq!(bsi.to_bitmap(), bm);
        assert_eq!(bsi.depth(), 41);
        assert_eq!(bsi.value(3), Some(-9));
        assert_eq!(bsi.value(4), None);
    }

    #[test]
    fn zero_sets_only_existence() {
        let mut bm = RoaringBitmap::new();
        encode_int(&mut bm, 11, 0);
        assert_eq!(bm.len(), 1);
        assert_eq!(Bsi::from_bitmap(&bm).value(11), Some(0));
    }

    #[test]
    fn compare_eq_and_range() {
        let bsi = bsi_of(&[(0, 5), (1, -5), (2, 10), (3, 0), (4, 5), (5, -20)]);
        let all = set(&[0, 1, 2, 3, 4, 5]);

        assert_eq!(bsi.compare_eq(5, &all), set(&[0, 4]));
        assert_eq!(bsi.compare_eq(-5, &all), set(&[1]));
        assert_eq!(bsi.compare_eq(0, &all), set(&[3]));
        assert_eq!(bsi.compare_eq(1 << 50, &all), RoaringBitmap::new());

        assert_eq!(bsi.compare_range(0, 10, &all), set(&[0, 3, 4]));
        assert_eq!(bsi.compare_range(-5, 6, &all), set(&[0, 1, 3, 4]));
        assert_eq!(bsi.compare_range(-100, -5, &all), set(&[5]));
        assert_eq!(bsi.compare_range(10, 10, &all), RoaringBitmap::new());
        assert_eq!(bsi.compare_ge(0, &all), set(&[0, 2, 3, 4]));

        // found 之外的行不参与
        assert_eq!(bsi.compare_eq(5, &set(&[4])), set(&[4]));
    }

    #[test]
    fn sum_is_signed() {
        let bsi = bsi_of(&[(0, 1), (1, 1), (2, -1), (3, 7)]);
        assert_eq!(bsi.sum(None), 8);
        assert_eq!(bsi.sum(Some(&set(&[0, 2]))), 0);
    }

    #[test]
    fn transpose_counts_distinct() {
        let bsi = bsi_of(&[(0, 42), (1, 42), (2, 42), (3, -1)]);
        let t = bsi.transpose(None);
        assert_eq!(t.len(), 2);
        assert!(t.contains(42));
        assert!(t.contains(-1i64 as u64));
    }

    #[test]
    fn retain_trims_planes() {
        let bsi = bsi_of(&[(0, 1), (1, 1 << 10)]);
        let kept = bsi.retain(&set(&[0]));
        assert_eq!(kept.depth(), 1);
        assert_eq!(kept.values(None), vec![(0, 1)]);
    }

    // ── 随机对照 ─────────────────────────────────────────────────────────────

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn value() -> impl Strategy<Value = i64> {
            prop_oneof![
                any::<i64>(),
                -1000i64..1000,
                Just(0),
                Just(i64::MIN),
                Just(i64::MAX),
            ]
        }

        /// 片内 fragment 递增但不连续，每行一个值
        fn rows() -> impl Strategy<Value = Vec<(u32, i64)>> {
            prop::collection::vec((1u32..50, value()), 0..64).prop_map(|steps| {
                let mut col = 0;
                steps.into_iter()
                    .map(|(gap, v)| { col += gap; (col, v) })
                    .collect()
            })
        }

        fn build(rows: &[(u32, i64)]) -> Bsi {
            let mut bm = RoaringBitmap::new();
            for &(col, v) in rows {
                encode_int(&mut bm, col as RowId, v);
            }
            Bsi::from_bitmap(&bm)
        }

        fn found_of(rows: &[(u32, i64)], mask: &[bool]) -> RoaringBitmap {
            rows.iter()
                .zip(mask.iter().chain(std::iter::repeat(&true)))
                .filter(|(_, keep)| **keep)
                .map(|((col, _), _)| *col)
                .collect()
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                rng_seed: proptest::test_runner::RngSeed::Fixed(0),
                failure_persistence: None,
                .. ProptestConfig::default()
            })]

            #[test]
            fn encode_then_values_is_identity(rows in rows(), shard in 0u64..4) {
                let mut bm = RoaringBitmap::new();
                for &(col, v) in &rows {
                    encode_int(&mut bm, shard * SHARD_WIDTH + col as RowId, v);
                }
                prop_assert_eq!(Bsi::from_bitmap(&bm).values(None), rows);
            }

            #[test]
            fn compare_eq_matches_scan(
                rows in rows(),
                mask in prop::collection::vec(any::<bool>(), 64),
                pick in any::<prop::sample::Index>(),
                other in value(),
            ) {
                let bsi   = build(&rows);
                let found = found_of(&rows, &mask);
                let target = if rows.is_empty() { other } else { rows[pick.index(rows.len())].1 };
                for v in [target, other] {
                    let expect: RoaringBitmap = rows.iter()
                        .filter(|(col, x)| *x == v && found.contains(*col))
                        .map(|(col, _)| *col)
                        .collect();
                    prop_assert_eq!(bsi.compare_eq(v, &found), expect);
                }
            }

            #[test]
            fn compare_range_matches_scan(
                rows in rows(),
                mask in prop::collection::vec(any::<bool>(), 64),
                a in value(),
                b in value(),
            ) {
                let bsi   = build(&rows);
                let found = found_of(&rows, &mask);
                let (lo, hi) = (a.min(b), a.max(b));
                let expect: RoaringBitmap = rows.iter()
                    .filter(|(col, x)| *x >= lo && *x < hi && found.contains(*col))
                    .map(|(col, _)| *col)
                    .collect();
                prop_assert_eq!(bsi.compare_range(lo, hi, &found), expect);
            }

            #[test]
            fn sum_matches_scan(rows in rows(), mask in prop::collection::vec(any::<bool>(), 64)) {
                let bsi   = build(&rows);
                let found = found_of(&rows, &mask);
                let total: i128 = rows.iter()
                    .filter(|(col, _)| found.contains(*col))
                    .map(|(_, v)| *v as i128)
                    .sum();
                let expect = total.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
                prop_assert_eq!(bsi.sum(Some(&found)), expect);
            }
        }
    }
}
