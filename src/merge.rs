//! 字段位图的 merge operator
//!
//! Writer 每次 flush 只写出本轮新增的位，RocksDB 在读取和 compaction 时
//! 用这里的并集函数把同一 key 的多个操作数合并。并集满足结合律与交换律，
//! 因此 flush 顺序、部分合并的分组方式都不影响最终位图。

use roaring::RoaringBitmap;
use rocksdb::MergeOperands;
use tracing::error;
use crate::common::{EngineError, Result};

pub const BITMAP_MERGE_OPERATOR_NAME: &str = "bsi.bitmap.union";

pub fn decode_bitmap(data: &[u8]) -> Result<RoaringBitmap> {
    RoaringBitmap::deserialize_from(data).map_err(|e| EngineError::CorruptBitmap {
        context: e.to_string(),
    })
}

pub fn encode_bitmap(bitmap: &RoaringBitmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(bitmap.serialized_size());
    // 写入 Vec 不会失败
    let _ = bitmap.serialize_into(&mut out);
    out
}

/// 对若干序列化位图求并集
pub fn union_encoded<'a>(
    existing: Option<&'a [u8]>,
    operands: impl IntoIterator<Item = &'a [u8]>,
) -> Result<Vec<u8>> {
    let mut acc = match existing {
        Some(data) => decode_bitmap(data)?,
        None       => RoaringBitmap::new(),
    };
    for op in operands {
        acc |= decode_bitmap(op)?;
    }
    Ok(encode_bitmap(&acc))
}

/// 注册给 RocksDB 的合并回调；返回 `None` 让引擎以 corruption 失败，
/// 而不是静默丢弃数据
pub fn bitmap_full_merge(
    key:      &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    match union_encoded(existing, operands.iter()) {
        Ok(merged) => Some(merged),
        Err(e) => {
            error!(key = ?key, error = %e, "bitmap merge failed, refusing to merge corrupt operand");
            None
        }
    }
}
