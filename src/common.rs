//! 全局基础类型与错误定义

use std::path::Path;
use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// 航天器编号（同一归档内多星区分）
pub type SpacecraftId = u32;
/// 复位计数：星上时钟每重启一次加一
pub type Resets       = i32;
/// 自最近一次复位以来的秒数
pub type Uptime       = i64;
/// 同一 layout 下多种记录的类型区分
pub type RecordType   = i32;
/// 转换表行号
pub type ConversionId = usize;

// ── EpochKey ──────────────────────────────────────────────────────────────────

/// 航天器时基 (resets, uptime)，resets 为主序
///
/// Segment 的起始键只记录到这一层，`.idx` 文件也只持久化这两列。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EpochKey {
    pub resets: Resets,
    pub uptime: Uptime,
}

impl EpochKey {
    pub fn new(resets: Resets, uptime: Uptime) -> Self { Self { resets, uptime } }

    /// 该时刻下最小的复合键，用作按时刻划分记录的下界
    pub fn lowest_key(&self) -> RecordKey {
        RecordKey::new(self.resets, self.uptime, RecordType::MIN)
    }
}

impl std::fmt::Display for EpochKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resets, self.uptime)
    }
}

// ── RecordKey ─────────────────────────────────────────────────────────────────

/// 记录的复合键 (resets, uptime, record_type)，字典序比较
///
/// 字段声明顺序即比较顺序，derive 出的 `Ord` 就是所需的排序规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordKey {
    pub resets:      Resets,
    pub uptime:      Uptime,
    pub record_type: RecordType,
}

impl RecordKey {
    pub fn new(resets: Resets, uptime: Uptime, record_type: RecordType) -> Self {
        Self { resets, uptime, record_type }
    }
    pub fn epoch(&self) -> EpochKey { EpochKey::new(self.resets, self.uptime) }
}

impl From<EpochKey> for RecordKey {
    fn from(e: EpochKey) -> Self { Self::new(e.resets, e.uptime, 0) }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.resets, self.uptime, self.record_type)
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TelemError {
    /// 描述文件或转换表文件损坏/缺失，只影响对应 layout
    #[error("layout load error in {path}: {detail}")]
    LayoutLoad { path: String, detail: String },
    /// 单行持久化数据损坏，调用方跳过该行
    #[error("data load error: {0}")]
    DataLoad(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid conversion id {id} (table has {count} rows)")]
    InvalidConversion { id: ConversionId, count: usize },
    #[error("layout {layout} has no field named {field}")]
    UnknownField { layout: String, field: String },
    /// 记录携带的 layout 与目标表不一致
    #[error("record of layout {layout} cannot be stored in table {table}")]
    LayoutMismatch { table: String, layout: String },
}

impl TelemError {
    pub fn layout_load(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        Self::LayoutLoad {
            path:   path.as_ref().display().to_string(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TelemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resets_dominate_uptime() {
        let a = RecordKey::new(0, 5000, 0);
        let b = RecordKey::new(1, 10, 0);
        assert!(a < b);
        assert!(a.epoch() < b.epoch());
    }

    #[test]
    fn record_type_breaks_ties_last() {
        let a = RecordKey::new(2, 100, 1);
        let b = RecordKey::new(2, 100, 4);
        let c = RecordKey::new(2, 101, 0);
        assert!(a < b && b < c);
        assert_eq!(a.epoch(), b.epoch());
    }

    #[test]
    fn lowest_key_precedes_every_type() {
        let e = EpochKey::new(1, 50);
        assert!(e.lowest_key() < RecordKey::new(1, 50, -7));
        assert!(e.lowest_key() > RecordKey::new(1, 49, i32::MAX));
        assert_eq!(e.lowest_key().epoch(), e);
    }
}
