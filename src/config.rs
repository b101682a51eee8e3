//! 归档配置

use std::path::PathBuf;
use crate::codec::BitOrder;
use crate::field_type::LayoutKind;

/// 单个 segment 的默认记录上限
pub const DEFAULT_MAX_SEGMENT_RECORDS: usize = 1000;
/// 每张表已加载窗口的初始容量
pub const DEFAULT_INITIAL_INDEX_CAPACITY: usize = 1000;

/// 一个 layout 的来源文件
#[derive(Debug, Clone)]
pub struct LayoutSource {
    pub name:            String,
    pub descriptor_path: PathBuf,
    pub kind:            LayoutKind,
    pub conversion_path: Option<PathBuf>,
}

impl LayoutSource {
    pub fn new(name: &str, descriptor_path: impl Into<PathBuf>, kind: LayoutKind) -> Self {
        Self {
            name: name.into(),
            descriptor_path: descriptor_path.into(),
            kind,
            conversion_path: None,
        }
    }

    pub fn with_conversions(mut self, path: impl Into<PathBuf>) -> Self {
        self.conversion_path = Some(path.into()); self
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir:               PathBuf,
    pub max_segment_records:    usize,
    pub initial_index_capacity: usize,
    /// 位 layout 的展开规则
    pub bit_order:              BitOrder,
    pub layouts:                Vec<LayoutSource>,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir:               data_dir.into(),
            max_segment_records:    DEFAULT_MAX_SEGMENT_RECORDS,
            initial_index_capacity: DEFAULT_INITIAL_INDEX_CAPACITY,
            bit_order:              BitOrder::default(),
            layouts:                Vec::new(),
        }
    }

    /// 上限至少为 1
    pub fn with_max_segment_records(mut self, n: usize) -> Self {
        self.max_segment_records = n.max(1); self
    }
    pub fn with_initial_index_capacity(mut self, n: usize) -> Self {
        self.initial_index_capacity = n; self
    }
    pub fn with_bit_order(mut self, order: BitOrder) -> Self {
        self.bit_order = order; self
    }
    pub fn with_layout(mut self, source: LayoutSource) -> Self {
        self.layouts.push(source); self
    }
}
