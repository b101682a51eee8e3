//! # telem-store
//!
//! 地面站遥测归档：按 layout 解码下行帧，按航天器时基 (resets, uptime)
//! 存入分段的追加写文本表，并支持按时间点/区间的懒加载查询。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TableStore                            │
//! │        layout 名 → TableHandle(Arc<Mutex<SegmentedTable>>)    │
//! │                             │                                │
//! │   raw bytes                 │ add_record / latest /          │
//! │      │                      │ frame_near / field_series      │
//! │      ▼                      ▼                                │
//! │  RecordCodec ──Record──▶ SegmentedTable                      │
//! │   ├─ 字节字段 (LE)          ├─ Segment × N  (<layout>_r_u.log)│
//! │   └─ 位字段 (BitOrder)      ├─ SegmentIndexFile (<layout>.idx)│
//! │      │                      └─ OrderedRecordIndex (已加载窗口)│
//! │  LayoutDescriptor                                            │
//! │   └─ ConversionTable（raw → 工程量 / 格式化文本）             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

// ── 基础类型与配置 ────────────────────────────────────────────────────────────
pub mod common;
pub mod config;

// ── 帧描述与编解码 ────────────────────────────────────────────────────────────
pub mod field_type;
pub mod layout;
pub mod conversion;
pub mod codec;
pub mod record;

// ── 存储层 ────────────────────────────────────────────────────────────────────
pub mod index;
pub mod segment;
pub mod table;
pub mod storage;

pub use common::{EpochKey, RecordKey, Result, TelemError};
pub use config::{LayoutSource, StoreConfig};
pub use codec::{BitOrder, RecordCodec};
pub use conversion::ConversionTable;
pub use field_type::{FieldType, LayoutKind};
pub use layout::LayoutDescriptor;
pub use record::Record;
pub use storage::{SeriesPoint, TableStore};
pub use table::SegmentedTable;
