//! 已加载记录的有序索引（每张表一个）
//!
//! 按复合键 (resets, uptime, type) 排序的 Vec。插入为 O(n)，
//! 每张表常驻的记录数有上限，可以接受；查找全部走二分。

use crate::common::RecordKey;
use crate::record::Record;

#[derive(Debug, Default)]
pub struct OrderedRecordIndex {
    records: Vec<Record>,
}

impl OrderedRecordIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { records: Vec::with_capacity(capacity) }
    }

    /// 插入并保持有序；键已存在时不插入，返回 false
    pub fn add(&mut self, record: Record) -> bool {
        match self.records.binary_search_by(|r| r.key.cmp(&record.key)) {
            Ok(_)    => false,
            Err(pos) => { self.records.insert(pos, record); true }
        }
    }

    pub fn len(&self) -> usize { self.records.len() }
    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn get(&self, i: usize) -> Option<&Record> { self.records.get(i) }
    pub fn last(&self) -> Option<&Record> { self.records.last() }
    pub fn as_slice(&self) -> &[Record] { &self.records }

    /// 精确匹配的位置
    pub fn position(&self, key: &RecordKey) -> Option<usize> {
        self.records.binary_search_by(|r| r.key.cmp(key)).ok()
    }

    pub fn contains(&self, key: &RecordKey) -> bool { self.position(key).is_some() }

    /// 第一个 ≥ key 的位置
    pub fn nearest_index(&self, key: &RecordKey) -> Option<usize> {
        let pos = self.records.partition_point(|r| r.key < *key);
        (pos < self.records.len()).then_some(pos)
    }

    /// 最后一个 ≤ key 的位置
    pub fn nearest_index_at_or_before(&self, key: &RecordKey) -> Option<usize> {
        self.records.partition_point(|r| r.key <= *key).checked_sub(1)
    }

    /// 键落在 [from, to) 内的记录；`to` 为 None 时取到末尾
    pub fn range(&self, from: &RecordKey, to: Option<&RecordKey>) -> &[Record] {
        let start = self.records.partition_point(|r| r.key < *from);
        let end = to.map_or(self.records.len(), |to| self.records.partition_point(|r| r.key < *to));
        &self.records[start..end.max(start)]
    }

    /// 最后一个 < key 的位置
    pub fn nearest_before(&self, key: &RecordKey) -> Option<usize> {
        self.records.partition_point(|r| r.key < *key).checked_sub(1)
    }

    /// 第一个 > key 的位置
    pub fn nearest_after(&self, key: &RecordKey) -> Option<usize> {
        let pos = self.records.partition_point(|r| r.key <= *key);
        (pos < self.records.len()).then_some(pos)
    }
}
