//! 单个 layout 的分段表
//!
//! ```text
//!            segments（按起始键有序）                loaded window
//!   ┌──────────┬──────────┬──────────┐        ┌──────────────────────┐
//!   │ 0/100    │ 0/5000   │ 1/20     │  load  │  OrderedRecordIndex  │
//!   │ 1000 条  │ 1000 条  │ 37 条    │ ─────▶ │  (已触达 segment 的   │
//!   │ unloaded │ loaded   │ loaded   │        │   全部记录)           │
//!   └──────────┴──────────┴──────────┘        └──────────────────────┘
//! ```
//!
//! Segment 只会从 unloaded 变为 loaded，加载后常驻直到进程结束。
//! 写入路由与查询路由都是在起始键上的二分查找。
//!
//! 不变量：segment i 中每条记录的时刻都落在 `[first_key(i), first_key(i+1))`，
//! 因此任意键只可能存在于 `get_seg` 选中的那一个 segment。迟到记录落进已满且
//! 含有更晚记录的 segment 时，按该记录的时刻把 segment 一分为二来维持这一点。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::codec::RecordCodec;
use crate::common::{EpochKey, RecordKey, Result, TelemError};
use crate::config::StoreConfig;
use crate::index::OrderedRecordIndex;
use crate::layout::LayoutDescriptor;
use crate::record::Record;
use crate::segment::{remove_if_exists, Segment, SegmentIndexFile};

pub struct SegmentedTable {
    name:         String,
    dir:          PathBuf,
    layout:       Arc<LayoutDescriptor>,
    index_file:   SegmentIndexFile,
    segments:     Vec<Segment>,
    records:      OrderedRecordIndex,
    max_segment_records: usize,
    updated:      bool,
}

impl SegmentedTable {
    /// 打开（或新建）layout 对应的表；只读目录文件，不加载任何 segment
    pub fn open(dir: &Path, layout: Arc<LayoutDescriptor>, config: &StoreConfig) -> Result<Self> {
        let name = layout.name.clone();
        let index_file = SegmentIndexFile::new(dir, &name);
        let mut segments = index_file.load()?;
        // 目录文件按创建顺序写入，内存中按起始键排序
        segments.sort_by_key(|s| s.first_key);
        info!(table = %name, segments = segments.len(), "opened table");
        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            layout,
            index_file,
            segments,
            records: OrderedRecordIndex::with_capacity(config.initial_index_capacity),
            max_segment_records: config.max_segment_records.max(1),
            updated: true,
        })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn layout(&self) -> &Arc<LayoutDescriptor> { &self.layout }
    pub fn segments(&self) -> &[Segment] { &self.segments }
    pub fn segment_count(&self) -> usize { self.segments.len() }

    /// 目录文件记录的总条数（不需要加载）
    pub fn size(&self) -> usize { self.segments.iter().map(|s| s.records).sum() }

    /// 已加载窗口中的记录数
    pub fn loaded_len(&self) -> usize { self.records.len() }

    pub fn is_updated(&self) -> bool { self.updated }
    pub fn set_updated(&mut self, updated: bool) { self.updated = updated; }

    // ── Segment 路由 ──────────────────────────────────────────────────────────

    /// 写入路由：起始键 ≤ key 的最后一个 segment；没有则返回 None，由调用方新建
    fn get_seg(&self, key: EpochKey) -> Option<usize> {
        self.segments.partition_point(|s| s.first_key <= key).checked_sub(1)
    }

    /// 查询路由，四种情况：
    ///
    /// | 目标位置                      | 结果       |
    /// |-------------------------------|------------|
    /// | 小于第一个 segment 的起始键   | 0          |
    /// | 严格位于 i 与 i+1 的起始键之间 | i          |
    /// | 等于 segment i 的起始键       | i          |
    /// | 大于最后一个起始键            | last       |
    pub fn find_first_seg(&self, key: EpochKey) -> Option<usize> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.get_seg(key).unwrap_or(0))
    }

    fn ensure_loaded(&mut self, i: usize) -> Result<()> {
        if self.segments[i].is_loaded() {
            return Ok(());
        }
        let lines = self.segments[i].read_lines(&self.dir)?;
        let mut valid = 0usize;
        let mut newest: Option<EpochKey> = None;
        for line in &lines {
            match RecordCodec::parse_line(&self.layout, line) {
                Ok(record) => {
                    valid += 1;
                    newest = newest.max(Some(record.epoch()));
                    self.records.add(record);
                }
                Err(e) => warn!(table = %self.name, file = %self.segments[i].file_name,
                                error = %e, "skipping corrupt record"),
            }
        }
        self.segments[i].mark_loaded();
        debug!(table = %self.name, file = %self.segments[i].file_name, records = valid, "loaded segment");
        if let (Some(newest), Some(next)) = (newest, self.segments.get(i + 1).map(|s| s.first_key)) {
            if newest >= next {
                warn!(table = %self.name, file = %self.segments[i].file_name, %newest, %next,
                      "segment overlaps its successor");
            }
        }
        let seg = &mut self.segments[i];
        if valid != seg.records {
            warn!(table = %self.name, file = %seg.file_name, indexed = seg.records, found = valid,
                  "segment index out of date, repairing");
            seg.records = valid;
            self.index_file.save(&self.segments)?;
        }
        Ok(())
    }

    /// 加载满足 `number` 条所需的 segment
    ///
    /// 反向：从最新的 segment 往回累加到够数；正向：从 `from` 所在 segment 往后，
    /// 多加载一个 segment 的余量，因为起点常落在前一个 segment 的尾部。
    fn load_segments(&mut self, from: EpochKey, number: usize, reverse: bool) -> Result<()> {
        if reverse {
            let mut total = 0usize;
            let mut start = 0usize;
            for i in (0..self.segments.len()).rev() {
                total += self.segments[i].records;
                if total >= number {
                    start = i;
                    break;
                }
            }
            for i in start..self.segments.len() {
                self.ensure_loaded(i)?;
            }
        } else if let Some(first) = self.find_first_seg(from) {
            let mut total = 0usize;
            for i in first..self.segments.len() {
                self.ensure_loaded(i)?;
                total += self.segments[i].records;
                if total >= number + self.max_segment_records {
                    break;
                }
            }
        }
        Ok(())
    }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    /// 追加一条记录；键已存在返回 Ok(false)
    pub fn save(&mut self, record: Record) -> Result<bool> {
        if !Arc::ptr_eq(&record.layout, &self.layout)
            && (record.layout.name != self.name || record.layout.num_fields() != self.layout.num_fields())
        {
            return Err(TelemError::LayoutMismatch { table: self.name.clone(), layout: record.layout.name.clone() });
        }
        let epoch = record.epoch();
        let target = self.get_seg(epoch);
        if let Some(i) = target {
            self.ensure_loaded(i)?;
        }
        if self.records.contains(&record.key) {
            debug!(table = %self.name, key = %record.key, "duplicate record ignored");
            return Ok(false);
        }

        let line = RecordCodec::encode(&record);
        let i = match target {
            Some(i) if self.segments[i].records < self.max_segment_records => {
                self.segments[i].append(&self.dir, &line)?;
                i
            }
            // 同一时刻的记录只能留在同一个 segment，允许超出上限
            Some(i) if self.segments[i].first_key == epoch => {
                warn!(table = %self.name, file = %self.segments[i].file_name, "segment over capacity");
                self.segments[i].append(&self.dir, &line)?;
                i
            }
            Some(i) if !self.segment_tail(i, epoch).is_empty() => {
                return self.split_segment(i, record);
            }
            _ => {
                let seg = Segment::new(epoch, self.unique_file_name(epoch));
                seg.append(&self.dir, &line)?;
                let pos = self.segments.partition_point(|s| s.first_key <= epoch);
                info!(table = %self.name, file = %seg.file_name, "created segment");
                self.segments.insert(pos, seg);
                pos
            }
        };

        self.segments[i].records += 1;
        self.records.add(record);
        self.updated = true;
        self.index_file.save(&self.segments)?;
        Ok(true)
    }

    /// segment i 中时刻 ≥ `from` 的记录（要求 i 已加载）
    fn segment_tail(&self, i: usize, from: EpochKey) -> &[Record] {
        let upper = self.segments.get(i + 1).map(|s| s.first_key.lowest_key());
        self.records.range(&from.lowest_key(), upper.as_ref())
    }

    /// 在 `record` 的时刻处拆分已满的 segment i：更晚的记录连同 `record`
    /// 移入锚定在该时刻的新 segment
    ///
    /// 先写新文件，再写目录，最后重写旧文件；中途崩溃只会让旧文件多出
    /// 已被搬走的行，下次加载时按重复键去重。
    fn split_segment(&mut self, i: usize, record: Record) -> Result<bool> {
        let epoch = record.epoch();
        let head: Vec<String> = self.records
            .range(&self.segments[i].first_key.lowest_key(), Some(&epoch.lowest_key()))
            .iter()
            .map(RecordCodec::encode)
            .collect();
        let mut tail: Vec<&Record> = self.segment_tail(i, epoch).iter().collect();
        let at = tail.partition_point(|r| r.key < record.key);
        tail.insert(at, &record);
        let tail: Vec<String> = tail.into_iter().map(RecordCodec::encode).collect();

        let mut seg = Segment::new(epoch, self.unique_file_name(epoch));
        seg.rewrite(&self.dir, &tail)?;
        seg.records = tail.len();
        info!(table = %self.name, from = %self.segments[i].file_name, to = %seg.file_name,
              moved = tail.len() - 1, "split segment");

        self.segments[i].records = head.len();
        self.segments.insert(i + 1, seg);
        self.index_file.save(&self.segments)?;
        self.segments[i].rewrite(&self.dir, &head)?;

        self.records.add(record);
        self.updated = true;
        Ok(true)
    }

    fn unique_file_name(&self, key: EpochKey) -> String {
        (0..)
            .map(|seq| Segment::file_name_for(&self.name, key, seq))
            .find(|name| self.segments.iter().all(|s| &s.file_name != name))
            .unwrap_or_default()
    }

    // ── 查询 ──────────────────────────────────────────────────────────────────

    pub fn latest(&mut self) -> Result<Option<Record>> {
        let Some(last) = self.segments.len().checked_sub(1) else { return Ok(None) };
        self.ensure_loaded(last)?;
        Ok(self.records.last().cloned())
    }

    pub fn contains(&mut self, key: &RecordKey) -> Result<bool> {
        if let Some(i) = self.get_seg(key.epoch()) {
            self.ensure_loaded(i)?;
        }
        Ok(self.records.contains(key))
    }

    /// 精确匹配，否则取严格更小（`prefer_previous`）或严格更大的最近一条
    pub fn get_frame(&mut self, key: &RecordKey, prefer_previous: bool) -> Result<Option<Record>> {
        let Some(i) = self.find_first_seg(key.epoch()) else { return Ok(None) };
        self.ensure_loaded(i)?;
        // 下一条可能在后继 segment 的开头
        if i + 1 < self.segments.len() {
            self.ensure_loaded(i + 1)?;
        }
        // 上一条可能在前驱 segment 的末尾
        let lowest = self.segments[i].first_key.lowest_key();
        if prefer_previous && i > 0 && self.records.range(&lowest, Some(key)).is_empty() {
            self.ensure_loaded(i - 1)?;
        }

        let pos = match self.records.position(key) {
            Some(p)                => Some(p),
            None if prefer_previous => self.records.nearest_before(key),
            None                   => self.records.nearest_after(key),
        };
        Ok(pos.and_then(|p| self.records.get(p)).cloned())
    }

    /// 区间读取，结果按键升序
    ///
    /// 反向取整张表最新的 `count` 条；正向从第一个 ≥ `from` 的记录开始取 `count` 条。
    pub fn get_range(&mut self, from: &RecordKey, count: usize, reverse: bool) -> Result<&[Record]> {
        if self.segments.is_empty() || count == 0 {
            return Ok(&[]);
        }
        self.load_segments(from.epoch(), count, reverse)?;

        let len = self.records.len();
        let start = if reverse {
            len.saturating_sub(count)
        } else {
            self.records.nearest_index(from).unwrap_or(len.saturating_sub(count))
        };
        let end = (start + count).min(len);
        Ok(&self.records.as_slice()[start.min(end)..end])
    }

    /// `from` 与 `to` 之间的记录条数（`to <= from` 时为 0）
    pub fn records_between(&mut self, from: &RecordKey, to: &RecordKey) -> Result<usize> {
        let (Some(first), Some(last)) = (self.find_first_seg(from.epoch()), self.find_first_seg(to.epoch()))
            else { return Ok(0) };
        // 终点可能在下一个 segment 的开头
        let last = (last + 1).min(self.segments.len() - 1);
        for i in first..=last {
            self.ensure_loaded(i)?;
        }
        let len = self.records.len();
        let start = self.records.nearest_index(from).unwrap_or(len);
        let end   = self.records.nearest_index(to).unwrap_or(len);
        Ok(end.saturating_sub(start))
    }

    // ── 删除 ──────────────────────────────────────────────────────────────────

    /// 删除全部 segment 文件与目录文件，表回到空状态
    pub fn remove(&mut self) -> Result<()> {
        for seg in &self.segments {
            remove_if_exists(&seg.path(&self.dir))?;
        }
        self.index_file.remove()?;
        info!(table = %self.name, segments = self.segments.len(), "removed table");
        self.segments.clear();
        self.records = OrderedRecordIndex::with_capacity(self.records.len());
        self.updated = true;
        Ok(())
    }
}
