//! 顶层归档协调器：每个 layout 一张 SegmentedTable

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{info, warn};
use crate::codec::RecordCodec;
use crate::common::{RecordKey, Resets, Result, TelemError, Uptime};
use crate::config::{LayoutSource, StoreConfig};
use crate::conversion::ConversionTable;
use crate::layout::LayoutDescriptor;
use crate::record::{GroundPosition, Record};
use crate::table::SegmentedTable;

/// `field_series` 的一个点
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub value:    f64,
    pub resets:   Resets,
    pub uptime:   Uptime,
    pub position: Option<GroundPosition>,
}

/// 共享的表句柄；同一张表的全部读写都在这把锁内完成
#[derive(Clone)]
pub struct TableHandle(Arc<Mutex<SegmentedTable>>);

impl TableHandle {
    fn new(table: SegmentedTable) -> Self {
        Self(Arc::new(Mutex::new(table)))
    }

    pub fn lock(&self) -> MutexGuard<'_, SegmentedTable> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 表名大小写不敏感
fn table_key(name: &str) -> String { name.to_ascii_lowercase() }

pub struct TableStore {
    config:   StoreConfig,
    codec:    RecordCodec,
    tables:   RwLock<HashMap<String, TableHandle>>,
    disabled: Vec<String>,
}

impl TableStore {
    /// 创建数据目录并按配置加载全部 layout
    ///
    /// 描述文件或转换表加载失败的 layout 记入 `disabled_layouts`，其余照常打开。
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut loaded   = Vec::with_capacity(config.layouts.len());
        let mut disabled = Vec::new();
        let mut tables_cache: HashMap<PathBuf, Arc<ConversionTable>> = HashMap::new();

        for source in &config.layouts {
            match load_layout(source, &mut tables_cache) {
                Ok(layout) => loaded.push(layout),
                Err(e) => {
                    warn!(layout = %source.name, error = %e, "layout disabled");
                    disabled.push(source.name.clone());
                }
            }
        }
        let mut store = Self::with_layouts(config, loaded)?;
        disabled.append(&mut store.disabled);
        store.disabled = disabled;
        Ok(store)
    }

    /// 使用已构建好的 layout 打开
    ///
    /// 名字只有大小写不同的 layout 共用一个表名，后出现的记入 `disabled_layouts`。
    pub fn with_layouts(config: StoreConfig, layouts: Vec<LayoutDescriptor>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let mut tables = HashMap::with_capacity(layouts.len());
        let mut disabled = Vec::new();
        for layout in layouts {
            let key = table_key(&layout.name);
            if tables.contains_key(&key) {
                warn!(layout = %layout.name, "layout name collides with an open table, disabled");
                disabled.push(layout.name);
                continue;
            }
            let table = SegmentedTable::open(&config.data_dir, Arc::new(layout), &config)?;
            tables.insert(key, TableHandle::new(table));
        }
        info!(dir = %config.data_dir.display(), tables = tables.len(), "opened telemetry store");
        Ok(Self {
            codec: RecordCodec::new(config.bit_order),
            config,
            tables: RwLock::new(tables),
            disabled,
        })
    }

    pub fn data_dir(&self) -> &Path { &self.config.data_dir }

    /// 按配置位序解码原始帧的编解码器
    pub fn codec(&self) -> RecordCodec { self.codec }

    pub fn table(&self, name: &str) -> Option<TableHandle> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).get(&table_key(name)).cloned()
    }

    pub fn layout(&self, name: &str) -> Option<Arc<LayoutDescriptor>> {
        self.table(name).map(|t| t.lock().layout().clone())
    }

    pub fn layout_names(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tables.values().map(|t| t.lock().name().to_string()).collect();
        names.sort();
        names
    }

    pub fn disabled_layouts(&self) -> &[String] { &self.disabled }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    /// 按 `record.layout.name` 路由；未配置的 layout 现场建表，
    /// 与表内 layout 不一致的记录报 `LayoutMismatch`
    pub fn add_record(&self, record: Record) -> Result<bool> {
        let handle = match self.table(record.layout_name()) {
            Some(h) => h,
            None    => self.open_table(record.layout.clone())?,
        };
        let accepted = handle.lock().save(record)?;
        Ok(accepted)
    }

    fn open_table(&self, layout: Arc<LayoutDescriptor>) -> Result<TableHandle> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let key = table_key(&layout.name);
        if let Some(h) = tables.get(&key) {
            return Ok(h.clone());
        }
        let handle = TableHandle::new(SegmentedTable::open(&self.config.data_dir, layout, &self.config)?);
        tables.insert(key, handle.clone());
        Ok(handle)
    }

    // ── 查询（未知 layout 一律返回空） ────────────────────────────────────────

    pub fn latest(&self, name: &str) -> Result<Option<Record>> {
        self.table(name).map_or(Ok(None), |t| t.lock().latest())
    }

    pub fn frame_near(&self, name: &str, key: &RecordKey, prefer_previous: bool) -> Result<Option<Record>> {
        self.table(name).map_or(Ok(None), |t| t.lock().get_frame(key, prefer_previous))
    }

    /// 单个字段的时间序列；`raw` 为 false 时经转换表换算
    pub fn field_series(
        &self,
        name:    &str,
        field:   &str,
        from:    &RecordKey,
        count:   usize,
        raw:     bool,
        reverse: bool,
    ) -> Result<Vec<SeriesPoint>> {
        let Some(t) = self.table(name) else { return Ok(Vec::new()) };
        let mut table = t.lock();
        if !table.layout().has_field(field) {
            return Err(TelemError::UnknownField { layout: table.name().into(), field: field.into() });
        }
        let points = table.get_range(from, count, reverse)?
            .iter()
            .map(|r| {
                let value = if raw { r.raw_value(field)? as f64 } else { r.converted_value(field)? };
                Ok(SeriesPoint { value, resets: r.key.resets, uptime: r.key.uptime, position: r.position })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(points)
    }

    /// 原始值行：`resets, uptime[, type], v0, …, vN`
    pub fn table_rows(
        &self,
        name:      &str,
        from:      &RecordKey,
        count:     usize,
        with_type: bool,
        reverse:   bool,
    ) -> Result<Vec<Vec<i64>>> {
        let Some(t) = self.table(name) else { return Ok(Vec::new()) };
        let mut table = t.lock();
        let rows = table.get_range(from, count, reverse)?
            .iter()
            .map(|r| {
                let mut row = Vec::with_capacity(r.values.len() + 3);
                row.push(r.key.resets as i64);
                row.push(r.key.uptime);
                if with_type {
                    row.push(r.key.record_type as i64);
                }
                row.extend_from_slice(&r.values);
                row
            })
            .collect();
        Ok(rows)
    }

    pub fn contains(&self, name: &str, key: &RecordKey) -> Result<bool> {
        self.table(name).map_or(Ok(false), |t| t.lock().contains(key))
    }

    pub fn records_between(&self, name: &str, from: &RecordKey, to: &RecordKey) -> Result<usize> {
        self.table(name).map_or(Ok(0), |t| t.lock().records_between(from, to))
    }

    // ── 统计 ──────────────────────────────────────────────────────────────────

    pub fn record_count(&self, name: &str) -> usize {
        self.table(name).map_or(0, |t| t.lock().size())
    }

    pub fn total_records(&self) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.values().map(|t| t.lock().size()).sum()
    }

    /// 读取并清除“有新数据”标记
    pub fn take_updated(&self, name: &str) -> bool {
        self.table(name).is_some_and(|t| {
            let mut table = t.lock();
            let updated = table.is_updated();
            table.set_updated(false);
            updated
        })
    }

    // ── 删除 ──────────────────────────────────────────────────────────────────

    /// 删除一张表的全部文件，表本身保留为空表
    pub fn delete_table(&self, name: &str) -> Result<bool> {
        let Some(t) = self.table(name) else { return Ok(false) };
        t.lock().remove()?;
        Ok(true)
    }
}

fn load_layout(
    source: &LayoutSource,
    cache:  &mut HashMap<PathBuf, Arc<ConversionTable>>,
) -> Result<LayoutDescriptor> {
    let layout = LayoutDescriptor::load(&source.name, &source.descriptor_path, source.kind)?;
    let Some(path) = &source.conversion_path else { return Ok(layout) };

    let table = match cache.get(path) {
        Some(t) => t.clone(),
        None => {
            let t = Arc::new(ConversionTable::load(path)?);
            cache.insert(path.clone(), t.clone());
            t
        }
    };
    for f in &layout.fields {
        if f.conversion >= table.len() {
            return Err(TelemError::layout_load(&source.descriptor_path, format!(
                "field {} uses conversion {} but {} has {} rows",
                f.name, f.conversion, path.display(), table.len())));
        }
    }
    Ok(layout.with_conversions(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::{FieldType, LayoutKind};
    use crate::layout::{DisplayMeta, FieldDef};

    fn layout(name: &str) -> LayoutDescriptor {
        LayoutDescriptor::from_fields(name, LayoutKind::Bytes, vec![FieldDef {
            name: "batt".into(), field_type: FieldType::Int, length: 2,
            units: "-".into(), conversion: 0, display: DisplayMeta::default(),
        }])
    }

    fn store(dir: &Path) -> TableStore {
        let config = StoreConfig::new(dir).with_max_segment_records(2);
        TableStore::with_layouts(config, vec![layout("rt"), layout("wod")]).unwrap()
    }

    fn rec(store: &TableStore, name: &str, uptime: i64, value: i64) -> Record {
        Record::new(store.layout(name).unwrap(), 1, RecordKey::new(0, uptime, 0), vec![value])
    }

    #[test]
    fn routes_by_layout_name() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.add_record(rec(&s, "rt", 10, 1)).unwrap());
        assert!(s.add_record(rec(&s, "wod", 10, 2)).unwrap());
        assert!(!s.add_record(rec(&s, "rt", 10, 9)).unwrap());
        assert!(s.add_record(rec(&s, "rt", 11, 3)).unwrap());

        assert_eq!(s.record_count("rt"), 2);
        assert_eq!(s.record_count("RT"), 2);
        assert_eq!(s.record_count("wod"), 1);
        assert_eq!(s.total_records(), 3);
        assert_eq!(s.latest("rt").unwrap().unwrap().values, vec![3]);
    }

    #[test]
    fn unknown_layouts_answer_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let k = RecordKey::default();
        assert_eq!(s.record_count("nope"), 0);
        assert!(s.latest("nope").unwrap().is_none());
        assert!(s.frame_near("nope", &k, true).unwrap().is_none());
        assert!(s.table_rows("nope", &k, 5, false, true).unwrap().is_empty());
        assert!(s.field_series("nope", "batt", &k, 5, true, true).unwrap().is_empty());
        assert!(!s.take_updated("nope"));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let err = s.field_series("rt", "nope", &RecordKey::default(), 5, true, true).unwrap_err();
        assert!(matches!(err, TelemError::UnknownField { .. }));
    }

    #[test]
    fn rows_and_series() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        for (u, v) in [(10, 100), (20, 200), (30, 300)] {
            s.add_record(rec(&s, "rt", u, v).with_position(1.5, -2.0)).unwrap();
        }
        let rows = s.table_rows("rt", &RecordKey::default(), 2, true, true).unwrap();
        assert_eq!(rows, vec![vec![0, 20, 0, 200], vec![0, 30, 0, 300]]);

        let rows = s.table_rows("rt", &RecordKey::new(0, 15, 0), 1, false, false).unwrap();
        assert_eq!(rows, vec![vec![0, 20, 200]]);

        let series = s.field_series("rt", "BATT", &RecordKey::default(), 3, true, true).unwrap();
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![100.0, 200.0, 300.0]);
        assert_eq!(series[0].position, Some(GroundPosition { latitude: 1.5, longitude: -2.0 }));
    }

    #[test]
    fn updated_flag_is_cleared_on_take() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.take_updated("rt"));
        assert!(!s.take_updated("rt"));
        s.add_record(rec(&s, "rt", 1, 1)).unwrap();
        assert!(s.take_updated("rt"));
    }

    #[test]
    fn delete_table_leaves_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        for u in 0..5 {
            s.add_record(rec(&s, "rt", u, u)).unwrap();
        }
        assert!(s.delete_table("rt").unwrap());
        assert_eq!(s.record_count("rt"), 0);
        assert!(s.latest("rt").unwrap().is_none());
        assert!(s.add_record(rec(&s, "rt", 3, 3)).unwrap());
        assert!(!s.delete_table("nope").unwrap());
    }

    #[test]
    fn case_colliding_layouts_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let s = TableStore::with_layouts(config, vec![layout("rt"), layout("RT")]).unwrap();
        assert_eq!(s.disabled_layouts(), ["RT".to_string()]);
        assert_eq!(s.layout_names(), vec!["rt".to_string()]);

        let foreign = Arc::new(LayoutDescriptor::from_fields("Rt", LayoutKind::Bytes, vec![]));
        let err = s.add_record(Record::new(foreign, 1, RecordKey::new(0, 1, 0), vec![])).unwrap_err();
        assert!(matches!(err, TelemError::LayoutMismatch { .. }));
        assert_eq!(s.record_count("rt"), 0);
    }

    #[test]
    fn open_fails_when_dir_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blocker");
        std::fs::write(&file, "x").unwrap();
        let err = TableStore::open(StoreConfig::new(file.join("data"))).err().unwrap();
        assert!(matches!(err, TelemError::Io(_)));
    }
}
