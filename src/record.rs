//! 解码后的单条遥测记录

use std::sync::Arc;
use crate::common::{EpochKey, RecordKey, Result, SpacecraftId, TelemError};
use crate::layout::LayoutDescriptor;

/// 解码后由外部附加的星下点（不落盘）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundPosition {
    pub latitude:  f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub id:       SpacecraftId,
    pub key:      RecordKey,
    /// 与 layout.fields 一一对应的原始值
    pub values:   Vec<i64>,
    pub layout:   Arc<LayoutDescriptor>,
    pub position: Option<GroundPosition>,
}

impl Record {
    /// `values` 短于字段数时补 0，长出的部分丢弃
    pub fn new(layout: Arc<LayoutDescriptor>, id: SpacecraftId, key: RecordKey, mut values: Vec<i64>) -> Self {
        values.resize(layout.num_fields(), 0);
        Self { id, key, values, layout, position: None }
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.position = Some(GroundPosition { latitude, longitude }); self
    }

    pub fn epoch(&self) -> EpochKey { self.key.epoch() }
    pub fn layout_name(&self) -> &str { &self.layout.name }

    // ── 按字段名取值 ──────────────────────────────────────────────────────────

    fn position_of(&self, field: &str) -> Result<usize> {
        self.layout.position_of(field).ok_or_else(|| TelemError::UnknownField {
            layout: self.layout.name.clone(),
            field:  field.into(),
        })
    }

    pub fn raw_value(&self, field: &str) -> Result<i64> {
        Ok(self.values[self.position_of(field)?])
    }

    /// 没有挂转换表时返回原始值
    pub fn converted_value(&self, field: &str) -> Result<f64> {
        let i = self.position_of(field)?;
        match self.layout.conversions() {
            Some(ct) => ct.convert(self.layout.fields[i].conversion, self.values[i]),
            None     => Ok(self.values[i] as f64),
        }
    }

    pub fn formatted_value(&self, field: &str) -> Result<String> {
        self.format_at(self.position_of(field)?)
    }

    fn format_at(&self, i: usize) -> Result<String> {
        match self.layout.conversions() {
            Some(ct) => ct.format(self.layout.fields[i].conversion, self.values[i]),
            None     => Ok(self.values[i].to_string()),
        }
    }

    /// 各字段 short name，逗号分隔
    pub fn header_line(&self) -> String {
        self.layout.fields.iter()
            .map(|f| f.display.short_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 按 key + 值比较；layout 只比较名字
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.key == other.key
            && self.values == other.values
            && self.layout.name == other.layout.name
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.values.len() {
            if i > 0 { write!(f, ", ")?; }
            match self.format_at(i) {
                Ok(s)  => write!(f, "{s}")?,
                Err(_) => write!(f, "{}", self.values[i])?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::ConversionTable;
    use crate::field_type::LayoutKind;

    fn layout() -> Arc<LayoutDescriptor> {
        let text = "2\n0,INT,batt,2,V,1,Power,1,1,0,BattV\n1,BYTE,flag,1,-,2,Power,1,2,0,Flag\n";
        let ct = ConversionTable::parse("c.csv",
            "N,N,N,0,1,0,0,0,0,-,0,0\nB,B,B,0,0.5,0,0,0,0,V,0,0\nF,F,F,0,1,0,0,0,0,Boolean,0,0\nNOTES:\n").unwrap();
        Arc::new(LayoutDescriptor::parse("rt", "rt.csv", text, LayoutKind::Bytes).unwrap()
            .with_conversions(Arc::new(ct)))
    }

    #[test]
    fn values_are_padded_to_field_count() {
        let r = Record::new(layout(), 1, RecordKey::new(0, 1, 0), vec![7]);
        assert_eq!(r.values, vec![7, 0]);
    }

    #[test]
    fn named_access_goes_through_conversions() {
        let r = Record::new(layout(), 1, RecordKey::new(0, 1, 0), vec![10, 1]);
        assert_eq!(r.raw_value("BATT").unwrap(), 10);
        assert_eq!(r.converted_value("batt").unwrap(), 5.0);
        assert_eq!(r.formatted_value("flag").unwrap(), "True");
        assert_eq!(r.to_string(), "5.00, True");
        assert_eq!(r.header_line(), "BattV, Flag");
    }

    #[test]
    fn unknown_field_is_an_error() {
        let r = Record::new(layout(), 1, RecordKey::new(0, 1, 0), vec![]);
        assert!(matches!(r.raw_value("nope"), Err(TelemError::UnknownField { .. })));
    }
}
