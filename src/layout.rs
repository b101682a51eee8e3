//! Layout 描述文件（遥测帧 schema）
//!
//! 文件格式：
//! ```text
//! fieldCount,...                       ← 只取第一列
//! id,type,name,length,units,conversionId,module,moduleNum,linePosition,displayType,shortName[,description]
//! ...                                  ← 每个字段一行，共 fieldCount 行
//! ```
//!
//! 字节 layout 的 length 单位是字节、type 取 BYTE/INT/LONG；
//! 位 layout 的 length 单位是 bit，type 列只作展示。
//! 加载后不可变，整个进程生命周期内共享（`Arc<LayoutDescriptor>`）。

use std::path::Path;
use std::sync::Arc;
use crate::common::{ConversionId, Result, TelemError};
use crate::conversion::ConversionTable;
use crate::field_type::{FieldType, LayoutKind, MAX_BIT_WIDTH};

/// 位 layout 中值被强制为 0 的占位字段前缀
pub const PAD_PREFIX: &str = "pad";

const REQUIRED_COLUMNS: usize = 11;

// ── 字段定义 ──────────────────────────────────────────────────────────────────

/// 仅供显示层使用的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayMeta {
    pub module:        String,
    pub module_num:    i32,
    pub line_position: i32,
    pub display_type:  i32,
    pub short_name:    String,
    pub description:   Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name:       String,
    pub field_type: FieldType,
    /// 字节数或 bit 数，取决于 layout 类型
    pub length:     usize,
    pub units:      String,
    pub conversion: ConversionId,
    pub display:    DisplayMeta,
}

impl FieldDef {
    pub fn is_pad(&self) -> bool {
        self.name.is_empty() || self.name.starts_with(PAD_PREFIX)
    }
}

// ── LayoutDescriptor ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LayoutDescriptor {
    pub name:      String,
    pub kind:      LayoutKind,
    pub fields:    Vec<FieldDef>,
    payload_bytes: usize,
    total_bits:    usize,
    conversions:   Option<Arc<ConversionTable>>,
}

impl LayoutDescriptor {
    /// 从描述文件加载
    pub fn load(name: &str, path: impl AsRef<Path>, kind: LayoutKind) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TelemError::layout_load(path, format!("cannot read descriptor: {e}")))?;
        Self::parse(name, path, &text, kind)
    }

    /// 解析描述文件内容，`source` 只用于错误信息
    pub fn parse(name: &str, source: impl AsRef<Path>, text: &str, kind: LayoutKind) -> Result<Self> {
        let source = source.as_ref();
        let mut lines = text.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        let (_, header) = lines.next()
            .ok_or_else(|| TelemError::layout_load(source, "empty descriptor"))?;
        let declared: usize = header.split(',').next()
            .and_then(|t| t.trim().parse().ok())
            .ok_or_else(|| TelemError::layout_load(source, "header does not start with a field count"))?;

        let mut fields = Vec::with_capacity(declared);
        for (lineno, line) in lines {
            fields.push(parse_field(line, kind)
                .map_err(|detail| TelemError::layout_load(source, format!("line {}: {detail}", lineno + 1)))?);
        }

        if fields.len() != declared {
            return Err(TelemError::layout_load(source, format!(
                "expected {declared} fields, but loaded {}", fields.len())));
        }
        Ok(Self::from_fields(name, kind, fields))
    }

    /// 直接由字段列表构建（测试与程序化构造）
    pub fn from_fields(name: &str, kind: LayoutKind, fields: Vec<FieldDef>) -> Self {
        let total: usize = fields.iter().map(|f| f.length).sum();
        let (payload_bytes, total_bits) = match kind {
            LayoutKind::Bytes => (total, total * 8),
            LayoutKind::Bits  => (total.div_ceil(8), total),
        };
        Self {
            name: name.into(), kind, fields,
            payload_bytes, total_bits,
            conversions: None,
        }
    }

    pub fn with_conversions(mut self, table: Arc<ConversionTable>) -> Self {
        self.conversions = Some(table); self
    }

    pub fn conversions(&self) -> Option<&ConversionTable> { self.conversions.as_deref() }

    /// 原始帧的字节数（位 layout 向上取整）
    pub fn payload_size(&self) -> usize { self.payload_bytes }
    pub fn total_bits(&self) -> usize { self.total_bits }
    pub fn num_fields(&self) -> usize { self.fields.len() }

    // ── 按名查询（大小写不敏感，重名时取最后一个）────────────────────────────

    pub fn position_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().rposition(|f| f.name.eq_ignore_ascii_case(field))
    }

    pub fn has_field(&self, field: &str) -> bool { self.position_of(field).is_some() }

    pub fn field(&self, field: &str) -> Option<&FieldDef> {
        self.position_of(field).map(|i| &self.fields[i])
    }

    pub fn conversion_of(&self, field: &str) -> Option<ConversionId> {
        self.field(field).map(|f| f.conversion)
    }
    pub fn units_of(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.units.as_str())
    }
    pub fn short_name_of(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.display.short_name.as_str())
    }
    pub fn module_of(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.display.module.as_str())
    }
}

// ── 行解析 ────────────────────────────────────────────────────────────────────

fn parse_field(line: &str, kind: LayoutKind) -> std::result::Result<FieldDef, String> {
    // 与旧工具一致：空列被跳过
    let cols: Vec<&str> = line.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if cols.len() < REQUIRED_COLUMNS {
        return Err(format!("expected at least {REQUIRED_COLUMNS} columns, found {}", cols.len()));
    }

    let num = |idx: usize, what: &str| -> std::result::Result<i64, String> {
        cols[idx].parse::<i64>().map_err(|_| format!("{what} is not a number: {:?}", cols[idx]))
    };

    num(0, "field id")?;
    let length = usize::try_from(num(3, "length")?)
        .map_err(|_| format!("negative length {:?}", cols[3]))?;
    let conversion = usize::try_from(num(5, "conversion id")?)
        .map_err(|_| format!("negative conversion id {:?}", cols[5]))?;

    let field_type = match kind {
        LayoutKind::Bytes => FieldType::parse_byte_tag(cols[1])
            .ok_or_else(|| format!("unknown field type {:?}", cols[1]))?,
        LayoutKind::Bits => {
            let width = u32::try_from(length).ok()
                .filter(|w| (1..=MAX_BIT_WIDTH).contains(w))
                .ok_or_else(|| format!("bit width {length} outside 1..={MAX_BIT_WIDTH}"))?;
            FieldType::Bits(width)
        }
    };

    Ok(FieldDef {
        name: cols[2].into(),
        field_type,
        length,
        units: cols[4].into(),
        conversion,
        display: DisplayMeta {
            module:        cols[6].into(),
            module_num:    num(7, "module number")? as i32,
            line_position: num(8, "line position")? as i32,
            display_type:  num(9, "display type")? as i32,
            short_name:    cols[10].into(),
            description:   cols.get(11).map(|d| d.to_string()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BYTES: &str = "\
3,id,type,name
0,LONG,uptimeCopy,4,s,0,Computer,1,1,0,Uptime
1,INT,batteryV,2,V,1,Power,2,1,0,Batt V,Main bus voltage
2,BYTE,mode,1,-,0,Computer,1,2,0,Mode
";

    #[test]
    fn parses_byte_layout() {
        let l = LayoutDescriptor::parse("rt", "rt.csv", BYTES, LayoutKind::Bytes).unwrap();
        assert_eq!(l.num_fields(), 3);
        assert_eq!(l.payload_size(), 7);
        assert_eq!(l.fields[0].field_type, FieldType::Long);
        assert_eq!(l.fields[1].display.description.as_deref(), Some("Main bus voltage"));
        assert_eq!(l.position_of("BATTERYV"), Some(1));
        assert_eq!(l.units_of("batteryV"), Some("V"));
        assert_eq!(l.short_name_of("mode"), Some("Mode"));
    }

    #[test]
    fn field_count_mismatch_fails() {
        let text = BYTES.replacen("3,", "4,", 1);
        let err = LayoutDescriptor::parse("rt", "rt.csv", &text, LayoutKind::Bytes).unwrap_err();
        assert!(matches!(err, TelemError::LayoutLoad { .. }));
        assert!(err.to_string().contains("expected 4 fields, but loaded 3"));
    }

    #[test]
    fn missing_column_fails_with_line_number() {
        let text = "1\n0,INT,x,2,V,0,Power,1,1\n";
        let err = LayoutDescriptor::parse("rt", "rt.csv", text, LayoutKind::Bytes).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn unknown_type_tag_fails() {
        let text = "1\n0,DOUBLE,x,8,V,0,Power,1,1,0,X\n";
        assert!(LayoutDescriptor::parse("rt", "rt.csv", text, LayoutKind::Bytes).is_err());
    }

    #[test]
    fn bit_layout_rounds_payload_up() {
        let text = "3\n0,x,a,3,-,0,M,1,1,0,A\n1,x,pad1,2,-,0,M,1,2,0,P\n2,x,b,4,-,0,M,1,3,0,B\n";
        let l = LayoutDescriptor::parse("bits", "bits.csv", text, LayoutKind::Bits).unwrap();
        assert_eq!(l.total_bits(), 9);
        assert_eq!(l.payload_size(), 2);
        assert!(l.fields[1].is_pad());
        assert_eq!(l.fields[2].field_type, FieldType::Bits(4));
    }

    #[test]
    fn bit_width_must_fit_in_a_word() {
        for width in ["0", "33", "4294967297"] {
            let text = format!("1\n0,x,a,{width},-,0,M,1,1,0,A\n");
            let err = LayoutDescriptor::parse("bits", "bits.csv", &text, LayoutKind::Bits).unwrap_err();
            assert!(err.to_string().contains("bit width"), "{width}: {err}");
        }
        let text = "1\n0,x,a,32,-,0,M,1,1,0,A\n";
        assert!(LayoutDescriptor::parse("bits", "bits.csv", text, LayoutKind::Bits).is_ok());
    }

    #[test]
    fn missing_file_is_layout_error() {
        let err = LayoutDescriptor::load("x", "/nonexistent/layout.csv", LayoutKind::Bytes).unwrap_err();
        assert!(matches!(err, TelemError::LayoutLoad { .. }));
    }
}
