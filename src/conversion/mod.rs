//! 多项式转换表
//!
//! 每行：`fieldName,fieldName2,name,a,b,c,d,e,f,units,low,high[,description]`，
//! 读到以 [`TERMINATOR`] 开头的行为止（文件后面的注释忽略）。
//!
//! - **convert**：`a + b·x + c·x² + d·x³ + e·x⁴ + f·x⁵`
//! - **format**：convert 之后按 units 标签渲染成字符串
//!
//! 所有格式化都是无状态函数，不共享任何可变的格式器。

use std::path::Path;
use chrono::{TimeZone, Utc};
use crate::common::{ConversionId, Result, TelemError};

pub const TERMINATOR: &str = "NOTES:";

const REQUIRED_COLUMNS: usize = 12;
const DATE_FORMAT: &str = "%d %b %y %H:%M:%S";

// ── 状态名枚举 ────────────────────────────────────────────────────────────────

const ADCS_MODES: &[&str]       = &["standby", "detumble", "coarse-point", "fine-point"];
const SPACECRAFT_MODES: &[&str] = &["reset/power-up", "separation", "safe", "standby", "mission"];
const ADCS_STATES: &[&str]      = &["nadir", "sun", "velocity", "LLA", "moon"];
const RADIO_POWER_MODES: &[&str] = &[
    "OFF", "SLEEP", "", "", "", "STDBY", "", "FIFO", "SYNTHRX", "RX", "", "WOR", "SNTHTX", "TX",
];

// ── UnitTag ───────────────────────────────────────────────────────────────────

/// units 列决定的渲染方式（封闭集合，未知标签按两位小数渲染）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitTag {
    /// 截断为整数
    Counts,
    /// > 0 为 True
    Boolean,
    /// 毫秒时长 → HH:MM:SS
    Time,
    /// Unix 秒 → UTC 日期
    Date,
    /// 原始值的定宽十六进制（字节数）
    Hex(usize),
    /// 转换值的定宽二进制串（位数）
    BitString(u32),
    /// 最高位为符号位的原码
    SignedMagnitude8,
    SignedMagnitude16,
    /// 子系统状态码 → 名称
    States(&'static [&'static str]),
    /// 两位小数
    Numeric,
}

impl UnitTag {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "counts"            => Self::Counts,
            "boolean"           => Self::Boolean,
            "time"              => Self::Time,
            "date"              => Self::Date,
            "raw8"              => Self::Hex(8),
            "raw10"             => Self::Hex(10),
            "bit2"              => Self::BitString(2),
            "bit3"              => Self::BitString(3),
            "bit4"              => Self::BitString(4),
            "bit8"              => Self::BitString(8),
            "bit16"             => Self::BitString(16),
            "sint8"             => Self::SignedMagnitude8,
            "sint16"            => Self::SignedMagnitude16,
            "miradcsmode"       => Self::States(ADCS_MODES),
            "mirspacecraftmode" => Self::States(SPACECRAFT_MODES),
            "miradcsstate"      => Self::States(ADCS_STATES),
            "ax5043_pwrmode"    => Self::States(RADIO_POWER_MODES),
            _                   => Self::Numeric,
        }
    }
}

// ── ConversionEntry ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionEntry {
    pub field_name:  String,
    pub field_name2: String,
    pub name:        String,
    /// a..f
    pub coeffs:      [f64; 6],
    /// 文件中的原始 units 字符串（显示用）
    pub units:       String,
    pub unit:        UnitTag,
    pub low:         i64,
    pub high:        i64,
    pub description: Option<String>,
}

impl ConversionEntry {
    pub fn evaluate(&self, x: i64) -> f64 {
        let x = x as f64;
        let [a, b, c, d, e, f] = self.coeffs;
        a + b * x + c * x.powi(2) + d * x.powi(3) + e * x.powi(4) + f * x.powi(5)
    }
}

// ── ConversionTable ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ConversionTable {
    entries: Vec<ConversionEntry>,
}

impl ConversionTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TelemError::layout_load(path, format!("cannot read conversion table: {e}")))?;
        Self::parse(path, &text)
    }

    pub fn parse(source: impl AsRef<Path>, text: &str) -> Result<Self> {
        let source = source.as_ref();
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.starts_with(TERMINATOR) {
                return Ok(Self { entries });
            }
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_entry(line)
                .map_err(|detail| TelemError::layout_load(source, format!("line {}: {detail}", lineno + 1)))?);
        }
        Err(TelemError::layout_load(source, format!("no {TERMINATOR} line marking the end of the table")))
    }

    pub fn from_entries(entries: Vec<ConversionEntry>) -> Self { Self { entries } }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn entry(&self, id: ConversionId) -> Result<&ConversionEntry> {
        self.entries.get(id).ok_or(TelemError::InvalidConversion { id, count: self.entries.len() })
    }

    pub fn units(&self, id: ConversionId) -> Result<&str> {
        self.entry(id).map(|e| e.units.as_str())
    }

    /// 原始整数 → 工程值
    pub fn convert(&self, id: ConversionId, raw: i64) -> Result<f64> {
        Ok(self.entry(id)?.evaluate(raw))
    }

    /// 原始整数 → 按 units 标签渲染的字符串
    pub fn format(&self, id: ConversionId, raw: i64) -> Result<String> {
        let entry = self.entry(id)?;
        let val   = entry.evaluate(raw);
        let s = match entry.unit {
            UnitTag::Counts          => format!("{}", val.trunc() as i64),
            UnitTag::Boolean         => if val > 0.0 { "True".into() } else { "False".into() },
            UnitTag::Time            => millis_to_hms(val),
            UnitTag::Date            => Utc.timestamp_opt(val as i64, 0)
                .single()
                .map(|dt| dt.format(DATE_FORMAT).to_string())
                .unwrap_or_else(|| format!("{val:.2}")),
            UnitTag::Hex(n)          => to_byte_string(raw, n),
            UnitTag::BitString(n)    => to_bit_string(val as i64, n),
            UnitTag::SignedMagnitude8  => format!("{:.2}", entry.evaluate(signed_magnitude(raw, 8))),
            UnitTag::SignedMagnitude16 => format!("{:.2}", entry.evaluate(signed_magnitude(raw, 16))),
            UnitTag::States(labels)  => usize::try_from(raw).ok()
                .and_then(|i| labels.get(i))
                .map(|l| l.to_string())
                .unwrap_or_else(|| raw.to_string()),
            UnitTag::Numeric         => format!("{val:.2}"),
        };
        Ok(s)
    }
}

fn parse_entry(line: &str) -> std::result::Result<ConversionEntry, String> {
    let cols: Vec<&str> = line.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if cols.len() < REQUIRED_COLUMNS {
        return Err(format!("expected at least {REQUIRED_COLUMNS} columns, found {}", cols.len()));
    }
    let mut coeffs = [0f64; 6];
    for (i, c) in coeffs.iter_mut().enumerate() {
        *c = cols[3 + i].parse()
            .map_err(|_| format!("coefficient {} is not a number: {:?}", i, cols[3 + i]))?;
    }
    let int = |idx: usize| -> std::result::Result<i64, String> {
        cols[idx].parse().map_err(|_| format!("limit is not an integer: {:?}", cols[idx]))
    };
    Ok(ConversionEntry {
        field_name:  cols[0].into(),
        field_name2: cols[1].into(),
        name:        cols[2].into(),
        coeffs,
        units:       cols[9].into(),
        unit:        UnitTag::parse(cols[9]),
        low:         int(10)?,
        high:        int(11)?,
        description: cols.get(12).map(|d| d.to_string()),
    })
}

// ── 渲染辅助 ──────────────────────────────────────────────────────────────────

/// 超出 i64 毫秒范围的值按两位小数渲染
fn millis_to_hms(val: f64) -> String {
    if !val.is_finite() || val.abs() >= i64::MAX as f64 {
        return format!("{val:.2}");
    }
    let ms  = val as i64;
    let h   = ms / 3_600_000;
    let m   = ms % 3_600_000 / 60_000;
    let sec = ms % 60_000 / 1000;
    format!("{h:02}:{m:02}:{sec:02}")
}

/// 低字节在右，共 `len` 字节
fn to_byte_string(mut value: i64, len: usize) -> String {
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        bytes.push(format!("{:02x}", value & 0xff));
        value >>= 8;
    }
    bytes.reverse();
    bytes.concat()
}

/// 最高位在左，共 `len` 位
fn to_bit_string(word: i64, len: u32) -> String {
    (0..len).rev()
        .map(|i| if (word >> i) & 1 == 1 { '1' } else { '0' })
        .collect()
}

fn signed_magnitude(raw: i64, bits: u32) -> i64 {
    let sign_bit  = 1i64 << (bits - 1);
    let magnitude = raw & (sign_bit - 1);
    if raw & sign_bit != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
NONE,NONE,None,0,1,0,0,0,0,-,0,0
BATT,BATT,Battery,1.5,0.5,0,0,0,0,V,0,100,Battery volts
FLAG,FLAG,Flag,0,1,0,0,0,0,Boolean,0,1
CNT,CNT,Count,0,0.5,0,0,0,0,Counts,0,10
T,T,Time,0,1,0,0,0,0,Time,0,0
D,D,Date,0,1,0,0,0,0,Date,0,0
R,R,Raw,0,1,0,0,0,0,Raw8,0,0
B,B,Bits,0,1,0,0,0,0,Bit4,0,0
S,S,Signed,0,1,0,0,0,0,Sint8,0,0
M,M,Mode,0,1,0,0,0,0,MirADCSMode,0,0
Q,Q,Square,0,0,1,0,0,0,-,0,0
BIG,BIG,Quintic,0,0,0,0,0,1,Time,0,0
NOTES:
anything below here, is, ignored
";

    fn table() -> ConversionTable { ConversionTable::parse("coef.csv", TABLE).unwrap() }

    #[test]
    fn stops_at_terminator() {
        let t = table();
        assert_eq!(t.len(), 12);
        assert_eq!(t.entry(1).unwrap().description.as_deref(), Some("Battery volts"));
    }

    #[test]
    fn missing_terminator_is_layout_error() {
        let err = ConversionTable::parse("coef.csv", "A,A,A,0,1,0,0,0,0,-,0,0\n").unwrap_err();
        assert!(matches!(err, TelemError::LayoutLoad { .. }));
    }

    #[test]
    fn polynomial_evaluation() {
        let t = table();
        assert_eq!(t.convert(1, 10).unwrap(), 6.5);
        assert_eq!(t.convert(10, -3).unwrap(), 9.0);
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        let err = table().convert(12, 0).unwrap_err();
        assert!(matches!(err, TelemError::InvalidConversion { id: 12, count: 12 }));
    }

    #[test]
    fn boolean_and_counts() {
        let t = table();
        assert_eq!(t.format(2, 1).unwrap(), "True");
        assert_eq!(t.format(2, 0).unwrap(), "False");
        assert_eq!(t.format(3, 7).unwrap(), "3");
    }

    #[test]
    fn default_is_two_decimals() {
        assert_eq!(table().format(1, 3).unwrap(), "3.00");
    }

    #[test]
    fn time_and_date() {
        let t = table();
        assert_eq!(t.format(4, 3_661_000).unwrap(), "01:01:01");
        assert_eq!(t.format(5, 0).unwrap(), "01 Jan 70 00:00:00");
    }

    #[test]
    fn time_beyond_i64_falls_back_to_numeric() {
        let t = table();
        let x = 0xffff_ffffu32 as f64;
        assert_eq!(t.format(11, 0xffff_ffff).unwrap(), format!("{:.2}", x.powi(5)));
        assert_eq!(t.format(11, 10).unwrap(), "00:01:40");
    }

    #[test]
    fn hex_and_bit_strings() {
        let t = table();
        assert_eq!(t.format(6, 0x0102).unwrap(), "0000000000000102");
        assert_eq!(t.format(7, 5).unwrap(), "0101");
    }

    #[test]
    fn signed_magnitude_negates() {
        let t = table();
        assert_eq!(t.format(8, 0x85).unwrap(), "-5.00");
        assert_eq!(t.format(8, 0x05).unwrap(), "5.00");
    }

    #[test]
    fn state_labels() {
        let t = table();
        assert_eq!(t.format(9, 2).unwrap(), "coarse-point");
        assert_eq!(t.format(9, 9).unwrap(), "9");
    }
}
