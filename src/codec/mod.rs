//! 遥测帧编解码
//!
//! 两个方向：
//! - **帧 ↔ Record**：按 layout 把下行原始字节解成各字段整数（字节对齐或位打包）
//! - **Record ↔ 文本行**：持久化格式 `id,resets,uptime,type,v0,…,vN`，
//!   读取时每个值可以是十进制或 `0x` 前缀十六进制
//!
//! 字节字段一律按无符号小端读取：`sum(byte[i] << 8*i)`。

pub mod bits;

use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};
use crate::common::{RecordKey, Result, SpacecraftId, TelemError};
use crate::field_type::LayoutKind;
use crate::layout::{FieldDef, LayoutDescriptor};
use crate::record::Record;

pub use bits::{BitOrder, BitReader, BitWriter};

/// 行首固定列：id, resets, uptime, type
pub const HEADER_COLUMNS: usize = 4;

/// 每个实例持有自己的位序配置，编解码本身无状态
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec {
    bit_order: BitOrder,
}

impl RecordCodec {
    pub fn new(bit_order: BitOrder) -> Self { Self { bit_order } }

    pub fn bit_order(&self) -> BitOrder { self.bit_order }

    // ── 原始帧 → Record ───────────────────────────────────────────────────────

    pub fn decode(
        &self,
        layout: &Arc<LayoutDescriptor>,
        id:     SpacecraftId,
        key:    RecordKey,
        raw:    &[u8],
    ) -> Result<Record> {
        let need = layout.payload_size();
        if raw.len() < need {
            return Err(TelemError::DataLoad(format!(
                "{} frame too short: need {need} bytes, got {}", layout.name, raw.len())));
        }

        let values: Vec<i64> = match layout.kind {
            LayoutKind::Bytes => {
                let mut offset = 0usize;
                layout.fields.iter().map(|f| {
                    let n = byte_width(f);
                    let v = if n == 0 { 0 } else { LittleEndian::read_uint(&raw[offset..], n) };
                    offset += f.length;
                    v as i64
                }).collect()
            }
            LayoutKind::Bits => {
                let mut reader = BitReader::new(raw, layout.total_bits(), self.bit_order);
                layout.fields.iter().map(|f| {
                    let v = reader.next_bits(f.length);
                    if f.is_pad() { 0 } else { v as i64 }
                }).collect()
            }
        };
        Ok(Record::new(layout.clone(), id, key, values))
    }

    // ── Record → 原始帧 ───────────────────────────────────────────────────────

    /// decode 的逆过程；超出字段宽度的高位被截掉
    pub fn encode_frame(&self, record: &Record) -> Vec<u8> {
        let layout = &record.layout;
        match layout.kind {
            LayoutKind::Bytes => {
                let mut buf = vec![0u8; layout.payload_size()];
                let mut offset = 0usize;
                for (f, &v) in layout.fields.iter().zip(&record.values) {
                    let n = byte_width(f);
                    if n > 0 {
                        LittleEndian::write_uint(&mut buf[offset..offset + n], mask(v as u64, n * 8), n);
                    }
                    offset += f.length;
                }
                buf
            }
            LayoutKind::Bits => {
                let mut writer = BitWriter::new(self.bit_order);
                for (f, &v) in layout.fields.iter().zip(&record.values) {
                    let v = if f.is_pad() { 0 } else { mask(v as u64, f.length) };
                    writer.push(v, f.length);
                }
                let mut buf = writer.finish();
                buf.resize(layout.payload_size(), 0);
                buf
            }
        }
    }

    // ── Record ↔ 文本行 ───────────────────────────────────────────────────────

    pub fn encode(record: &Record) -> String {
        let k = &record.key;
        let mut line = format!("{},{},{},{}", record.id, k.resets, k.uptime, k.record_type);
        for v in &record.values {
            line.push(',');
            line.push_str(&v.to_string());
        }
        line
    }

    /// 解析一行持久化数据；缺少的尾部值补 0，多出的值、空列、非数字或超出
    /// 键类型范围的值报 DataLoad
    pub fn parse_line(layout: &Arc<LayoutDescriptor>, line: &str) -> Result<Record> {
        let mut tokens = line.trim_end_matches(['\r', '\n'])
            .split(',')
            .map(str::trim);

        let mut header = [0i64; HEADER_COLUMNS];
        for (i, slot) in header.iter_mut().enumerate() {
            let tok = tokens.next().ok_or_else(|| TelemError::DataLoad(format!(
                "{}: line ends after {i} header columns: {line:?}", layout.name)))?;
            *slot = parse_value(tok).map_err(|e| TelemError::DataLoad(format!(
                "{}: bad header column {i}: {e}", layout.name)))?;
        }
        let [id, resets, uptime, record_type] = header;
        let out_of_range = |what: &str, v: i64| TelemError::DataLoad(format!(
            "{}: {what} {v} out of range: {line:?}", layout.name));
        let id = u32::try_from(id).map_err(|_| out_of_range("id", id))?;
        let key = RecordKey::new(
            i32::try_from(resets).map_err(|_| out_of_range("resets", resets))?,
            uptime,
            i32::try_from(record_type).map_err(|_| out_of_range("type", record_type))?,
        );

        let mut values = Vec::with_capacity(layout.num_fields());
        for tok in tokens {
            if values.len() == layout.num_fields() {
                return Err(TelemError::DataLoad(format!(
                    "{}: too many fields at {key}, layout has {}", layout.name, layout.num_fields())));
            }
            values.push(parse_value(tok).map_err(|e| TelemError::DataLoad(format!(
                "{}: field {} at {key}: {e}", layout.name, values.len())))?);
        }
        Ok(Record::new(layout.clone(), id, key, values))
    }
}

fn byte_width(f: &FieldDef) -> usize {
    f.field_type.max_bytes().unwrap_or(4).min(f.length)
}

fn mask(v: u64, bits: usize) -> u64 {
    if bits >= 64 { v } else { v & ((1u64 << bits) - 1) }
}

fn parse_value(tok: &str) -> std::result::Result<i64, String> {
    let parsed = match tok.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None      => tok.parse::<i64>(),
    };
    parsed.map_err(|e| format!("{tok:?}: {e}"))
}
