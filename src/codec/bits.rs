//! 位打包帧的展开与提取
//!
//! 两种约定不能互换，由航天器决定：
//! - **LittleEndian**：字节 k 的第 i 位放到 `k*8+i`（低位在前），字段内低位在前
//! - **BigEndian**：字节 k 的第 i 位放到 `k*8+(7-i)`（高位在前），字段内高位在前
//!
//! 两种模式下字段内的位序正好抵消展开规则，同一线格式在各自模式下解出同一个整数。

/// 位展开规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

// ── BitReader ─────────────────────────────────────────────────────────────────

pub struct BitReader {
    bits:  Vec<bool>,
    pos:   usize,
    order: BitOrder,
}

impl BitReader {
    /// 只展开覆盖 `nbits` 所需的字节，多余字节忽略
    pub fn new(data: &[u8], nbits: usize, order: BitOrder) -> Self {
        let nbytes = nbits.div_ceil(8).min(data.len());
        let mut bits = Vec::with_capacity(nbytes * 8);
        for &b in &data[..nbytes] {
            for i in 0..8 {
                let bit = match order {
                    BitOrder::LittleEndian => (b >> i) & 1,
                    BitOrder::BigEndian    => (b >> (7 - i)) & 1,
                };
                bits.push(bit == 1);
            }
        }
        Self { bits, pos: 0, order }
    }

    pub fn remaining(&self) -> usize { self.bits.len().saturating_sub(self.pos) }

    /// 读取接下来 `n` 位（n ≤ 64）；越界部分按 0 处理
    pub fn next_bits(&mut self, n: usize) -> u64 {
        let mut value = 0u64;
        for i in 0..n {
            let bit = self.bits.get(self.pos + i).copied().unwrap_or(false) as u64;
            value |= match self.order {
                BitOrder::LittleEndian => bit << i,
                BitOrder::BigEndian    => bit << (n - 1 - i),
            };
        }
        self.pos += n;
        value
    }
}

// ── BitWriter ─────────────────────────────────────────────────────────────────

/// BitReader 的逆过程
pub struct BitWriter {
    bits:  Vec<bool>,
    order: BitOrder,
}

impl BitWriter {
    pub fn new(order: BitOrder) -> Self { Self { bits: Vec::new(), order } }

    pub fn push(&mut self, value: u64, n: usize) {
        for i in 0..n {
            let shift = match self.order {
                BitOrder::LittleEndian => i,
                BitOrder::BigEndian    => n - 1 - i,
            };
            self.bits.push((value >> shift) & 1 == 1);
        }
    }

    /// 按展开规则收拢成字节，末字节不足部分补 0
    pub fn finish(self) -> Vec<u8> {
        self.bits.chunks(8)
            .map(|chunk| {
                chunk.iter().enumerate().fold(0u8, |acc, (j, &bit)| {
                    let shift = match self.order {
                        BitOrder::LittleEndian => j,
                        BitOrder::BigEndian    => 7 - j,
                    };
                    acc | ((bit as u8) << shift)
                })
            })
            .collect()
    }
}
