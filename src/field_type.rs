//! Layout 字段的物理类型

/// 描述文件中 length 列的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutKind {
    /// 按字节对齐，length 单位为字节
    #[default]
    Bytes,
    /// 按位打包，length 单位为 bit
    Bits,
}

/// 字段的下行存储类型（加载 layout 时一次性解析）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 8 bit
    Byte,
    /// 16 bit
    Int,
    /// 声明为 long，但与 Int 之外的旧格式兼容，只读 4 字节
    Long,
    /// 位打包字段，宽度 1..=32
    Bits(u32),
}

/// 位字段最大宽度；解码值需放进 u32
pub const MAX_BIT_WIDTH: u32 = 32;

impl FieldType {
    /// 解析字节 layout 的 type 列（大小写不敏感）
    pub fn parse_byte_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "BYTE" => Some(Self::Byte),
            "INT"  => Some(Self::Int),
            "LONG" => Some(Self::Long),
            _      => None,
        }
    }

    /// 字节字段一次最多读取的字节数；位字段返回 None
    ///
    /// Long 仍然是 4 字节：超过 32 位的值会被截断，存量文件依赖这一点。
    pub fn max_bytes(self) -> Option<usize> {
        match self {
            Self::Byte    => Some(1),
            Self::Int     => Some(2),
            Self::Long    => Some(4),
            Self::Bits(_) => None,
        }
    }

    pub fn is_bits(self) -> bool { matches!(self, Self::Bits(_)) }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Byte    => "BYTE",
            Self::Int     => "INT",
            Self::Long    => "LONG",
            Self::Bits(_) => "BITS",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bits(w) => write!(f, "BITS({w})"),
            other         => write!(f, "{}", other.tag()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_tags_are_case_insensitive() {
        assert_eq!(FieldType::parse_byte_tag("long"), Some(FieldType::Long));
        assert_eq!(FieldType::parse_byte_tag(" Int "), Some(FieldType::Int));
        assert_eq!(FieldType::parse_byte_tag("float"), None);
    }

    #[test]
    fn long_is_capped_at_four_bytes() {
        assert_eq!(FieldType::Long.max_bytes(), Some(4));
        assert_eq!(FieldType::Bits(12).max_bytes(), None);
    }
}
