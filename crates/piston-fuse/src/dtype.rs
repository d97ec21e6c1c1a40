use std::fmt;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum DType {
    F32,
    F16,
    Fp8E4M3Fnuz,
    I8,
    U8,
    I32,
    I64,
    Bool,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::Fp8E4M3Fnuz => "fp8e4m3fnuz",
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::Bool => "bool",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::Fp8E4M3Fnuz)
    }

    pub fn is_fp8(&self) -> bool {
        matches!(self, DType::Fp8E4M3Fnuz)
    }

    pub fn is_int8(&self) -> bool {
        matches!(self, DType::I8 | DType::U8)
    }

    /// 8-bit types accepted by the quantized anchors.
    pub fn is_8bit(&self) -> bool {
        self.is_int8() || self.is_fp8()
    }

    /// Result type of a quantized dot or convolution over this input type.
    pub fn quant_accumulator(&self) -> Option<DType> {
        match self {
            DType::I8 | DType::U8 => Some(DType::I32),
            DType::Fp8E4M3Fnuz => Some(DType::F32),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantized_accumulators() {
        assert_eq!(DType::I8.quant_accumulator(), Some(DType::I32));
        assert_eq!(DType::Fp8E4M3Fnuz.quant_accumulator(), Some(DType::F32));
        assert_eq!(DType::F16.quant_accumulator(), None);
    }

    #[test_strategy::proptest]
    fn floats_are_never_int8(dtype: DType) {
        proptest::prop_assert!(!(dtype.is_float() && dtype.is_int8()));
    }
}
