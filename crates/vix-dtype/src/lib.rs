#![forbid(unsafe_code)]

use std::fmt;
use std::ops::Range;

use half::f16;
use thiserror::Error;

pub const FP16_EXTENSION: &str = "cl_khr_fp16";
pub const FP64_EXTENSION: &str = "cl_khr_fp64";

/// Vector widths a device vector type may take in the insert family.
pub const SUPPORTED_WIDTHS: [usize; 4] = [2, 4, 8, 16];

pub const KERNEL_NAME_PREFIX: &str = "vector_";
pub const KERNEL_NAME_SUFFIX: &str = "_insert";

pub const DTYPE_REASON_CODES: [&str; 3] = [
    "dtype_vector_width_unsupported",
    "dtype_kernel_name_invalid",
    "dtype_lane_bytes_misaligned",
];

/// Device scalar types exercised by the vector insert family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Char,
    Int,
    Long,
    Half,
    Float,
    Double,
}

impl ScalarKind {
    pub const ALL: [Self; 6] = [
        Self::Char,
        Self::Int,
        Self::Long,
        Self::Half,
        Self::Float,
        Self::Double,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::Int => "int",
            Self::Long => "long",
            Self::Half => "half",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    #[must_use]
    pub const fn item_size(self) -> usize {
        match self {
            Self::Char => 1,
            Self::Half => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "i8" => Some(Self::Char),
            "int" | "i32" => Some(Self::Int),
            "long" | "i64" => Some(Self::Long),
            "half" | "f16" => Some(Self::Half),
            "float" | "f32" => Some(Self::Float),
            "double" | "f64" => Some(Self::Double),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Half | Self::Float | Self::Double)
    }

    /// Optional device extension the scalar type depends on, if any.
    #[must_use]
    pub const fn required_extension(self) -> Option<&'static str> {
        match self {
            Self::Half => Some(FP16_EXTENSION),
            Self::Double => Some(FP64_EXTENSION),
            Self::Char | Self::Int | Self::Long | Self::Float => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("vector width {0} is not one of 2, 4, 8, 16")]
    UnsupportedWidth(usize),
    #[error("kernel name `{0}` does not follow vector_<type><width>_insert")]
    KernelNameInvalid(String),
    #[error("byte length {len} is not a multiple of lane size {item_size}")]
    MisalignedBytes { len: usize, item_size: usize },
}

impl ShapeError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::UnsupportedWidth(_) => "dtype_vector_width_unsupported",
            Self::KernelNameInvalid(_) => "dtype_kernel_name_invalid",
            Self::MisalignedBytes { .. } => "dtype_lane_bytes_misaligned",
        }
    }
}

/// A (scalar kind, width) pair naming one device vector type such as `int4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorShape {
    kind: ScalarKind,
    width: usize,
}

impl VectorShape {
    pub fn new(kind: ScalarKind, width: usize) -> Result<Self, ShapeError> {
        if SUPPORTED_WIDTHS.contains(&width) {
            Ok(Self { kind, width })
        } else {
            Err(ShapeError::UnsupportedWidth(width))
        }
    }

    #[must_use]
    pub const fn kind(self) -> ScalarKind {
        self.kind
    }

    #[must_use]
    pub const fn width(self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn vector_bytes(self) -> usize {
        self.kind.item_size() * self.width
    }

    /// Every insertion index of the shape, ascending.
    #[must_use]
    pub const fn lane_indices(self) -> Range<usize> {
        0..self.width
    }

    #[must_use]
    pub fn kernel_name(self) -> String {
        format!("{KERNEL_NAME_PREFIX}{self}{KERNEL_NAME_SUFFIX}")
    }

    pub fn parse_kernel_name(name: &str) -> Result<Self, ShapeError> {
        let invalid = || ShapeError::KernelNameInvalid(name.to_string());
        let body = name
            .strip_prefix(KERNEL_NAME_PREFIX)
            .and_then(|rest| rest.strip_suffix(KERNEL_NAME_SUFFIX))
            .ok_or_else(invalid)?;
        let split = body
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (type_name, width_digits) = body.split_at(split);
        let kind = ScalarKind::parse(type_name).ok_or_else(invalid)?;
        let width = width_digits.parse::<usize>().map_err(|_| invalid())?;
        Self::new(kind, width)
    }
}

impl fmt::Display for VectorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.name(), self.width)
    }
}

/// The six registered instantiations, in registration order.
pub const INSERT_CASES: [VectorShape; 6] = [
    VectorShape {
        kind: ScalarKind::Half,
        width: 8,
    },
    VectorShape {
        kind: ScalarKind::Int,
        width: 4,
    },
    VectorShape {
        kind: ScalarKind::Float,
        width: 4,
    },
    VectorShape {
        kind: ScalarKind::Long,
        width: 2,
    },
    VectorShape {
        kind: ScalarKind::Double,
        width: 2,
    },
    VectorShape {
        kind: ScalarKind::Char,
        width: 16,
    },
];

#[must_use]
pub fn find_insert_case(kernel_name: &str) -> Option<VectorShape> {
    INSERT_CASES
        .iter()
        .copied()
        .find(|shape| shape.kernel_name() == kernel_name)
}

/// Half-open magnitude bound for random f32/f64 draws.
pub const FLOAT_DRAW_SPAN: f64 = 1024.0;
/// Half-open magnitude bound for random f16 draws; keeps input + delta finite.
pub const HALF_DRAW_SPAN: f64 = 64.0;

fn unit_interval(raw: u64) -> f64 {
    (raw >> 11) as f64 / (1u64 << 53) as f64
}

fn signed_span(raw: u64, span: f64) -> f64 {
    (unit_interval(raw) * 2.0 - 1.0) * span
}

/// One scalar lane of a device vector.
///
/// Comparison is on the bit pattern: the insert operation moves data and
/// never computes, so a lane is correct only when its bits survive intact.
pub trait Lane: Copy + fmt::Debug + Send + Sync + 'static {
    const KIND: ScalarKind;

    /// Maps one raw 64-bit generator output onto a lane value.
    fn from_draw(raw: u64) -> Self;

    /// `self + delta` with the type's own arithmetic (wrapping for integers).
    #[must_use]
    fn offset(self, delta: Self) -> Self;

    fn bits(self) -> u64;

    fn write_le(self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;

    fn exact_eq(self, other: Self) -> bool {
        self.bits() == other.bits()
    }

    fn render(self) -> String;
}

macro_rules! integer_lane {
    ($ty:ty, $kind:expr) => {
        impl Lane for $ty {
            const KIND: ScalarKind = $kind;

            fn from_draw(raw: u64) -> Self {
                raw as $ty
            }

            fn offset(self, delta: Self) -> Self {
                self.wrapping_add(delta)
            }

            fn bits(self) -> u64 {
                u64::from_le_bytes({
                    let mut wide = [0u8; 8];
                    wide[..size_of::<$ty>()].copy_from_slice(&self.to_le_bytes());
                    wide
                })
            }

            fn write_le(self, out: &mut [u8]) {
                out[..size_of::<$ty>()].copy_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..size_of::<$ty>()]);
                <$ty>::from_le_bytes(buf)
            }

            fn render(self) -> String {
                self.to_string()
            }
        }
    };
}

integer_lane!(i8, ScalarKind::Char);
integer_lane!(i32, ScalarKind::Int);
integer_lane!(i64, ScalarKind::Long);

impl Lane for f16 {
    const KIND: ScalarKind = ScalarKind::Half;

    fn from_draw(raw: u64) -> Self {
        f16::from_f64(signed_span(raw, HALF_DRAW_SPAN))
    }

    fn offset(self, delta: Self) -> Self {
        f16::from_f32(self.to_f32() + delta.to_f32())
    }

    fn bits(self) -> u64 {
        u64::from(self.to_bits())
    }

    fn write_le(self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn render(self) -> String {
        format!("{} (0x{:04x})", self, self.to_bits())
    }
}

impl Lane for f32 {
    const KIND: ScalarKind = ScalarKind::Float;

    fn from_draw(raw: u64) -> Self {
        signed_span(raw, FLOAT_DRAW_SPAN) as f32
    }

    fn offset(self, delta: Self) -> Self {
        self + delta
    }

    fn bits(self) -> u64 {
        u64::from(self.to_bits())
    }

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[..4]);
        f32::from_le_bytes(buf)
    }

    fn render(self) -> String {
        format!("{self:?} (0x{:08x})", self.to_bits())
    }
}

impl Lane for f64 {
    const KIND: ScalarKind = ScalarKind::Double;

    fn from_draw(raw: u64) -> Self {
        signed_span(raw, FLOAT_DRAW_SPAN)
    }

    fn offset(self, delta: Self) -> Self {
        self + delta
    }

    fn bits(self) -> u64 {
        self.to_bits()
    }

    fn write_le(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(buf)
    }

    fn render(self) -> String {
        format!("{self:?} (0x{:016x})", self.to_bits())
    }
}

/// Little-endian byte image of a lane slice, as the device stores it.
#[must_use]
pub fn encode_lanes<T: Lane>(lanes: &[T]) -> Vec<u8> {
    let item_size = T::KIND.item_size();
    let mut bytes = vec![0u8; lanes.len() * item_size];
    for (lane, chunk) in lanes.iter().zip(bytes.chunks_exact_mut(item_size)) {
        lane.write_le(chunk);
    }
    bytes
}

pub fn decode_lanes<T: Lane>(bytes: &[u8]) -> Result<Vec<T>, ShapeError> {
    let item_size = T::KIND.item_size();
    if bytes.len() % item_size != 0 {
        return Err(ShapeError::MisalignedBytes {
            len: bytes.len(),
            item_size,
        });
    }
    Ok(bytes.chunks_exact(item_size).map(T::read_le).collect())
}

/// Decodes into an existing lane buffer; `bytes` must cover it exactly.
pub fn decode_lanes_into<T: Lane>(bytes: &[u8], out: &mut [T]) -> Result<(), ShapeError> {
    let item_size = T::KIND.item_size();
    if bytes.len() != out.len() * item_size {
        return Err(ShapeError::MisalignedBytes {
            len: bytes.len(),
            item_size,
        });
    }
    for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(item_size)) {
        *slot = T::read_le(chunk);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        DTYPE_REASON_CODES, FLOAT_DRAW_SPAN, HALF_DRAW_SPAN, INSERT_CASES, Lane, ScalarKind,
        ShapeError, VectorShape, decode_lanes, decode_lanes_into, encode_lanes, find_insert_case,
    };
    use half::f16;
    use proptest::prelude::*;

    #[test]
    fn insert_cases_match_registration_order() {
        let names: Vec<String> = INSERT_CASES.iter().map(|s| s.kernel_name()).collect();
        assert_eq!(
            names,
            [
                "vector_half8_insert",
                "vector_int4_insert",
                "vector_float4_insert",
                "vector_long2_insert",
                "vector_double2_insert",
                "vector_char16_insert",
            ]
        );
    }

    #[test]
    fn kernel_names_parse_back_to_their_shape() {
        for shape in INSERT_CASES {
            assert_eq!(
                VectorShape::parse_kernel_name(&shape.kernel_name()),
                Ok(shape)
            );
            assert_eq!(find_insert_case(&shape.kernel_name()), Some(shape));
        }
    }

    #[test]
    fn malformed_kernel_names_are_rejected() {
        for bad in [
            "vector_int4",
            "int4_insert",
            "vector_insert",
            "vector_quad4_insert",
            "vector_int_insert",
            "vector_intx_insert",
        ] {
            let err = VectorShape::parse_kernel_name(bad).expect_err(bad);
            assert_eq!(err.reason_code(), "dtype_kernel_name_invalid", "{bad}");
        }
        assert_eq!(
            VectorShape::parse_kernel_name("vector_int3_insert"),
            Err(ShapeError::UnsupportedWidth(3))
        );
    }

    #[test]
    fn widths_outside_the_supported_set_are_rejected() {
        for width in [0, 1, 3, 5, 32] {
            assert_eq!(
                VectorShape::new(ScalarKind::Int, width),
                Err(ShapeError::UnsupportedWidth(width))
            );
        }
        let shape = VectorShape::new(ScalarKind::Long, 2).expect("long2");
        assert_eq!(shape.lane_indices(), 0..2);
        assert_eq!(shape.vector_bytes(), 16);
    }

    #[test]
    fn only_half_and_double_need_extensions() {
        assert_eq!(ScalarKind::Half.required_extension(), Some("cl_khr_fp16"));
        assert_eq!(ScalarKind::Double.required_extension(), Some("cl_khr_fp64"));
        for kind in [
            ScalarKind::Char,
            ScalarKind::Int,
            ScalarKind::Long,
            ScalarKind::Float,
        ] {
            assert_eq!(kind.required_extension(), None, "{kind}");
        }
    }

    #[test]
    fn item_sizes_match_host_types() {
        assert_eq!(ScalarKind::Char.item_size(), size_of::<i8>());
        assert_eq!(ScalarKind::Int.item_size(), size_of::<i32>());
        assert_eq!(ScalarKind::Long.item_size(), size_of::<i64>());
        assert_eq!(ScalarKind::Half.item_size(), size_of::<f16>());
        assert_eq!(ScalarKind::Float.item_size(), size_of::<f32>());
        assert_eq!(ScalarKind::Double.item_size(), size_of::<f64>());
        for kind in ScalarKind::ALL {
            assert_eq!(ScalarKind::parse(kind.name()), Some(kind));
        }
    }

    #[test]
    fn integer_offsets_wrap() {
        assert_eq!(127i8.offset(1), -128);
        assert_eq!(i32::MAX.offset(1), i32::MIN);
        assert_eq!(i64::MIN.offset(-1), i64::MAX);
        assert_eq!(<i8 as Lane>::from_draw(0x1FF), -1);
    }

    #[test]
    fn exact_eq_compares_bit_patterns() {
        assert!(!0.0f32.exact_eq(-0.0));
        assert!(f64::NAN.exact_eq(f64::NAN));
        assert!(!f16::from_f32(1.0).exact_eq(f16::from_f32(1.0009766)));
        assert!((-3i32).exact_eq(-3));
    }

    #[test]
    fn lanes_survive_the_device_byte_image() {
        let lanes = [f16::from_f32(1.5), f16::from_f32(-2.25), f16::NAN];
        let bytes = encode_lanes(&lanes);
        assert_eq!(bytes.len(), 6);
        let back: Vec<f16> = decode_lanes(&bytes).expect("aligned");
        assert!(lanes.iter().zip(&back).all(|(a, b)| a.exact_eq(*b)));

        let mut reused = [0i64; 2];
        decode_lanes_into(&encode_lanes(&[7i64, -9]), &mut reused).expect("exact cover");
        assert_eq!(reused, [7, -9]);
    }

    #[test]
    fn misaligned_byte_images_are_rejected() {
        let err = decode_lanes::<i32>(&[0u8; 6]).expect_err("misaligned");
        assert_eq!(
            err,
            ShapeError::MisalignedBytes {
                len: 6,
                item_size: 4
            }
        );
        assert!(DTYPE_REASON_CODES.contains(&err.reason_code()));
        let mut short = [0.0f64; 2];
        assert!(decode_lanes_into(&[0u8; 8], &mut short).is_err());
    }

    proptest! {
        #[test]
        fn float_draws_stay_inside_their_span(raw in any::<u64>()) {
            let single = <f32 as Lane>::from_draw(raw);
            prop_assert!(single.is_finite());
            prop_assert!(f64::from(single).abs() <= FLOAT_DRAW_SPAN);

            let double = <f64 as Lane>::from_draw(raw);
            prop_assert!((-FLOAT_DRAW_SPAN..FLOAT_DRAW_SPAN).contains(&double));

            let narrow = <f16 as Lane>::from_draw(raw);
            prop_assert!(narrow.is_finite());
            prop_assert!(f64::from(narrow.to_f32()).abs() <= HALF_DRAW_SPAN);
        }

        #[test]
        fn half_offsets_of_two_draws_stay_finite(a in any::<u64>(), b in any::<u64>()) {
            let sum = <f16 as Lane>::from_draw(a).offset(<f16 as Lane>::from_draw(b));
            prop_assert!(sum.is_finite());
        }
    }
}
