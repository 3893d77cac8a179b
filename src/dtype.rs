//! Element types and runtime dtype visitation.

use crate::error::Error;
use crate::storage::Storage;
use ndarray::ArrayD;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum Dtype {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Float32,
    Float64,
}

/// Coarse classification of a dtype, used by argument validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtypeKind {
    Bool,
    Int,
    UInt,
    Float,
}

impl Dtype {
    pub const ALL: [Dtype; 8] = [
        Dtype::Bool,
        Dtype::Int8,
        Dtype::Int16,
        Dtype::Int32,
        Dtype::Int64,
        Dtype::UInt8,
        Dtype::Float32,
        Dtype::Float64,
    ];

    pub fn kind(&self) -> DtypeKind {
        match self {
            Dtype::Bool => DtypeKind::Bool,
            Dtype::Int8 | Dtype::Int16 | Dtype::Int32 | Dtype::Int64 => DtypeKind::Int,
            Dtype::UInt8 => DtypeKind::UInt,
            Dtype::Float32 | Dtype::Float64 => DtypeKind::Float,
        }
    }

    /// Size of one element in bytes.
    pub fn item_size(&self) -> usize {
        match self {
            Dtype::Bool | Dtype::Int8 | Dtype::UInt8 => 1,
            Dtype::Int16 => 2,
            Dtype::Int32 | Dtype::Float32 => 4,
            Dtype::Int64 | Dtype::Float64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::UInt8 => "uint8",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        }
    }

    pub fn is_float(&self) -> bool {
        self.kind() == DtypeKind::Float
    }

    /// True for dtypes that may be used as indices (`Int` or `UInt` kind).
    pub fn is_index_like(&self) -> bool {
        matches!(self.kind(), DtypeKind::Int | DtypeKind::UInt)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Dtype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dtype::ALL
            .iter()
            .copied()
            .find(|dtype| dtype.name() == s)
            .ok_or_else(|| Error::DtypeError(format!("Unknown dtype name '{}'", s)))
    }
}

/// Rust scalar types that can live in a [`Storage`].
///
/// Arithmetic on integers wraps; on `bool` addition is logical or and
/// multiplication is logical and.
pub trait Element: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: Dtype;

    fn zero() -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;

    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn neg(self) -> Self;

    fn wrap(data: ArrayD<Self>) -> Storage;
    fn unwrap_ref(storage: &Storage) -> Option<&ArrayD<Self>>;
    fn unwrap_mut(storage: &mut Storage) -> Option<&mut ArrayD<Self>>;
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: Dtype = Dtype::$dtype;

            fn zero() -> Self {
                0
            }
            fn from_f64(value: f64) -> Self {
                value as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            fn sub(self, other: Self) -> Self {
                self.wrapping_sub(other)
            }
            fn mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }
            fn neg(self) -> Self {
                self.wrapping_neg()
            }
            fn wrap(data: ArrayD<Self>) -> Storage {
                Storage::$dtype(data)
            }
            fn unwrap_ref(storage: &Storage) -> Option<&ArrayD<Self>> {
                match storage {
                    Storage::$dtype(data) => Some(data),
                    _ => None,
                }
            }
            fn unwrap_mut(storage: &mut Storage) -> Option<&mut ArrayD<Self>> {
                match storage {
                    Storage::$dtype(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! impl_float_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const DTYPE: Dtype = Dtype::$dtype;

            fn zero() -> Self {
                0.0
            }
            fn from_f64(value: f64) -> Self {
                value as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn add(self, other: Self) -> Self {
                self + other
            }
            fn sub(self, other: Self) -> Self {
                self - other
            }
            fn mul(self, other: Self) -> Self {
                self * other
            }
            fn neg(self) -> Self {
                -self
            }
            fn wrap(data: ArrayD<Self>) -> Storage {
                Storage::$dtype(data)
            }
            fn unwrap_ref(storage: &Storage) -> Option<&ArrayD<Self>> {
                match storage {
                    Storage::$dtype(data) => Some(data),
                    _ => None,
                }
            }
            fn unwrap_mut(storage: &mut Storage) -> Option<&mut ArrayD<Self>> {
                match storage {
                    Storage::$dtype(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

impl_int_element!(i8, Int8);
impl_int_element!(i16, Int16);
impl_int_element!(i32, Int32);
impl_int_element!(i64, Int64);
impl_int_element!(u8, UInt8);
impl_float_element!(f32, Float32);
impl_float_element!(f64, Float64);

impl Element for bool {
    const DTYPE: Dtype = Dtype::Bool;

    fn zero() -> Self {
        false
    }
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
    fn add(self, other: Self) -> Self {
        self || other
    }
    fn sub(self, other: Self) -> Self {
        self ^ other
    }
    fn mul(self, other: Self) -> Self {
        self && other
    }
    fn neg(self) -> Self {
        self
    }
    fn wrap(data: ArrayD<Self>) -> Storage {
        Storage::Bool(data)
    }
    fn unwrap_ref(storage: &Storage) -> Option<&ArrayD<Self>> {
        match storage {
            Storage::Bool(data) => Some(data),
            _ => None,
        }
    }
    fn unwrap_mut(storage: &mut Storage) -> Option<&mut ArrayD<Self>> {
        match storage {
            Storage::Bool(data) => Some(data),
            _ => None,
        }
    }
}

/// Runs `$body` with `$t` bound to the Rust element type of `$dtype`.
///
/// ```
/// use tapegrad::{with_dtype, Dtype};
/// let size = with_dtype!(Dtype::Int16, T => std::mem::size_of::<T>());
/// assert_eq!(size, 2);
/// ```
#[macro_export]
macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::Dtype::Bool => {
                type $t = bool;
                $body
            }
            $crate::Dtype::Int8 => {
                type $t = i8;
                $body
            }
            $crate::Dtype::Int16 => {
                type $t = i16;
                $body
            }
            $crate::Dtype::Int32 => {
                type $t = i32;
                $body
            }
            $crate::Dtype::Int64 => {
                type $t = i64;
                $body
            }
            $crate::Dtype::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::Dtype::Float32 => {
                type $t = f32;
                $body
            }
            $crate::Dtype::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

/// Fails with [`Error::DtypeMismatch`] unless both dtypes are equal.
pub fn check_equal_dtype(op: &str, lhs: Dtype, rhs: Dtype) -> Result<(), Error> {
    if lhs != rhs {
        return Err(Error::DtypeMismatch {
            op: op.to_string(),
            lhs,
            rhs,
        });
    }
    Ok(())
}
