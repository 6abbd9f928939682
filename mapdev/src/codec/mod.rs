//! Data codecs translating between on-device raw 32-bit words and the cooked
//! value types seen by applications.

mod fixed_point;
mod ieee754;

pub use fixed_point::FixedPoint;
pub use ieee754::Ieee754Single;

use crate::types::Void;
use mapdev_utils::catalogue::{ChannelInfo, DataType};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodecError {
    #[error("value {value} is out of range for {target} (register `{register}`)")]
    ConversionOverflow {
        register: String,
        value: f64,
        target: &'static str,
    },
    #[error("cannot interpret `{input}` as a number (register `{register}`)")]
    InvalidArgument { register: String, input: String },
    #[error("invalid conversion configuration for register `{register}`: {message}")]
    InvalidConfiguration { register: String, message: String },
}

mod sealed {
    pub trait Sealed {}
}

/// A cooked value type an application can ask for.
///
/// This is a closed set: the signed and unsigned integers up to 64 bit,
/// `f32`/`f64`, `bool`, `String` and [`Void`]. The codecs route every
/// conversion through `f64`, which represents all raw patterns of the 32-bit
/// device words exactly.
pub trait Cooked:
    sealed::Sealed + Clone + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    /// Type name used in conversion error messages.
    const NAME: &'static str;

    /// Converts with round-to-nearest (ties away from zero) and range
    /// checking.
    ///
    /// # Errors
    /// [`CodecError::ConversionOverflow`] if the value does not fit.
    fn from_f64(value: f64, register: &str) -> Result<Self, CodecError>;

    /// The numeric interpretation of this value.
    ///
    /// # Errors
    /// [`CodecError::InvalidArgument`] for text that does not parse.
    fn to_f64(&self, register: &str) -> Result<f64, CodecError>;

    /// Fixed-point raw override: `bool` and [`Void`] encode as plain `1`/`0`
    /// regardless of the fractional-bit scaling.
    fn fixed_point_raw(&self) -> Option<u32> {
        None
    }

    /// Adopts text verbatim; only the string type supports this (used by
    /// ASCII registers).
    fn from_text(text: String) -> Option<Self> {
        let _ = text;
        None
    }

    /// Views this value as text; only the string type supports this.
    fn as_text(&self) -> Option<&str> {
        None
    }
}

macro_rules! impl_cooked_int {
    ($($t:ty),*) => {$(
        impl sealed::Sealed for $t {}
        impl Cooked for $t {
            const NAME: &'static str = stringify!($t);

            fn from_f64(value: f64, register: &str) -> Result<Self, CodecError> {
                let rounded = value.round();
                num_traits::cast::<f64, $t>(rounded).ok_or(CodecError::ConversionOverflow {
                    register: register.to_string(),
                    value,
                    target: Self::NAME,
                })
            }

            fn to_f64(&self, _register: &str) -> Result<f64, CodecError> {
                #[allow(clippy::cast_precision_loss)]
                Ok(*self as f64)
            }
        }
    )*};
}

impl_cooked_int!(i8, u8, i16, u16, i32, u32, i64, u64);

impl sealed::Sealed for f32 {}
impl Cooked for f32 {
    const NAME: &'static str = "f32";

    fn from_f64(value: f64, register: &str) -> Result<Self, CodecError> {
        if value.is_finite() && (value > f64::from(f32::MAX) || value < f64::from(f32::MIN)) {
            return Err(CodecError::ConversionOverflow {
                register: register.to_string(),
                value,
                target: Self::NAME,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(value as f32)
    }

    fn to_f64(&self, _register: &str) -> Result<f64, CodecError> {
        Ok(f64::from(*self))
    }
}

impl sealed::Sealed for f64 {}
impl Cooked for f64 {
    const NAME: &'static str = "f64";

    fn from_f64(value: f64, _register: &str) -> Result<Self, CodecError> {
        Ok(value)
    }

    fn to_f64(&self, _register: &str) -> Result<f64, CodecError> {
        Ok(*self)
    }
}

impl sealed::Sealed for bool {}
impl Cooked for bool {
    const NAME: &'static str = "bool";

    fn from_f64(value: f64, _register: &str) -> Result<Self, CodecError> {
        Ok(value != 0.0)
    }

    fn to_f64(&self, _register: &str) -> Result<f64, CodecError> {
        Ok(if *self { 1.0 } else { 0.0 })
    }

    fn fixed_point_raw(&self) -> Option<u32> {
        Some(u32::from(*self))
    }
}

impl sealed::Sealed for String {}
impl Cooked for String {
    const NAME: &'static str = "string";

    fn from_f64(value: f64, _register: &str) -> Result<Self, CodecError> {
        Ok(value.to_string())
    }

    fn to_f64(&self, register: &str) -> Result<f64, CodecError> {
        self.trim()
            .parse()
            .map_err(|_| CodecError::InvalidArgument {
                register: register.to_string(),
                input: self.clone(),
            })
    }

    fn from_text(text: String) -> Option<Self> {
        Some(text)
    }

    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl sealed::Sealed for Void {}
impl Cooked for Void {
    const NAME: &'static str = "void";

    fn from_f64(_value: f64, _register: &str) -> Result<Self, CodecError> {
        Ok(Void)
    }

    fn to_f64(&self, _register: &str) -> Result<f64, CodecError> {
        Ok(0.0)
    }

    fn fixed_point_raw(&self) -> Option<u32> {
        Some(0)
    }
}

/// A converter instance for one register channel.
#[derive(Debug, Clone)]
pub enum Codec {
    FixedPoint(FixedPoint),
    Ieee754(Ieee754Single),
}

impl Codec {
    /// Builds the converter matching a channel description.
    ///
    /// # Errors
    /// Fails for configurations outside the representable range, and for
    /// ASCII channels, which have no numeric codec.
    pub fn for_channel(register: &str, channel: &ChannelInfo) -> Result<Codec, CodecError> {
        match channel.data_type {
            DataType::FixedPoint | DataType::Void => Ok(Codec::FixedPoint(FixedPoint::new(
                register,
                channel.width,
                channel.fractional_bits,
                channel.signed,
            )?)),
            DataType::Ieee754 => Ok(Codec::Ieee754(Ieee754Single::new(register))),
            DataType::Ascii => Err(CodecError::InvalidConfiguration {
                register: register.to_string(),
                message: "ASCII data has no numeric codec".to_string(),
            }),
        }
    }

    /// # Errors
    /// See [`FixedPoint::to_cooked`] and [`Ieee754Single::to_cooked`].
    pub fn to_cooked<U: Cooked>(&self, raw: i32) -> Result<U, CodecError> {
        match self {
            Codec::FixedPoint(c) => c.to_cooked(raw),
            Codec::Ieee754(c) => c.to_cooked(raw),
        }
    }

    /// # Errors
    /// See [`FixedPoint::to_raw`] and [`Ieee754Single::to_raw`].
    pub fn to_raw<U: Cooked>(&self, cooked: &U) -> Result<i32, CodecError> {
        match self {
            Codec::FixedPoint(c) => c.to_raw(cooked),
            Codec::Ieee754(c) => c.to_raw(cooked),
        }
    }
}
