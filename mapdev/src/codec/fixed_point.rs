//! Fixed-point conversion for register words of up to 32 bits with an
//! arbitrary binary point and optional sign.

use super::{Cooked, CodecError};

/// Converter between raw device words and cooked values for one fixed-point
/// register channel.
///
/// Raw values live in a 32-bit word; bits above `width` are ignored on read
/// and zero on write. The cooked value is `raw * 2^-fractional_bits` after
/// sign extension.
#[derive(Debug, Clone)]
pub struct FixedPoint {
    register: String,
    width: u32,
    fractional_bits: i32,
    signed: bool,
    sign_bit_mask: u32,
    used_bits_mask: u32,
    unused_bits_mask: u32,
    /// Smallest and largest raw value, in value space (after sign extension).
    min_value: i64,
    max_value: i64,
    /// `2^-fractional_bits`
    coefficient: f64,
    /// `2^fractional_bits`
    inverse_coefficient: f64,
}

impl FixedPoint {
    /// Derives the converter constants.
    ///
    /// # Errors
    /// Fails when `width > 32` or when the fractional bits exceed the dynamic
    /// range of an `f64`.
    pub fn new(
        register: &str,
        width: u32,
        fractional_bits: i32,
        signed: bool,
    ) -> Result<Self, CodecError> {
        let config_error = |message: String| CodecError::InvalidConfiguration {
            register: register.to_string(),
            message,
        };

        if width > 32 {
            return Err(config_error(format!(
                "the number of bits must be <= 32, but is {width}"
            )));
        }
        // Positive fractional bits scale down, i.e. correspond to negative
        // exponents. Keep 2^±fractional_bits * 2^width inside an f64.
        #[allow(clippy::cast_possible_wrap)]
        let width_i = width as i32;
        if fractional_bits > -f64::MIN_EXP - width_i || fractional_bits < -f64::MAX_EXP + width_i {
            return Err(config_error(
                "the number of fractional bits exceeds the dynamic range of a double".to_string(),
            ));
        }

        let used_bits_mask = if width == 0 {
            0
        } else if width == 32 {
            u32::MAX
        } else {
            (1u32 << width) - 1
        };
        let sign_bit_mask = if signed && width > 0 {
            1u32 << (width - 1)
        } else {
            0
        };
        let (min_value, max_value) = if width == 0 {
            (0, 0)
        } else if signed {
            (-(1i64 << (width - 1)), (1i64 << (width - 1)) - 1)
        } else {
            (0, (1i64 << width) - 1)
        };

        Ok(FixedPoint {
            register: register.to_string(),
            width,
            fractional_bits,
            signed,
            sign_bit_mask,
            used_bits_mask,
            unused_bits_mask: !used_bits_mask,
            min_value,
            max_value,
            coefficient: 2f64.powi(-fractional_bits),
            inverse_coefficient: 2f64.powi(fractional_bits),
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn fractional_bits(&self) -> i32 {
        self.fractional_bits
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Masks and sign-extends a raw word into value space.
    fn signed_value(&self, raw: i32) -> i64 {
        #[allow(clippy::cast_sign_loss)]
        let masked = (raw as u32) & self.used_bits_mask;
        if self.sign_bit_mask != 0 && (masked & self.sign_bit_mask) != 0 {
            #[allow(clippy::cast_possible_wrap)]
            i64::from((masked | self.unused_bits_mask) as i32)
        } else {
            i64::from(masked)
        }
    }

    /// Converts a raw word to a cooked value.
    ///
    /// # Errors
    /// [`CodecError::ConversionOverflow`] when the cooked type cannot hold
    /// the value (string targets always succeed).
    pub fn to_cooked<U: Cooked>(&self, raw: i32) -> Result<U, CodecError> {
        #[allow(clippy::cast_precision_loss)]
        let value = self.signed_value(raw) as f64 * self.coefficient;
        U::from_f64(value, &self.register)
    }

    /// Converts a cooked value to a raw word, rounding to nearest and
    /// saturating at the raw range limits.
    ///
    /// # Errors
    /// [`CodecError::InvalidArgument`] for string input that does not parse;
    /// numeric overflow saturates instead of failing.
    pub fn to_raw<U: Cooked>(&self, cooked: &U) -> Result<i32, CodecError> {
        if let Some(raw) = cooked.fixed_point_raw() {
            #[allow(clippy::cast_possible_wrap)]
            return Ok((raw & self.used_bits_mask) as i32);
        }

        let value = cooked.to_f64(&self.register)?;
        let scaled = value * self.inverse_coefficient;
        let rounded = scaled.round();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let clamped = if rounded.is_nan() {
            0
        } else if rounded <= self.min_value as f64 {
            self.min_value
        } else if rounded >= self.max_value as f64 {
            self.max_value
        } else {
            rounded as i64
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        Ok(((clamped as u32) & self.used_bits_mask) as i32)
    }
}
