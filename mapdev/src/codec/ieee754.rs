//! IEEE-754 single-precision conversion: the raw word is the bit pattern of
//! an `f32`.

use super::{Cooked, CodecError};

#[derive(Debug, Clone)]
pub struct Ieee754Single {
    register: String,
}

impl Ieee754Single {
    #[must_use]
    pub fn new(register: &str) -> Self {
        Ieee754Single {
            register: register.to_string(),
        }
    }

    /// Reinterprets the raw bits as `f32` and narrows to the cooked type with
    /// rounding and range checking.
    ///
    /// # Errors
    /// [`CodecError::ConversionOverflow`] when the cooked type cannot hold
    /// the value (string targets render the float instead).
    pub fn to_cooked<U: Cooked>(&self, raw: i32) -> Result<U, CodecError> {
        #[allow(clippy::cast_sign_loss)]
        let generic = f32::from_bits(raw as u32);
        U::from_f64(f64::from(generic), &self.register)
    }

    /// Converts the cooked value to `f32`, saturating at `±f32::MAX`, and
    /// returns its bit pattern.
    ///
    /// # Errors
    /// [`CodecError::InvalidArgument`] for string input that does not parse.
    pub fn to_raw<U: Cooked>(&self, cooked: &U) -> Result<i32, CodecError> {
        let value = cooked.to_f64(&self.register)?;
        let generic = if value > f64::from(f32::MAX) {
            f32::MAX
        } else if value < f64::from(f32::MIN) {
            f32::MIN
        } else {
            #[allow(clippy::cast_possible_truncation)]
            {
                value as f32
            }
        };
        #[allow(clippy::cast_possible_wrap)]
        Ok(generic.to_bits() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c() -> Ieee754Single {
        Ieee754Single::new("TEST")
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_bit_pattern_roundtrip() {
        let raw = c().to_raw(&3.25f32).unwrap();
        assert_eq!(raw as u32, 3.25f32.to_bits());
        assert_eq!(c().to_cooked::<f32>(raw).unwrap(), 3.25);
        assert_eq!(c().to_cooked::<f64>(raw).unwrap(), 3.25);
    }

    #[test]
    fn test_integer_targets_round() {
        let raw = c().to_raw(&2.5f64).unwrap();
        assert_eq!(c().to_cooked::<i16>(raw).unwrap(), 3);
        let raw = c().to_raw(&-2.5f64).unwrap();
        assert_eq!(c().to_cooked::<i16>(raw).unwrap(), -3);
    }

    #[test]
    fn test_overflow_saturates_on_write() {
        // 1e39 does not fit an f32: the raw word becomes FLT_MAX
        let raw = c().to_raw(&1e39f64).unwrap();
        assert_eq!(raw as u32, f32::MAX.to_bits());
        let raw = c().to_raw(&-1e39f64).unwrap();
        assert_eq!(raw as u32, f32::MIN.to_bits());
    }

    #[test]
    fn test_overflow_fails_on_read() {
        let raw = c().to_raw(&1e39f64).unwrap();
        assert!(matches!(
            c().to_cooked::<i8>(raw),
            Err(CodecError::ConversionOverflow { .. })
        ));
        assert!(c().to_cooked::<i64>(raw).is_err());
        // but the decimal text is always available
        let text = c().to_cooked::<String>(raw).unwrap();
        assert!(text.starts_with("34028234"));
    }

    #[test]
    fn test_string_conversions() {
        let raw = c().to_raw(&"1.5".to_string()).unwrap();
        assert_eq!(raw as u32, 1.5f32.to_bits());
        assert!(matches!(
            c().to_raw(&"garbage".to_string()),
            Err(CodecError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_bool_conversions() {
        let raw = c().to_raw(&true).unwrap();
        assert_eq!(raw as u32, 1.0f32.to_bits());
        assert!(c().to_cooked::<bool>(raw).unwrap());
        assert!(!c().to_cooked::<bool>(0).unwrap());
    }
}
