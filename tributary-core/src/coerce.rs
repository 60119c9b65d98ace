//! Conversion of provider values into destination slot types.
//!
//! Each conversion either produces a value that fits the destination kind or
//! fails without touching the destination. Integer inputs are accepted across
//! signedness when the value fits; floats accept integers; text accepts
//! booleans, integers and display values but never floats.

use crate::error::CoerceError;
use crate::slot::{Kind, Slot};
use crate::value::Value;

/// Writes `value` into `slot`, refusing read-only slots up front.
pub fn assign(slot: &mut dyn Slot, value: &Value) -> Result<(), CoerceError> {
    if !slot.is_settable() {
        return Err(CoerceError::NotSetable);
    }
    slot.assign(value)
}

pub fn to_text(value: &Value) -> Result<String, CoerceError> {
    match value {
        Value::Text(text) => Ok(text.clone()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Int(number) => Ok(number.to_string()),
        Value::UInt(number) => Ok(number.to_string()),
        Value::Display(display) => Ok(display.text()),
        other => Err(invalid_type(Kind::Text, other)),
    }
}

pub fn to_bool(value: &Value) -> Result<bool, CoerceError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(CoerceError::InvalidValue {
                expected: Kind::Bool,
                input: text.clone(),
            }),
        },
        other => Err(invalid_type(Kind::Bool, other)),
    }
}

pub fn to_signed(value: &Value, bits: u32) -> Result<i64, CoerceError> {
    let expected = Kind::Signed(bits);
    let number = match value {
        Value::Int(number) => *number,
        Value::UInt(number) => i64::try_from(*number).map_err(|_| CoerceError::Overflow {
            expected,
            input: number.to_string(),
        })?,
        Value::Text(text) => {
            text.trim()
                .parse::<i64>()
                .map_err(|_| CoerceError::InvalidValue {
                    expected,
                    input: text.clone(),
                })?
        }
        other => return Err(invalid_type(expected, other)),
    };

    if bits < 64 {
        let max = (1_i64 << (bits - 1)) - 1;
        let min = -(1_i64 << (bits - 1));
        if number < min || number > max {
            return Err(CoerceError::Overflow {
                expected,
                input: number.to_string(),
            });
        }
    }

    Ok(number)
}

pub fn to_unsigned(value: &Value, bits: u32) -> Result<u64, CoerceError> {
    let expected = Kind::Unsigned(bits);
    let number = match value {
        Value::UInt(number) => *number,
        Value::Int(number) => u64::try_from(*number).map_err(|_| CoerceError::Overflow {
            expected,
            input: number.to_string(),
        })?,
        Value::Text(text) => {
            text.trim()
                .parse::<u64>()
                .map_err(|_| CoerceError::InvalidValue {
                    expected,
                    input: text.clone(),
                })?
        }
        other => return Err(invalid_type(expected, other)),
    };

    if bits < 64 && number > (1_u64 << bits) - 1 {
        return Err(CoerceError::Overflow {
            expected,
            input: number.to_string(),
        });
    }

    Ok(number)
}

pub fn to_float(value: &Value, bits: u32) -> Result<f64, CoerceError> {
    let expected = Kind::Float(bits);
    let number = match value {
        Value::Float(number) => *number,
        Value::Int(number) => *number as f64,
        Value::UInt(number) => *number as f64,
        Value::Text(text) => {
            text.trim()
                .parse::<f64>()
                .map_err(|_| CoerceError::InvalidValue {
                    expected,
                    input: text.clone(),
                })?
        }
        other => return Err(invalid_type(expected, other)),
    };

    if bits == 32 && number.is_finite() && number.abs() > f64::from(f32::MAX) {
        return Err(CoerceError::Overflow {
            expected,
            input: number.to_string(),
        });
    }

    Ok(number)
}

pub(crate) fn invalid_type(expected: Kind, found: &Value) -> CoerceError {
    CoerceError::InvalidType {
        expected,
        found: found.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Pinned;

    #[test]
    fn text_accepts_scalars_but_not_floats() {
        assert_eq!(to_text(&Value::Bool(true)), Ok("true".to_owned()));
        assert_eq!(to_text(&Value::Int(-42)), Ok("-42".to_owned()));
        assert_eq!(to_text(&Value::UInt(7)), Ok("7".to_owned()));
        assert!(matches!(
            to_text(&Value::Float(1.5)),
            Err(CoerceError::InvalidType { .. })
        ));
        assert!(matches!(
            to_text(&Value::List(Vec::new())),
            Err(CoerceError::InvalidType { .. })
        ));
    }

    #[test]
    fn signed_checks_width() {
        assert_eq!(to_signed(&Value::Int(127), 8), Ok(127));
        assert_eq!(to_signed(&Value::Int(-128), 8), Ok(-128));
        assert!(matches!(
            to_signed(&Value::Int(128), 8),
            Err(CoerceError::Overflow { .. })
        ));
        assert_eq!(to_signed(&Value::from(" 12 "), 32), Ok(12));
        assert!(matches!(
            to_signed(&Value::from("twelve"), 32),
            Err(CoerceError::InvalidValue { .. })
        ));
        assert!(matches!(
            to_signed(&Value::UInt(u64::MAX), 64),
            Err(CoerceError::Overflow { .. })
        ));
    }

    #[test]
    fn unsigned_rejects_negative_and_wide_values() {
        assert_eq!(to_unsigned(&Value::UInt(65_535), 16), Ok(65_535));
        assert!(matches!(
            to_unsigned(&Value::UInt(65_536), 16),
            Err(CoerceError::Overflow { .. })
        ));
        assert!(matches!(
            to_unsigned(&Value::Int(-1), 64),
            Err(CoerceError::Overflow { .. })
        ));
        assert!(matches!(
            to_unsigned(&Value::Bool(true), 64),
            Err(CoerceError::InvalidType { .. })
        ));
    }

    #[test]
    fn float32_overflow_is_detected() {
        assert_eq!(to_float(&Value::from("2.5"), 32), Ok(2.5));
        assert!(matches!(
            to_float(&Value::Float(f64::MAX), 32),
            Err(CoerceError::Overflow { .. })
        ));
        assert_eq!(to_float(&Value::Float(f64::MAX), 64), Ok(f64::MAX));
    }

    #[test]
    fn pinned_slots_are_not_settable() {
        let mut pinned = Pinned::new("fixed".to_owned());
        assert_eq!(
            assign(&mut pinned, &Value::from("other")),
            Err(CoerceError::NotSetable)
        );
        assert_eq!(pinned.get(), "fixed");
    }
}
