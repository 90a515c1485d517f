//! Defines the response status code.

use std::num::NonZeroU16;

use fe2o3_amqp_types::primitives::SimpleValue;

/// HTTP style status code carried in the `status` application property.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub struct StatusCode(pub NonZeroU16);

impl StatusCode {
    /// The numeric value of the code.
    pub fn value(&self) -> u16 {
        self.0.get()
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<SimpleValue> for StatusCode {
    type Error = SimpleValue;

    fn try_from(value: SimpleValue) -> Result<Self, Self::Error> {
        match StatusCode::try_from(&value) {
            Ok(code) => Ok(code),
            Err(_) => Err(value),
        }
    }
}

impl<'a> TryFrom<&'a SimpleValue> for StatusCode {
    type Error = &'a SimpleValue;

    fn try_from(value: &'a SimpleValue) -> Result<Self, Self::Error> {
        let code = match value {
            SimpleValue::Ushort(val) => NonZeroU16::new(*val),
            SimpleValue::Uint(val) => u16::try_from(*val).ok().and_then(NonZeroU16::new),
            SimpleValue::Ulong(val) => u16::try_from(*val).ok().and_then(NonZeroU16::new),
            SimpleValue::Short(val) => u16::try_from(*val).ok().and_then(NonZeroU16::new),
            SimpleValue::Int(val) => u16::try_from(*val).ok().and_then(NonZeroU16::new),
            SimpleValue::Long(val) => u16::try_from(*val).ok().and_then(NonZeroU16::new),
            _ => return Err(value),
        }
        .ok_or(value)?;

        Ok(StatusCode(code))
    }
}

/// Lenient numeric read used for duration-like properties.
pub(crate) fn as_millis(value: &SimpleValue) -> Option<u64> {
    match value {
        SimpleValue::Ubyte(val) => Some(u64::from(*val)),
        SimpleValue::Ushort(val) => Some(u64::from(*val)),
        SimpleValue::Uint(val) => Some(u64::from(*val)),
        SimpleValue::Ulong(val) => Some(*val),
        SimpleValue::Byte(val) => u64::try_from(*val).ok(),
        SimpleValue::Short(val) => u64::try_from(*val).ok(),
        SimpleValue::Int(val) => u64::try_from(*val).ok(),
        SimpleValue::Long(val) => u64::try_from(*val).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_encodings_decode() {
        assert_eq!(
            StatusCode::try_from(SimpleValue::from(200u16)).map(|c| c.value()),
            Ok(200)
        );
        assert_eq!(
            StatusCode::try_from(SimpleValue::from(404i32)).map(|c| c.value()),
            Ok(404)
        );
        assert_eq!(
            StatusCode::try_from(SimpleValue::from(408i64)).map(|c| c.value()),
            Ok(408)
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(StatusCode::try_from(SimpleValue::from("200")).is_err());
        assert!(StatusCode::try_from(SimpleValue::from(0i32)).is_err());
        assert!(StatusCode::try_from(SimpleValue::from(-1i32)).is_err());
        assert!(StatusCode::try_from(SimpleValue::from(70_000i32)).is_err());
    }

    #[test]
    fn millis_reads_are_lenient() {
        assert_eq!(as_millis(&SimpleValue::from(1500u32)), Some(1500));
        assert_eq!(as_millis(&SimpleValue::from(1500i64)), Some(1500));
        assert_eq!(as_millis(&SimpleValue::from(-1i32)), None);
        assert_eq!(as_millis(&SimpleValue::from("1500")), None);
    }
}
