//! CBOR encoding helpers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClockId, Tsn};

    #[test]
    fn newtypes_encode_as_plain_integers() {
        let bytes = to_cbor(&ClockId::new(7)).unwrap();
        assert_eq!(bytes, to_cbor(&7i64).unwrap());

        let tsn: Tsn = from_cbor(&to_cbor(&42i64).unwrap()).unwrap();
        assert_eq!(tsn, Tsn::new(42));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result: ProtocolResult<ClockId> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
