use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Wire format for batch payloads sent to the collection endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, default).
    #[default]
    Json,

    /// CBOR format (compact binary, for constrained uplinks).
    Cbor,
}

impl Format {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Cbor => "application/cbor",
        }
    }
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(Error::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(Error::from),
        Format::Cbor => ciborium::from_reader(data).map_err(|e| Error::Cbor(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{Quality, Reading, TagValue};

    #[test]
    fn test_cbor_is_smaller() {
        let readings: Vec<Reading> = (0..10)
            .map(|i| Reading::new("plc01", format!("tag{}", i), TagValue::Integer(i)))
            .collect();

        let json = encode(&readings, Format::Json).unwrap();
        let cbor = encode(&readings, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_cbor_preserves_quality_and_missing_value() {
        let reading = Reading::bad("plc01", "coil/3").with_timestamp(1_700_000_000_000);

        let encoded = encode(&reading, Format::Cbor).unwrap();
        let decoded: Reading = decode(&encoded, Format::Cbor).unwrap();

        assert_eq!(decoded.quality, Quality::Bad);
        assert_eq!(decoded.value, None);
        assert_eq!(decoded.timestamp, 1_700_000_000_000);
    }
}
