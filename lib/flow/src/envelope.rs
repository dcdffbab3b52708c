//! A small versioned wrapper used to persist log-stream messages so a future
//! reader (a schema change, a replay tool) can tell which shape it is
//! looking at without guessing from field presence.

use serde::{Deserialize, Serialize};

/// Current wire version for `Envelope<T>`-wrapped payloads.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned wrapper around a payload, for forward-compatible persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps `payload` at the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    /// Consumes the envelope, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Borrows the payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Whether this envelope was written at the version this build expects.
    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes to JSON bytes for storage or transmission.
    ///
    /// # Errors
    ///
    /// Returns an error if `T`'s `Serialize` impl fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Deserializes from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid `Envelope<T>`.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// An envelope staged for lazy payload deserialization: the version is read
/// up front, the payload bytes are kept raw until the caller knows it wants
/// to decode them as a particular type.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    pub version: u32,
    pub payload: serde_json::Value,
}

impl RawEnvelope {
    /// Decodes the raw payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`'s shape.
    pub fn decode<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn new_envelope_is_current_version() {
        let env = Envelope::new(Sample { n: 7 });
        assert!(env.is_current_version());
    }

    #[test]
    fn json_round_trip_preserves_payload() {
        let env = Envelope::new(Sample { n: 7 });
        let bytes = env.to_json_bytes().unwrap();
        let back: Envelope<Sample> = Envelope::from_json_bytes(&bytes).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn raw_envelope_defers_payload_decoding() {
        let env = Envelope::new(Sample { n: 7 });
        let bytes = env.to_json_bytes().unwrap();
        let raw: RawEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw.version, CURRENT_VERSION);
        let decoded: Sample = raw.decode().unwrap();
        assert_eq!(decoded, Sample { n: 7 });
    }
}
