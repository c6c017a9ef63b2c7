//! JSON codecs.

use super::Codec;
use crate::errors::Error;

/// Content type served by [`JsonCodec`] and [`StrictJsonCodec`].
pub const JSON: &str = "application/json";

/// Lenient JSON: unknown object fields are ignored when unmarshaling.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        JSON
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, Error> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// JSON that rejects object fields the destination type does not declare.
///
/// Used for request bodies so typos in field names surface as 400s instead of
/// silently falling back to defaults.
///
/// The check applies wherever the destination is deserialized as a struct or
/// struct variant. Types that serde buffers before dispatching (structs with
/// `#[serde(flatten)]` fields, internally tagged and untagged enums) are read
/// as plain maps, so extra keys on them are ignored, the same limitation as
/// serde's own `deny_unknown_fields`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictJsonCodec;

impl Codec for StrictJsonCodec {
    fn name(&self) -> &str {
        JSON
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error> {
        JsonCodec.encode(value)
    }

    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, Error> {
        JsonCodec.decode(data)
    }

    fn deny_unknown_fields(&self) -> bool {
        true
    }
}
