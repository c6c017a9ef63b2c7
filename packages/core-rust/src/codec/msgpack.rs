//! `MsgPack` codec using named (map) encoding for structs.
//!
//! Payloads pass through `serde_json::Value`, so only the JSON data model
//! round-trips: `bin` values and non-string map keys written by other MsgPack
//! clients are rejected on decode.

use super::Codec;
use crate::errors::Error;

pub const MSGPACK: &str = "application/msgpack";

#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &str {
        MSGPACK
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, Error> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i64,
        label: String,
    }

    #[test]
    fn typed_value_survives_msgpack() {
        let codec: &dyn Codec = &MsgPackCodec;
        let point = Point { x: -4, label: "origin".into() };
        let bytes = codec.marshal(&point).unwrap();
        assert_eq!(codec.unmarshal::<Point>(&bytes).unwrap(), point);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let codec: &dyn Codec = &MsgPackCodec;
        let bytes = codec.marshal(&Point { x: 1, label: "a".into() }).unwrap();
        assert!(codec.unmarshal::<Point>(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn binary_and_integer_keys_are_rejected() {
        let codec: &dyn Codec = &MsgPackCodec;
        // bin8 of length 1
        assert!(codec.decode(&[0xc4, 0x01, 0xff]).is_err());
        // fixmap {1: 2}
        assert!(codec.decode(&[0x81, 0x01, 0x02]).is_err());
    }
}
