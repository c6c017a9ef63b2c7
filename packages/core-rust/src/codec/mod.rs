//! Body codecs and the content-type keyed registry.
//!
//! Codecs translate between bytes and a `serde_json::Value` document; the
//! typed [`marshal`](dyn Codec::marshal) / [`unmarshal`](dyn Codec::unmarshal)
//! helpers sit on top so handlers work with their own `serde` types.
//!
//! The registry is built during startup (registration needs `&mut`) and then
//! shared read-only behind an `Arc`.

pub mod json;
pub mod msgpack;
mod strict;

pub use json::{JsonCodec, StrictJsonCodec, JSON};
pub use msgpack::{MsgPackCodec, MSGPACK};

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{context, Error};
use crate::kv;

/// A named strategy for encoding payloads to bytes and back.
///
/// `name()` is the canonical content type (`type/subtype`).
pub trait Codec: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Encodes a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be represented in this format.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error>;

    /// Decodes bytes into a document, validating syntax.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not valid in this format.
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, Error>;

    /// When true, [`unmarshal`](dyn Codec::unmarshal) rejects object fields
    /// the destination type does not declare.
    fn deny_unknown_fields(&self) -> bool {
        false
    }
}

impl dyn Codec {
    /// Serializes `obj` with this codec.
    ///
    /// # Errors
    ///
    /// Returns the serialization error wrapped with codec context.
    pub fn marshal<T: Serialize + ?Sized>(&self, obj: &T) -> Result<Vec<u8>, Error> {
        let ctx = context(kv![
            "component", "codec", "type", self.name(), "method", "marshal",
            "payload", type_name::<T>(),
        ]);
        let result = serde_json::to_value(obj)
            .map_err(Error::from)
            .and_then(|value| self.encode(&value));
        ctx.finish(result)
    }

    /// Deserializes `data` into `T` with this codec.
    ///
    /// # Errors
    ///
    /// Returns the decode error wrapped with codec context (payload in base64
    /// and the receiver type).
    pub fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, Error> {
        let ctx = context(kv![
            "component", "codec", "type", self.name(), "method", "unmarshal",
            "data", base64::engine::general_purpose::STANDARD.encode(data),
            "receiver", type_name::<T>(),
        ]);
        let result = self.decode(data).and_then(|value| {
            if self.deny_unknown_fields() {
                T::deserialize(strict::Strict(&value)).map_err(Error::from)
            } else {
                T::deserialize(&value).map_err(Error::from)
            }
        });
        ctx.finish(result)
    }
}

impl fmt::Debug for dyn Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Codec").field(&self.name()).finish()
    }
}

/// Error returned by [`parse_media_type`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaTypeError {
    #[error("media type is empty")]
    Empty,
    #[error("media type {0:?} has no subtype")]
    MissingSlash(String),
    #[error("media type {0:?} contains invalid characters")]
    InvalidToken(String),
    #[error("malformed media type parameter {0:?}")]
    InvalidParameter(String),
}

/// Parses a media type, returning the lowercase `type/subtype` with any
/// parameters stripped.
///
/// # Errors
///
/// Returns an error if the input is empty, lacks a `/`, or contains
/// characters outside the token grammar.
pub fn parse_media_type(raw: &str) -> Result<String, MediaTypeError> {
    let mut parts = raw.split(';');
    let essence = parts.next().unwrap_or_default().trim();
    if essence.is_empty() {
        return Err(MediaTypeError::Empty);
    }
    let Some((ty, subtype)) = essence.split_once('/') else {
        return Err(MediaTypeError::MissingSlash(essence.to_owned()));
    };
    if !is_token(ty) || !is_token(subtype) {
        return Err(MediaTypeError::InvalidToken(essence.to_owned()));
    }
    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        match param.split_once('=') {
            Some((key, _)) if is_token(key.trim()) => {}
            _ => return Err(MediaTypeError::InvalidParameter(param.to_owned())),
        }
    }
    Ok(essence.to_ascii_lowercase())
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c)
        })
}

/// Two-level mapping `type → subtype → codec`.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, HashMap<String, Arc<dyn Codec>>>,
}

impl CodecRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the JSON and `MsgPack` codecs.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(MsgPackCodec));
        registry
    }

    /// Registers `codec` under its lowercase content type. The last
    /// registration for a given type wins.
    ///
    /// # Panics
    ///
    /// Panics if the codec name is empty or is not a valid media type. Codec
    /// registration happens once at startup; a bad name is a programming error.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        let name = codec.name().to_ascii_lowercase();
        assert!(
            !name.is_empty(),
            "cannot register Codec with empty string result for name()"
        );
        let mime = match parse_media_type(&name) {
            Ok(mime) => mime,
            Err(err) => panic!("codec type incorrect: {err}"),
        };
        let (ty, subtype) = mime.split_once('/').unwrap_or((mime.as_str(), ""));
        self.codecs
            .entry(ty.to_owned())
            .or_default()
            .insert(subtype.to_owned(), codec);
    }

    /// Looks up a codec by content type.
    ///
    /// Returns `None` for input without a `/` or an unknown top-level type. A
    /// `*` subtype returns an arbitrary codec registered under that type;
    /// callers must not depend on which one.
    #[must_use]
    pub fn get(&self, content_type: &str) -> Option<Arc<dyn Codec>> {
        let (ty, subtype) = content_type.split_once('/')?;
        let subtypes = self.codecs.get(&ty.to_ascii_lowercase())?;
        if subtype == "*" {
            return subtypes.values().next().cloned();
        }
        subtypes.get(&subtype.to_ascii_lowercase()).cloned()
    }

    /// Number of registered codecs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .codecs
            .iter()
            .flat_map(|(ty, subs)| subs.keys().map(move |sub| format!("{ty}/{sub}")))
            .collect();
        names.sort();
        f.debug_struct("CodecRegistry").field("codecs", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XmlCodec;

    impl Codec for XmlCodec {
        fn name(&self) -> &str {
            "application/xml"
        }

        fn encode(&self, _value: &serde_json::Value) -> Result<Vec<u8>, Error> {
            Ok(b"<xml/>".to_vec())
        }

        fn decode(&self, _data: &[u8]) -> Result<serde_json::Value, Error> {
            Ok(serde_json::Value::Null)
        }
    }

    struct Named(&'static str);

    impl Codec for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn encode(&self, _value: &serde_json::Value) -> Result<Vec<u8>, Error> {
            Ok(Vec::new())
        }

        fn decode(&self, _data: &[u8]) -> Result<serde_json::Value, Error> {
            Ok(serde_json::Value::Null)
        }
    }

    fn json_and_xml() -> CodecRegistry {
        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(XmlCodec));
        registry
    }

    #[test]
    fn get_returns_exact_match() {
        let registry = json_and_xml();
        assert_eq!(registry.get("application/xml").unwrap().name(), "application/xml");
        assert_eq!(registry.get("application/json").unwrap().name(), JSON);
    }

    #[test]
    fn wildcard_subtype_returns_one_of_registered() {
        let registry = json_and_xml();
        let codec = registry.get("application/*").unwrap();
        assert!(["application/json", "application/xml"].contains(&codec.name()));
    }

    #[test]
    fn malformed_or_unknown_type_returns_none() {
        let registry = json_and_xml();
        assert!(registry.get("json").is_none());
        assert!(registry.get("text/plain").is_none());
        assert!(registry.get("application/yaml").is_none());
        assert!(registry.get("*/*").is_none());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = json_and_xml();
        assert!(registry.get("Application/JSON").is_some());
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(StrictJsonCodec));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(JSON).unwrap().deny_unknown_fields());
    }

    #[test]
    #[should_panic(expected = "empty string")]
    fn register_empty_name_panics() {
        CodecRegistry::new().register(Arc::new(Named("")));
    }

    #[test]
    #[should_panic(expected = "codec type incorrect")]
    fn register_unparsable_name_panics() {
        CodecRegistry::new().register(Arc::new(Named("json")));
    }

    #[test]
    fn with_defaults_has_json_and_msgpack() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(MSGPACK).is_some());
    }

    #[test]
    fn parse_media_type_strips_parameters() {
        assert_eq!(
            parse_media_type("Application/JSON; charset=utf-8").unwrap(),
            "application/json"
        );
        assert_eq!(parse_media_type(" text/html;q=0.9 ").unwrap(), "text/html");
    }

    #[test]
    fn parse_media_type_rejects_malformed() {
        assert_eq!(parse_media_type(""), Err(MediaTypeError::Empty));
        assert!(matches!(
            parse_media_type("json"),
            Err(MediaTypeError::MissingSlash(_))
        ));
        assert!(matches!(
            parse_media_type("application/"),
            Err(MediaTypeError::InvalidToken(_))
        ));
        assert!(matches!(
            parse_media_type("text/plain; charset"),
            Err(MediaTypeError::InvalidParameter(_))
        ));
    }
}
