//! Content negotiation: picks the codec for a request body and for a response.

use std::sync::Arc;

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::HeaderMap;
use corekit_core::codec::{parse_media_type, Codec, CodecRegistry, StrictJsonCodec, JSON};

/// Codec selection policy shared by every route of a service.
#[derive(Clone)]
pub struct Negotiator {
    codecs: Arc<CodecRegistry>,
    default_codec: Arc<dyn Codec>,
    use_default_codec_for_body: bool,
}

impl Negotiator {
    #[must_use]
    pub fn new(codecs: Arc<CodecRegistry>, default_codec: Arc<dyn Codec>) -> Self {
        Self {
            codecs,
            default_codec,
            use_default_codec_for_body: false,
        }
    }

    /// Falls back to the default codec for request bodies whose
    /// `Content-Type` is missing or unknown. Clients can then no longer pick
    /// another body format by omission.
    #[must_use]
    pub fn use_default_codec_for_body(mut self, enabled: bool) -> Self {
        self.use_default_codec_for_body = enabled;
        self
    }

    #[must_use]
    pub fn default_codec(&self) -> &Arc<dyn Codec> {
        &self.default_codec
    }

    #[must_use]
    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Codec bound to the request body.
    ///
    /// `application/json` always decodes strictly; other types come from the
    /// registry. Without a match, the default codec is used only when
    /// configured, otherwise the request has no codec.
    #[must_use]
    pub fn request_codec(&self, headers: &HeaderMap) -> Option<Arc<dyn Codec>> {
        let resolved = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| parse_media_type(raw).ok())
            .and_then(|mime| {
                if mime == JSON {
                    Some(Arc::new(StrictJsonCodec) as Arc<dyn Codec>)
                } else {
                    self.codecs.get(&mime)
                }
            });
        resolved.or_else(|| {
            self.use_default_codec_for_body
                .then(|| Arc::clone(&self.default_codec))
        })
    }

    /// Codec used to encode a response payload.
    ///
    /// An explicit `Content-Type` on the response wins, then the media types
    /// of the request's `Accept` header in listed order, then the default.
    ///
    /// # Panics
    ///
    /// Panics if the response sets a `Content-Type` with no registered codec.
    #[must_use]
    pub fn response_codec(
        &self,
        response_headers: &HeaderMap,
        request_headers: &HeaderMap,
    ) -> Arc<dyn Codec> {
        if let Some(value) = response_headers.get(CONTENT_TYPE) {
            let raw = value.to_str().unwrap_or_default();
            let codec = parse_media_type(raw)
                .ok()
                .and_then(|mime| self.codecs.get(&mime));
            return match codec {
                Some(codec) => codec,
                None => panic!("unsupported codec type {raw:?} set on response"),
            };
        }
        request_headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|media| parse_media_type(media).ok())
            .find_map(|mime| self.codecs.get(&mime))
            .unwrap_or_else(|| Arc::clone(&self.default_codec))
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("codecs", &self.codecs)
            .field("default_codec", &self.default_codec.name())
            .field("use_default_codec_for_body", &self.use_default_codec_for_body)
            .finish()
    }
}
