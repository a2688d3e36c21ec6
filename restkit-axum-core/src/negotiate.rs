//! Content negotiation.
//!
//! - Response: pick an encoder for the `Accept` header using RFC 2616 quality values.
//! - Request: pick the source of the request parameter (URL query or body) and,
//!   for bodies, the decoder for the `Content-Type` header.

use http::Method;

use crate::codec::Decoder;
use crate::error::ApiError;
use crate::registry::{ContentEncoder, DecoderMap};

/// Charsets accepted for request bodies.
const SUPPORTED_CHARSETS: [&str; 3] = ["", "utf8", "utf-8"];

/// The encoder chosen for a response.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated<'a> {
    pub encoder: &'a ContentEncoder,
    pub quality: f64,
}

impl Negotiated<'_> {
    pub fn content_type(&self) -> &str {
        self.encoder.content_type()
    }
}

/// Select the encoder that best satisfies `accept`.
///
/// An empty header is treated as `*/*`. The encoder with the highest quality
/// wins; on a tie the one listed first is kept. Fails with `406 Not
/// Acceptable` when no encoder scores above zero.
pub fn negotiate_encoder<'a>(
    accept: &str,
    encoders: &'a [ContentEncoder],
) -> Result<Negotiated<'a>, ApiError> {
    let accept = if accept.is_empty() { "*/*" } else { accept };

    let mut best: Option<Negotiated<'a>> = None;
    for encoder in encoders {
        let quality = accepts(accept, encoder.content_type());
        let best_quality = best.map(|b| b.quality).unwrap_or(0.0);
        if quality > best_quality {
            best = Some(Negotiated { encoder, quality });
        }
    }

    best.ok_or_else(|| {
        ApiError::not_acceptable(accept, encoders.iter().map(ContentEncoder::content_type))
    })
}

/// Quality with which the `accept` header accepts `content_type` (0 = not at all).
///
/// A simplified RFC 2616 parser: every comma separated media range is matched
/// against `content_type` (`type/subtype`, `type/*` and `*/*` are supported)
/// and the highest `q` among the matching ranges is returned. A matching range
/// without a usable `q` parameter counts as `1.0`.
pub fn accepts(accept: &str, content_type: &str) -> f64 {
    if accept == content_type || accept == "*/*" || accept.is_empty() {
        return 1.0;
    }

    let (group, subtype) = split(content_type, "/");
    let mut score: f64 = 0.0;
    for field in accept.split(',') {
        let mut tokens = field.split(';');
        let range = tokens.next().unwrap_or_default();
        let (range_group, range_subtype) = split(range, "/");

        let subtype_matches = range_subtype == subtype || range_subtype == "*";
        let group_matches = (range_group == "*" && range_subtype == "*") || range_group == group;
        if !(subtype_matches && group_matches) {
            continue;
        }

        let q = tokens
            .map(|param| split(param, "="))
            .filter(|(key, _)| *key == "q")
            .find_map(|(_, value)| value.parse::<f64>().ok().filter(|q| q.is_finite()))
            .unwrap_or(1.0);
        score = score.max(q);
    }
    score
}

/// Where the request parameter is read from.
#[derive(Clone, Copy)]
pub enum DecodeSource<'a> {
    /// The URL query string, parsed as a form.
    Query,
    /// The request body, with the decoder registered for its media type.
    Body(&'a dyn Decoder),
}

impl std::fmt::Debug for DecodeSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => f.write_str("Query"),
            Self::Body(_) => f.write_str("Body"),
        }
    }
}

/// Whether requests with this method carry their parameter in the body.
pub fn has_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PATCH | Method::PUT)
}

/// Select the parameter source for a request.
///
/// Methods without a body always read the query string. For POST, PATCH and
/// PUT the charset must be UTF-8 (or unspecified) and the media type must have
/// a registered decoder; both failures are `415 Unsupported Media Type`.
pub fn negotiate_decoder<'a>(
    method: &Method,
    content_type: &str,
    decoders: &'a DecoderMap,
) -> Result<DecodeSource<'a>, ApiError> {
    if !has_body(method) {
        return Ok(DecodeSource::Query);
    }

    let charset = charset(method, content_type);
    if !SUPPORTED_CHARSETS.contains(&charset.as_str()) {
        return Err(ApiError::unsupported_charset(&charset));
    }

    let media_type = media_type(content_type);
    match decoders.get(&media_type) {
        Some(decoder) => Ok(DecodeSource::Body(decoder.as_ref())),
        None => Err(ApiError::unsupported_content_type(
            &media_type,
            decoders.keys().cloned(),
        )),
    }
}

/// Lower-case `charset` parameter of a body-carrying request, or `""`.
pub fn charset(method: &Method, content_type: &str) -> String {
    if !has_body(method) {
        return String::new();
    }
    let content_type = content_type.to_ascii_lowercase();
    let (_, params) = split(&content_type, ";");
    let (_, charset) = split(params, "charset=");
    let (charset, _) = split(charset, ";");
    charset.trim_matches('"').to_string()
}

/// Lower-case media type without parameters:
/// `"application/json; charset=utf-8"` → `"application/json"`.
pub fn media_type(content_type: &str) -> String {
    let (media_type, _) = split(content_type, ";");
    media_type.to_ascii_lowercase()
}

/// Split at the first `sep`, trimming both halves. The second half is empty when
/// `sep` does not occur.
fn split<'s>(s: &'s str, sep: &str) -> (&'s str, &'s str) {
    match s.split_once(sep) {
        Some((a, b)) => (a.trim(), b.trim()),
        None => (s.trim(), ""),
    }
}
