//! Codec registry: the encoders and decoders an endpoint may negotiate.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{
    Decoder, Encoder, FormDecoder, JsonDecoder, JsonEncoder, PrettyJsonEncoder, XmlDecoder,
    XmlEncoder,
};

pub const TEXT_HTML: &str = "text/html";
pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_XML: &str = "text/xml";
pub const APPLICATION_XML: &str = "application/xml";
pub const APPLICATION_FORM: &str = "application/x-www-form-urlencoded";

/// An [`Encoder`] producing the representation named by `content_type`.
///
/// Requests whose `Accept` header matches the content type use this encoder.
#[derive(Clone)]
pub struct ContentEncoder {
    content_type: String,
    encoder: Arc<dyn Encoder>,
}

impl ContentEncoder {
    pub fn new<S, E>(content_type: S, encoder: E) -> Self
    where
        S: Into<String>,
        E: Encoder,
    {
        Self {
            content_type: content_type.into(),
            encoder: Arc::new(encoder),
        }
    }

    /// Pair a content type with an already shared encoder.
    pub fn from_arc<S: Into<String>>(content_type: S, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            content_type: content_type.into(),
            encoder,
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }
}

impl std::fmt::Debug for ContentEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContentEncoder")
            .field(&self.content_type)
            .finish()
    }
}

/// Decoders keyed by lower-case media type (no parameters).
pub type DecoderMap = BTreeMap<String, Arc<dyn Decoder>>;

/// The set of codecs available to an endpoint.
///
/// Encoder order matters: when several encoders match the `Accept` header
/// equally well, the first one wins, and an `Accept: */*` request gets the
/// first encoder.
///
/// `Codecs` is cheap to clone and immutable once built. Customizing a copy
/// with [`with_encoders`](Self::with_encoders) or
/// [`with_decoders`](Self::with_decoders) replaces that part wholesale and
/// leaves the original untouched.
#[derive(Clone)]
pub struct Codecs {
    encoders: Arc<[ContentEncoder]>,
    decoders: Arc<DecoderMap>,
}

impl Codecs {
    pub fn new(encoders: Vec<ContentEncoder>, decoders: DecoderMap) -> Self {
        Self {
            encoders: encoders.into(),
            decoders: Arc::new(normalize(decoders)),
        }
    }

    /// `text/html` (pretty JSON), `application/json`, `text/xml`, `application/xml`.
    pub fn default_encoders() -> Vec<ContentEncoder> {
        let xml: Arc<dyn Encoder> = Arc::new(XmlEncoder);
        vec![
            ContentEncoder::new(TEXT_HTML, PrettyJsonEncoder),
            ContentEncoder::new(APPLICATION_JSON, JsonEncoder),
            ContentEncoder::from_arc(TEXT_XML, xml.clone()),
            ContentEncoder::from_arc(APPLICATION_XML, xml),
        ]
    }

    /// JSON, XML (`text/xml` and `application/xml`) and url-encoded forms.
    pub fn default_decoders() -> DecoderMap {
        let xml: Arc<dyn Decoder> = Arc::new(XmlDecoder);
        let mut decoders = DecoderMap::new();
        decoders.insert(APPLICATION_JSON.to_string(), Arc::new(JsonDecoder));
        decoders.insert(TEXT_XML.to_string(), xml.clone());
        decoders.insert(APPLICATION_XML.to_string(), xml);
        decoders.insert(APPLICATION_FORM.to_string(), Arc::new(FormDecoder));
        decoders
    }

    /// Replace the encoder list.
    pub fn with_encoders(mut self, encoders: Vec<ContentEncoder>) -> Self {
        self.encoders = encoders.into();
        self
    }

    /// Replace the decoder map.
    pub fn with_decoders(mut self, decoders: DecoderMap) -> Self {
        self.decoders = Arc::new(normalize(decoders));
        self
    }

    pub fn encoders(&self) -> &[ContentEncoder] {
        &self.encoders
    }

    pub fn decoders(&self) -> &DecoderMap {
        &self.decoders
    }

    /// Registered response content types, in negotiation order.
    pub fn supported_content_types(&self) -> impl Iterator<Item = &str> {
        self.encoders.iter().map(ContentEncoder::content_type)
    }
}

impl Default for Codecs {
    fn default() -> Self {
        Self::new(Self::default_encoders(), Self::default_decoders())
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codecs")
            .field("encoders", &self.encoders)
            .field("decoders", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn normalize(decoders: DecoderMap) -> DecoderMap {
    decoders
        .into_iter()
        .map(|(media_type, decoder)| (media_type.trim().to_ascii_lowercase(), decoder))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoder_order() {
        let codecs = Codecs::default();
        let types: Vec<_> = codecs.supported_content_types().collect();
        assert_eq!(
            types,
            vec![TEXT_HTML, APPLICATION_JSON, TEXT_XML, APPLICATION_XML]
        );
    }

    #[test]
    fn test_default_decoders() {
        let codecs = Codecs::default();
        let keys: Vec<_> = codecs.decoders().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![APPLICATION_JSON, APPLICATION_FORM, APPLICATION_XML, TEXT_XML]
        );
    }

    #[test]
    fn test_with_encoders_replaces_without_touching_original() {
        let defaults = Codecs::default();
        let custom = defaults
            .clone()
            .with_encoders(vec![ContentEncoder::new("application/vnd.api+json", JsonEncoder)]);

        assert_eq!(custom.encoders().len(), 1);
        assert_eq!(custom.encoders()[0].content_type(), "application/vnd.api+json");
        assert_eq!(defaults.encoders().len(), 4);
        // decoders are still shared
        assert!(Arc::ptr_eq(&defaults.decoders, &custom.decoders));
    }

    #[test]
    fn test_with_decoders_normalizes_keys() {
        let mut decoders = DecoderMap::new();
        decoders.insert(" Application/JSON ".to_string(), Arc::new(JsonDecoder));
        let codecs = Codecs::default().with_decoders(decoders);
        let keys: Vec<_> = codecs.decoders().keys().map(String::as_str).collect();
        assert_eq!(keys, vec![APPLICATION_JSON]);
    }
}
