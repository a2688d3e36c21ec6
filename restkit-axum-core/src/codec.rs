//! Body codecs.
//!
//! This module provides the [`Encoder`] and [`Decoder`] traits used to
//! serialize responses and deserialize request parameters, plus the built-in
//! implementations:
//! - [`JsonEncoder`] / [`PrettyJsonEncoder`] / [`JsonDecoder`]: JSON via `serde_json`
//! - [`XmlEncoder`] / [`XmlDecoder`]: XML via `quick-xml`
//! - [`FormDecoder`]: `application/x-www-form-urlencoded` and URL query strings
//!
//! Codecs are object safe so they can be stored in a registry and swapped per
//! endpoint. Values cross the trait boundary type-erased through `erased-serde`,
//! which keeps the usual serde attributes (`rename`, `alias`, `default`, ...)
//! as the way to map field names for every wire format.

use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Error produced by a codec.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("{0}")]
    Encode(String),
    /// The body could not be deserialized.
    #[error("{0}")]
    Decode(String),
}

impl CodecError {
    pub fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Serializes a response value into a body.
///
/// # Example
///
/// ```ignore
/// use restkit_axum_core::{CodecError, Encoder};
///
/// struct YamlEncoder;
///
/// impl Encoder for YamlEncoder {
///     fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>, CodecError> {
///         serde_yaml::to_string(value).map(String::into_bytes).map_err(CodecError::encode)
///     }
/// }
/// ```
pub trait Encoder: Send + Sync + 'static {
    /// Serialize a value.
    fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>, CodecError>;

    /// Serialize an error payload.
    ///
    /// Formats that cannot represent free-form details override this to drop them.
    fn encode_error(&self, err: &ApiError) -> Result<Vec<u8>, CodecError> {
        self.encode(err)
    }
}

/// Visitor handed to a [`Decoder`]; receives the format's deserializer.
pub type Visit<'a> = &'a mut dyn FnMut(
    &mut dyn erased_serde::Deserializer<'_>,
) -> Result<(), erased_serde::Error>;

/// Deserializes a request body.
///
/// Implementations build a deserializer for their format over `body` and pass
/// it to `visit`. Use [`decode_as`] to get a typed value out of a decoder.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, body: &[u8], visit: Visit<'_>) -> Result<(), CodecError>;
}

/// Decode `body` into a fresh `T` with the given decoder.
pub fn decode_as<T>(decoder: &dyn Decoder, body: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    let mut value = None;
    decoder.decode(
        body,
        &mut |de: &mut dyn erased_serde::Deserializer<'_>| {
            value = Some(erased_serde::deserialize::<T>(de)?);
            Ok(())
        },
    )?;
    value.ok_or_else(|| CodecError::Decode("decoder produced no value".to_string()))
}

// ============================================================================
// JSON
// ============================================================================

/// Compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::encode)
    }
}

/// JSON indented with four spaces, for humans browsing the API.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyJsonEncoder;

impl Encoder for PrettyJsonEncoder {
    fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        serde::Serialize::serialize(value, &mut ser).map_err(CodecError::encode)?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, body: &[u8], visit: Visit<'_>) -> Result<(), CodecError> {
        let mut de = serde_json::Deserializer::from_slice(body);
        visit(&mut <dyn erased_serde::Deserializer>::erase(&mut de)).map_err(CodecError::decode)?;
        // Reject trailing garbage after the value.
        de.end().map_err(CodecError::decode)
    }
}

// ============================================================================
// XML
// ============================================================================

/// XML. The root element is named after the serialized type.
///
/// Error payloads are written without `details`.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlEncoder;

impl Encoder for XmlEncoder {
    fn encode(&self, value: &dyn erased_serde::Serialize) -> Result<Vec<u8>, CodecError> {
        quick_xml::se::to_string(value)
            .map(String::into_bytes)
            .map_err(CodecError::encode)
    }

    fn encode_error(&self, err: &ApiError) -> Result<Vec<u8>, CodecError> {
        self.encode(&err.without_details())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDecoder;

impl Decoder for XmlDecoder {
    fn decode(&self, body: &[u8], visit: Visit<'_>) -> Result<(), CodecError> {
        let text = std::str::from_utf8(body).map_err(CodecError::decode)?;
        let mut de = quick_xml::de::Deserializer::from_str(text);
        visit(&mut <dyn erased_serde::Deserializer>::erase(&mut de)).map_err(CodecError::decode)
    }
}

// ============================================================================
// Form
// ============================================================================

/// `key=value&key2=value2` pairs, as sent by HTML forms and in URL query strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormDecoder;

impl Decoder for FormDecoder {
    fn decode(&self, body: &[u8], visit: Visit<'_>) -> Result<(), CodecError> {
        let de = serde_urlencoded::Deserializer::new(form_urlencoded::parse(body));
        visit(&mut <dyn erased_serde::Deserializer>::erase(de)).map_err(CodecError::decode)
    }
}
