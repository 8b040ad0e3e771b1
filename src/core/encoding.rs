//! Purpose: Detect and convert the object encodings found in etcd values.
//! Exports: `Format`, `MediaType`, `TypeMeta`, `detect_and_extract`, `convert`, `decode_object`.
//! Role: Conversion boundary used for single-value extraction and best-effort summary decoding.
//! Invariants: Detection order is storage-binary prefix, then embedded JSON object, then YAML text.
//! Invariants: Conversion output is fully rendered before the first byte reaches the sink.
//! Notes: Kubernetes protobuf objects pass through untouched; decoding them needs their schema.
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

/// Magic prefix of Kubernetes' storage-binary (protobuf) object encoding.
pub const STORAGE_BINARY_PREFIX: &[u8] = b"k8s\x00";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Json,
    Yaml,
    Proto,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Proto => "proto",
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "json" => Ok(Format::Json),
            "yaml" => Ok(Format::Yaml),
            "proto" => Ok(Format::Proto),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported output format `{other}`"))
                .with_hint("Use one of: json, yaml, proto.")),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaType {
    StorageBinary,
    Json,
    Yaml,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::StorageBinary => "application/vnd.kubernetes.storagebinary",
            MediaType::Json => "application/json",
            MediaType::Yaml => "application/yaml",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TypeMeta {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
}

impl TypeMeta {
    fn from_object(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let api_version = object.get("apiVersion").and_then(Value::as_str);
        let kind = object.get("kind").and_then(Value::as_str);
        if api_version.is_none() && kind.is_none() {
            return None;
        }
        Some(Self {
            api_version: api_version.unwrap_or_default().to_string(),
            kind: kind.unwrap_or_default().to_string(),
        })
    }
}

// runtime.Unknown, the envelope following the storage-binary prefix.
#[derive(Clone, PartialEq, ::prost::Message)]
struct UnknownEnvelope {
    #[prost(message, optional, tag = "1")]
    type_meta: Option<EnvelopeTypeMeta>,
    #[prost(bytes = "vec", tag = "2")]
    raw: Vec<u8>,
    #[prost(string, tag = "3")]
    content_encoding: String,
    #[prost(string, tag = "4")]
    content_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct EnvelopeTypeMeta {
    #[prost(string, tag = "1")]
    api_version: String,
    #[prost(string, tag = "2")]
    kind: String,
}

/// Structured view of a value, when one could be recovered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedObject {
    pub object: Option<Value>,
    pub type_meta: Option<TypeMeta>,
}

/// Finds the encoding of `raw` and the slice holding the encoded object.
pub fn detect_and_extract(raw: &[u8]) -> Result<(MediaType, &[u8]), Error> {
    if raw.is_empty() {
        return Err(Error::new(ErrorKind::Conversion).with_message("value is empty"));
    }
    if let Some(start) = raw.find(STORAGE_BINARY_PREFIX) {
        return Ok((MediaType::StorageBinary, &raw[start..]));
    }
    if let Some(start) = raw.find_byte(b'{') {
        let candidate = &raw[start..];
        if serde_json::from_slice::<serde::de::IgnoredAny>(candidate).is_ok() {
            return Ok((MediaType::Json, candidate));
        }
    }
    if is_binary(raw) {
        return Err(Error::new(ErrorKind::Conversion)
            .with_message("unable to detect encoding of binary value")
            .with_hint("Use --raw to print the value bytes as-is."));
    }
    Ok((MediaType::Yaml, raw))
}

/// Converts `raw` into `target` and writes it to `out`.
///
/// Returns the object's type metadata when the input carries one.
pub fn convert<W: Write>(
    raw: &[u8],
    target: Format,
    out: &mut W,
) -> Result<Option<TypeMeta>, Error> {
    let (media, data) = detect_and_extract(raw)?;
    let (rendered, type_meta) = match (media, target) {
        (MediaType::StorageBinary, Format::Proto) => (data.to_vec(), envelope_type_meta(data)),
        (MediaType::StorageBinary, _) | (_, Format::Proto) => {
            return Err(unsupported(media, target));
        }
        (_, Format::Json) => {
            let value = parse_object(media, data)?;
            let mut rendered = serde_json::to_vec_pretty(&value).map_err(|err| {
                Error::new(ErrorKind::Conversion)
                    .with_message("failed to render json")
                    .with_source(err)
            })?;
            rendered.push(b'\n');
            (rendered, TypeMeta::from_object(&value))
        }
        (_, Format::Yaml) => {
            let value = parse_object(media, data)?;
            let rendered = serde_yaml::to_string(&value).map_err(|err| {
                Error::new(ErrorKind::Conversion)
                    .with_message("failed to render yaml")
                    .with_source(err)
            })?;
            (rendered.into_bytes(), TypeMeta::from_object(&value))
        }
    };

    out.write_all(&rendered).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write converted value")
            .with_source(err)
    })?;
    Ok(type_meta)
}

/// Best-effort decode of a value into a JSON object; failures leave it empty.
pub fn decode_object(raw: &[u8]) -> DecodedObject {
    let detected = match detect_and_extract(raw) {
        Ok(detected) => detected,
        Err(err) => {
            tracing::trace!(error = %err, "value not decodable");
            return DecodedObject::default();
        }
    };
    match detected {
        (MediaType::StorageBinary, data) => DecodedObject {
            object: None,
            type_meta: envelope_type_meta(data),
        },
        (media, data) => match parse_object(media, data) {
            Ok(value) if value.is_object() => DecodedObject {
                type_meta: TypeMeta::from_object(&value),
                object: Some(value),
            },
            Ok(_) => DecodedObject::default(),
            Err(err) => {
                tracing::trace!(error = %err, "value not decodable");
                DecodedObject::default()
            }
        },
    }
}

fn parse_object(media: MediaType, data: &[u8]) -> Result<Value, Error> {
    match media {
        MediaType::Json => serde_json::from_slice::<Value>(data).map_err(|err| {
            Error::new(ErrorKind::Conversion)
                .with_message("invalid json value")
                .with_source(err)
        }),
        MediaType::Yaml => serde_yaml::from_slice::<Value>(data).map_err(|err| {
            Error::new(ErrorKind::Conversion)
                .with_message("invalid yaml value")
                .with_source(err)
        }),
        MediaType::StorageBinary => Err(unsupported(media, Format::Json)),
    }
}

fn envelope_type_meta(data: &[u8]) -> Option<TypeMeta> {
    let body = data.get(STORAGE_BINARY_PREFIX.len()..)?;
    match <UnknownEnvelope as ::prost::Message>::decode(body) {
        Ok(envelope) => envelope.type_meta.map(|meta| TypeMeta {
            api_version: meta.api_version,
            kind: meta.kind,
        }),
        Err(err) => {
            tracing::debug!(error = %err, "storage-binary envelope did not decode");
            None
        }
    }
}

fn unsupported(media: MediaType, target: Format) -> Error {
    let error = Error::new(ErrorKind::Conversion).with_message(format!(
        "cannot convert {} to {target}",
        media.as_str()
    ));
    match media {
        MediaType::StorageBinary => error.with_hint(
            "Kubernetes protobuf objects need their schema to convert; use -o proto to extract them as stored.",
        ),
        _ => error.with_hint("Text objects can be written as json or yaml."),
    }
}

fn is_binary(raw: &[u8]) -> bool {
    match std::str::from_utf8(raw) {
        Ok(text) => text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t')),
        Err(_) => true,
    }
}
