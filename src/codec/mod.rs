use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::model::Tag;

pub mod binary;

pub use binary::{binary_to_hex, hex_to_binary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Add,
    Delete,
    /// Client intent only; expanded into delete + add before sending.
    Update,
    Retrieve,
    Retrieval,
    Error,
}

impl UpdateType {
    pub fn is_sendable(self) -> bool {
        matches!(
            self,
            UpdateType::Add | UpdateType::Delete | UpdateType::Retrieve
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },
    #[error("update type `{0}` is never sent over the wire")]
    NotSendable(UpdateType),
    #[error("invalid binary digit {found:?} at position {position}")]
    InvalidBinaryDigit { position: usize, found: char },
    #[error("invalid hex digit {found:?} at position {position}")]
    InvalidHexDigit { position: usize, found: char },
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        CodecError::MalformedMessage {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Added(Tag),
    Deleted(Tag),
    Retrieval(Vec<Tag>),
    Error,
}

impl ServerEvent {
    pub fn update_type(&self) -> UpdateType {
        match self {
            ServerEvent::Added(_) => UpdateType::Add,
            ServerEvent::Deleted(_) => UpdateType::Delete,
            ServerEvent::Retrieval(_) => UpdateType::Retrieval,
            ServerEvent::Error => UpdateType::Error,
        }
    }
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "updateType")]
    update_type: UpdateType,
    tag: OutboundTag<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundTag<'a> {
    pc_bits: &'a str,
    length: &'a str,
    epc_length_bits: &'a str,
    epc: &'a str,
    read_data: &'a str,
}

impl<'a> From<&'a Tag> for OutboundTag<'a> {
    fn from(tag: &'a Tag) -> Self {
        Self {
            pc_bits: &tag.pc_bits,
            length: &tag.length,
            epc_length_bits: &tag.epc_length_bits,
            epc: &tag.epc,
            read_data: &tag.read_data,
        }
    }
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "UpdateType", alias = "updateType")]
    update_type: String,
    #[serde(rename = "Tag", alias = "tag", default)]
    tag: Option<InboundTag>,
    #[serde(rename = "Tags", alias = "tags", default)]
    tags: Option<Vec<InboundTag>>,
}

#[derive(Deserialize)]
struct InboundTag {
    #[serde(rename = "PCBits", alias = "pcBits", default, deserialize_with = "text_or_number")]
    pc_bits: String,
    #[serde(rename = "Length", alias = "length", default, deserialize_with = "text_or_number")]
    length: String,
    #[serde(
        rename = "EPCLengthBits",
        alias = "epcLengthBits",
        default,
        deserialize_with = "text_or_number"
    )]
    epc_length_bits: String,
    #[serde(rename = "EPC", alias = "epc", default, deserialize_with = "text_or_number")]
    epc: String,
    #[serde(rename = "ReadData", alias = "readData", default, deserialize_with = "text_or_number")]
    read_data: String,
}

impl From<InboundTag> for Tag {
    fn from(raw: InboundTag) -> Self {
        Tag {
            epc: raw.epc,
            pc_bits: raw.pc_bits,
            length: raw.length,
            epc_length_bits: raw.epc_length_bits,
            read_data: raw.read_data,
        }
    }
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
        Raw::Null(()) => String::new(),
    })
}

pub fn encode(update_type: UpdateType, tag: &Tag) -> Result<String, CodecError> {
    if !update_type.is_sendable() {
        return Err(CodecError::NotSendable(update_type));
    }
    let frame = OutboundFrame {
        update_type,
        tag: OutboundTag::from(tag),
    };
    serde_json::to_string(&frame).map_err(|err| CodecError::malformed(err.to_string()))
}

pub fn encode_retrieve() -> Result<String, CodecError> {
    encode(UpdateType::Retrieve, &Tag::default())
}

pub fn decode(text: &str) -> Result<ServerEvent, CodecError> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|err| CodecError::malformed(err.to_string()))?;
    let update_type: UpdateType = frame
        .update_type
        .parse()
        .map_err(|_| CodecError::malformed(format!("unknown update type `{}`", frame.update_type)))?;

    match update_type {
        UpdateType::Add => frame
            .tag
            .map(|tag| ServerEvent::Added(tag.into()))
            .ok_or_else(|| CodecError::malformed("add event without a tag")),
        UpdateType::Delete => frame
            .tag
            .map(|tag| ServerEvent::Deleted(tag.into()))
            .ok_or_else(|| CodecError::malformed("delete event without a tag")),
        UpdateType::Retrieval => Ok(ServerEvent::Retrieval(
            frame
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(Tag::from)
                .collect(),
        )),
        UpdateType::Error => Ok(ServerEvent::Error),
        UpdateType::Update | UpdateType::Retrieve => Err(CodecError::malformed(format!(
            "client-only update type `{update_type}` received"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample() -> Tag {
        Tag::new("CC", "0000", "16", "80", "3333")
    }

    #[test]
    fn encodes_add_with_camel_case_keys() {
        let frame = encode(UpdateType::Add, &sample()).unwrap();
        insta::assert_snapshot!(
            frame,
            @r#"{"updateType":"add","tag":{"pcBits":"0000","length":"16","epcLengthBits":"80","epc":"CC","readData":"3333"}}"#
        );
    }

    #[test]
    fn encodes_retrieve_with_empty_tag() {
        let frame = encode_retrieve().unwrap();
        insta::assert_snapshot!(
            frame,
            @r#"{"updateType":"retrieve","tag":{"pcBits":"","length":"","epcLengthBits":"","epc":"","readData":""}}"#
        );
    }

    #[test]
    fn refuses_to_encode_client_only_types() {
        for kind in [UpdateType::Update, UpdateType::Retrieval, UpdateType::Error] {
            assert_matches!(encode(kind, &sample()), Err(CodecError::NotSendable(k)) if k == kind);
        }
    }

    #[test]
    fn decodes_pascal_case_add() {
        let raw = r#"{"UpdateType":"add","Tag":{"PCBits":"0000","Length":"16","EPCLengthBits":"80","EPC":"CC","ReadData":"3333"},"Tags":null}"#;
        assert_eq!(decode(raw).unwrap(), ServerEvent::Added(sample()));
    }

    #[test]
    fn decodes_echoed_camel_case_delete() {
        let raw = r#"{"updateType":"delete","tag":{"pcBits":"0000","length":"16","epcLengthBits":"80","epc":"CC","readData":"3333"}}"#;
        assert_eq!(decode(raw).unwrap(), ServerEvent::Deleted(sample()));
    }

    #[test]
    fn numeric_length_bits_decode_as_text() {
        let raw = r#"{"UpdateType":"add","Tag":{"PCBits":"0000","Length":16,"EPCLengthBits":80,"EPC":"CC","ReadData":"3333"}}"#;
        assert_eq!(decode(raw).unwrap(), ServerEvent::Added(sample()));
    }

    #[test]
    fn retrieval_with_null_or_missing_tags_is_empty() {
        let null = r#"{"UpdateType":"retrieval","Tag":{},"Tags":null}"#;
        let missing = r#"{"UpdateType":"retrieval"}"#;
        assert_eq!(decode(null).unwrap(), ServerEvent::Retrieval(Vec::new()));
        assert_eq!(decode(missing).unwrap(), ServerEvent::Retrieval(Vec::new()));
    }

    #[test]
    fn retrieval_keeps_server_order() {
        let raw = r#"{"UpdateType":"retrieval","Tags":[
            {"PCBits":"0000","Length":"16","EPCLengthBits":"80","EPC":"AA","ReadData":"1111"},
            {"PCBits":"0000","Length":"16","EPCLengthBits":"80","EPC":"BB","ReadData":"2222"}
        ]}"#;
        let ServerEvent::Retrieval(tags) = decode(raw).unwrap() else {
            panic!("expected retrieval");
        };
        let epcs: Vec<_> = tags.iter().map(|tag| tag.epc.as_str()).collect();
        assert_eq!(epcs, ["AA", "BB"]);
    }

    #[test]
    fn error_frame_carries_no_payload() {
        assert_eq!(
            decode(r#"{"UpdateType":"error"}"#).unwrap(),
            ServerEvent::Error
        );
    }

    #[test]
    fn malformed_frames_are_reported() {
        let cases = [
            "not json",
            r#"{"Tag":{}}"#,
            r#"{"UpdateType":"explode"}"#,
            r#"{"UpdateType":"add"}"#,
            r#"{"UpdateType":"delete","Tags":[]}"#,
            r#"{"UpdateType":"retrieve"}"#,
        ];
        for raw in cases {
            assert_matches!(
                decode(raw),
                Err(CodecError::MalformedMessage { .. }),
                "{raw}"
            );
        }
    }

    #[test]
    fn update_type_uses_lowercase_spelling() {
        assert_eq!(UpdateType::Retrieval.to_string(), "retrieval");
        assert_eq!("delete".parse::<UpdateType>().unwrap(), UpdateType::Delete);
        assert!("Delete".parse::<UpdateType>().is_err());
    }
}
