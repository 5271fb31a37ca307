use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(alias = "EPC")]
    pub epc: String,
    #[serde(alias = "PCBits")]
    pub pc_bits: String,
    #[serde(alias = "Length")]
    pub length: String,
    #[serde(alias = "EPCLengthBits")]
    pub epc_length_bits: String,
    #[serde(alias = "ReadData")]
    pub read_data: String,
}

pub type TagFields = Tag;

impl Tag {
    pub fn new(
        epc: impl Into<String>,
        pc_bits: impl Into<String>,
        length: impl Into<String>,
        epc_length_bits: impl Into<String>,
        read_data: impl Into<String>,
    ) -> Self {
        Self {
            epc: epc.into(),
            pc_bits: pc_bits.into(),
            length: length.into(),
            epc_length_bits: epc_length_bits.into(),
            read_data: read_data.into(),
        }
    }

    pub fn key(&self) -> TagKey {
        TagKey::from(self)
    }

    pub fn tile_id(&self) -> TileId {
        TileId::for_tag(self)
    }

    pub fn category(&self) -> EpcCategory {
        EpcCategory::from_bits(&self.epc_length_bits)
    }

    /// `length/epcLengthBits/pcBits/readData`, the secondary line of a tile.
    pub fn summary_line(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.length, self.epc_length_bits, self.pc_bits, self.read_data
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagKey {
    epc: String,
    length: String,
    epc_length_bits: String,
    pc_bits: String,
    read_data: String,
}

impl TagKey {
    pub fn epc(&self) -> &str {
        &self.epc
    }

    pub fn tile_id(&self) -> TileId {
        TileId::from_parts([
            self.epc.as_str(),
            self.length.as_str(),
            self.epc_length_bits.as_str(),
            self.pc_bits.as_str(),
            self.read_data.as_str(),
        ])
    }
}

impl From<&Tag> for TagKey {
    fn from(tag: &Tag) -> Self {
        Self {
            epc: tag.epc.clone(),
            length: tag.length.clone(),
            epc_length_bits: tag.epc_length_bits.clone(),
            pc_bits: tag.pc_bits.clone(),
            read_data: tag.read_data.clone(),
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{}/{}/{})",
            self.epc, self.length, self.epc_length_bits, self.pc_bits, self.read_data
        )
    }
}

/// Wrapping `h * 31 + unit` over the UTF-16 units of the five fields. Only a
/// label: collisions are possible, lookups go through [`TagKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId(i32);

impl TileId {
    pub fn for_tag(tag: &Tag) -> Self {
        tag.key().tile_id()
    }

    fn from_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hash: i32 = 0;
        for part in parts {
            for unit in part.encode_utf16() {
                hash = hash.wrapping_mul(31).wrapping_add(i32::from(unit));
            }
        }
        Self(hash)
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EpcCategory {
    Bits80,
    Bits96,
    Bits128,
    Other,
}

impl EpcCategory {
    pub fn from_bits(raw: &str) -> Self {
        match raw.trim().parse::<u32>() {
            Ok(80) => EpcCategory::Bits80,
            Ok(96) => EpcCategory::Bits96,
            Ok(128) => EpcCategory::Bits128,
            _ => EpcCategory::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EpcCategory::Bits80 => "80-bit",
            EpcCategory::Bits96 => "96-bit",
            EpcCategory::Bits128 => "128-bit",
            EpcCategory::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tag {
        Tag::new("AA", "0000", "16", "80", "1111")
    }

    #[test]
    fn tile_id_matches_string_hash_of_concatenated_fields() {
        // "hello" hashes to 99162322 under h * 31 + unit.
        let tag = Tag::new("hel", "", "l", "", "o");
        assert_eq!(tag.tile_id().value(), 99_162_322);
        assert_eq!(Tag::default().tile_id().value(), 0);
    }

    #[test]
    fn tile_id_is_stable_across_calls() {
        let tag = sample();
        assert_eq!(tag.tile_id(), tag.tile_id());
        assert_eq!(tag.tile_id(), tag.clone().key().tile_id());
    }

    #[test]
    fn tile_id_wraps_instead_of_overflowing() {
        let tag = Tag::new("e2801160600002054cc2096f", "3000", "18", "96", "ffff");
        let id = tag.tile_id();
        assert_eq!(id, tag.tile_id());
    }

    #[test]
    fn key_equality_covers_every_field() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.key(), b.key());
        b.read_data.push('2');
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn category_is_derived_from_length_bits() {
        assert_eq!(EpcCategory::from_bits("80"), EpcCategory::Bits80);
        assert_eq!(EpcCategory::from_bits(" 96 "), EpcCategory::Bits96);
        assert_eq!(EpcCategory::from_bits("128"), EpcCategory::Bits128);
        assert_eq!(EpcCategory::from_bits("64"), EpcCategory::Other);
        assert_eq!(EpcCategory::from_bits(""), EpcCategory::Other);
    }

    #[test]
    fn summary_line_orders_fields_like_the_tile() {
        assert_eq!(sample().summary_line(), "16/80/0000/1111");
    }
}
