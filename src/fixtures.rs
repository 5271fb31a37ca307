use rand::seq::SliceRandom;
use rand::Rng;
use strum::{Display, EnumString};

use crate::codec::{binary_to_hex, CodecError};
use crate::model::Tag;

const HEX_LOWER: &[u8; 16] = b"0123456789abcdef";

/// First 14 bits of every generated EPC.
const EPC_HEADER: &str = "00110000001101";

static COMPANY_PREFIXES: [&str; 4] = [
    "11011001111110010001110010011",
    "11011010110110010111001010100",
    "11011001100011001101000000000",
    "10010110100010101010001000000",
];

struct Template {
    epc_prefix: &'static str,
    pc_bits: &'static str,
    length: &'static str,
    epc_length_bits: &'static str,
}

static ISO_TEMPLATES: [Template; 2] = [
    Template {
        epc_prefix: "dc20420c4c36",
        pc_bits: "29a9",
        length: "16",
        epc_length_bits: "80",
    },
    Template {
        epc_prefix: "c4a301c70d36cb32920b1dc1",
        pc_bits: "41a2",
        length: "22",
        epc_length_bits: "128",
    },
];

/// (hex digits, pc bits, length, epc length bits)
const PROPRIETARY_SHAPES: [(usize, &str, &str, &str); 2] =
    [(32, "4000", "22", "128"), (24, "3000", "18", "96")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum FixtureKind {
    Epc,
    Iso,
    Proprietary,
}

pub fn random_hex_string<R: Rng + ?Sized>(rng: &mut R, n: usize) -> String {
    (0..n.max(1))
        .map(|_| char::from(HEX_LOWER[rng.gen_range(0..HEX_LOWER.len())]))
        .collect()
}

pub fn random_epc_prefix<R: Rng + ?Sized>(rng: &mut R) -> Result<String, CodecError> {
    let company = COMPANY_PREFIXES
        .choose(rng)
        .copied()
        .unwrap_or(COMPANY_PREFIXES[0]);
    binary_to_hex(&format!("{EPC_HEADER}{company}"))
}

pub fn random_tag<R: Rng + ?Sized>(rng: &mut R, kind: FixtureKind) -> Result<Tag, CodecError> {
    let tag = match kind {
        FixtureKind::Epc => {
            let epc = format!("{}{}", random_epc_prefix(rng)?, random_hex_string(rng, 13));
            Tag::new(epc, "3000", "18", "96", random_hex_string(rng, 4))
        }
        FixtureKind::Iso => {
            let template = &ISO_TEMPLATES[rng.gen_range(0..ISO_TEMPLATES.len())];
            let epc = format!("{}{}", template.epc_prefix, random_hex_string(rng, 8));
            Tag::new(
                epc,
                template.pc_bits,
                template.length,
                template.epc_length_bits,
                random_hex_string(rng, 4),
            )
        }
        FixtureKind::Proprietary => {
            let (digits, pc_bits, length, bits) =
                PROPRIETARY_SHAPES[rng.gen_range(0..PROPRIETARY_SHAPES.len())];
            let epc = random_hex_string(rng, digits);
            Tag::new(epc, pc_bits, length, bits, random_hex_string(rng, 4))
        }
    };
    Ok(tag)
}
