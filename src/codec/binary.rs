use super::CodecError;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Nibbles are grouped from the least-significant end; leading zero
/// nibbles are kept.
pub fn binary_to_hex(bits: &str) -> Result<String, CodecError> {
    let digits: Vec<char> = bits.chars().collect();
    if let Some((position, &found)) = digits
        .iter()
        .enumerate()
        .find(|(_, ch)| **ch != '0' && **ch != '1')
    {
        return Err(CodecError::InvalidBinaryDigit { position, found });
    }

    let mut out: Vec<u8> = digits
        .rchunks(4)
        .map(|nibble| {
            let value = nibble
                .iter()
                .fold(0usize, |acc, bit| acc * 2 + usize::from(*bit == '1'));
            HEX_UPPER[value]
        })
        .collect();
    out.reverse();
    Ok(out.into_iter().map(char::from).collect())
}

pub fn hex_to_binary(hex: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(hex.len() * 4);
    for (position, found) in hex.chars().enumerate() {
        let value = found
            .to_digit(16)
            .ok_or(CodecError::InvalidHexDigit { position, found })?;
        out.push_str(&format!("{value:04b}"));
    }
    Ok(out)
}
