use crate::{
    protocol::{
        ebcdic,
        field_definition::{DataEncoding, DataType, FieldDefinition, LengthEncoding},
        util::ByteCursor,
        Bcd,
    },
    FepError, FepResult,
};

// Per-field encode/decode, driven entirely by the field's definition.
//
// Values are strings throughout; BINARY fields carry hex strings. The
// encoder validates content and length before emitting, the decoder
// reports failures scoped to the field number so one bad field never
// poisons an unrelated message.

pub(crate) fn encode_field(
    def: &FieldDefinition,
    value: &str,
    out: &mut Vec<u8>,
) -> FepResult<()> {
    let n = def.number();
    validate_content(def, value)?;

    let data = if def.length_type().is_variable() {
        let data = encode_data(def, value)?;
        let char_len = value_length(def, value)?;
        if char_len > def.length() {
            return Err(FepError::field(
                n,
                format!("length {char_len} exceeds maximum {}", def.length()),
            ));
        }
        // the prefix carries the byte length of the encoded data
        if data.len() > def.length_type().prefix_capacity() {
            return Err(FepError::field(
                n,
                format!(
                    "{} data bytes do not fit a {:?} prefix",
                    data.len(),
                    def.length_type()
                ),
            ));
        }
        emit_length_prefix(def, data.len(), out)?;
        data
    } else {
        let padded = pad_fixed(def, value)?;
        encode_data(def, &padded)?
    };
    out.extend_from_slice(&data);
    Ok(())
}

pub(crate) fn decode_field(def: &FieldDefinition, cursor: &mut ByteCursor<'_>) -> FepResult<String> {
    let n = def.number();
    let byte_len = if def.length_type().is_variable() {
        let declared = read_length_prefix(def, cursor)?;
        let max = def.data_encoding().byte_length(def.length());
        if declared > max {
            return Err(FepError::field(
                n,
                format!("declared length {declared} exceeds maximum {max} bytes"),
            ));
        }
        declared
    } else {
        def.data_encoding().byte_length(def.length())
    };

    let bytes = cursor
        .take(byte_len)
        .map_err(|e| FepError::field(n, e.to_string()))?;
    let value = decode_data(def, bytes, byte_len)?;

    if def.length_type().is_variable() || def.data_encoding() == DataEncoding::Bcd {
        // variable values come back exactly as sent; BCD keeps its zeros
        Ok(value)
    } else {
        Ok(trim_fixed(def, &value))
    }
}

// --- content validation -------------------------------------------------

fn validate_content(def: &FieldDefinition, value: &str) -> FepResult<()> {
    let n = def.number();
    if !value.is_ascii() {
        return Err(FepError::field(n, "value contains non-ASCII characters"));
    }
    match def.data_type() {
        DataType::Numeric => {
            if !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FepError::field(n, format!("not numeric: {value:?}")));
            }
        }
        DataType::ExtendedBcd => {
            if !value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
            {
                return Err(FepError::field(n, "invalid extended-BCD content"));
            }
        }
        DataType::Track2 => {
            if !value
                .bytes()
                .all(|b| b.is_ascii_digit() || b == b'=' || b == b'D')
            {
                return Err(FepError::field(n, "invalid track 2 content"));
            }
        }
        DataType::Binary => {
            if value.len() % 2 != 0 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(FepError::field(
                    n,
                    "binary value must be an even-length hex string",
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

// Length in the unit the definition counts: characters, or bytes for
// BINARY (whose values are hex strings of twice as many characters).
fn value_length(def: &FieldDefinition, value: &str) -> FepResult<usize> {
    Ok(match def.data_encoding() {
        DataEncoding::Binary => value.len() / 2,
        _ => value.len(),
    })
}

// --- fixed-length padding ----------------------------------------------

fn pad_fixed(def: &FieldDefinition, value: &str) -> FepResult<String> {
    let n = def.number();
    let target = match def.data_encoding() {
        DataEncoding::Binary => value.len() / 2,
        _ => value.len(),
    };
    if target > def.length() {
        return Err(FepError::field(
            n,
            format!("length {target} exceeds fixed length {}", def.length()),
        ));
    }
    if def.data_encoding() == DataEncoding::Binary {
        if target != def.length() {
            return Err(FepError::field(
                n,
                format!(
                    "binary value is {target} bytes, definition requires {}",
                    def.length()
                ),
            ));
        }
        return Ok(value.to_string());
    }
    let missing = def.length() - value.len();
    if missing == 0 {
        return Ok(value.to_string());
    }
    // BCD preserves leading zeros, so numeric zero-fill applies there too
    let pad: String = std::iter::repeat(def.padding_char()).take(missing).collect();
    Ok(if def.left_padding() {
        format!("{pad}{value}")
    } else {
        format!("{value}{pad}")
    })
}

fn trim_fixed(def: &FieldDefinition, value: &str) -> String {
    if def.left_padding() {
        value
            .trim_start_matches(def.padding_char())
            .to_string()
    } else {
        value.trim_end_matches(def.padding_char()).to_string()
    }
}

// --- data bytes ---------------------------------------------------------

fn encode_data(def: &FieldDefinition, value: &str) -> FepResult<Vec<u8>> {
    let n = def.number();
    match def.data_encoding() {
        DataEncoding::Ascii => Ok(value.as_bytes().to_vec()),
        DataEncoding::Ebcdic => ebcdic::to_ebcdic(value).map_err(|e| field_scoped(n, &e)),
        DataEncoding::Binary => {
            hex::decode(value).map_err(|e| FepError::field(n, format!("invalid hex: {e}")))
        }
        DataEncoding::Bcd => match def.data_type() {
            DataType::Track2 | DataType::ExtendedBcd => pack_extended(n, value),
            _ => Bcd::pack(value).map_err(|e| field_scoped(n, &e)),
        },
    }
}

fn decode_data(def: &FieldDefinition, bytes: &[u8], byte_len: usize) -> FepResult<String> {
    let n = def.number();
    match def.data_encoding() {
        DataEncoding::Ascii => String::from_utf8(bytes.to_vec())
            .map_err(|e| FepError::field(n, format!("invalid ASCII data: {e}"))),
        DataEncoding::Ebcdic => ebcdic::from_ebcdic(bytes).map_err(|e| field_scoped(n, &e)),
        DataEncoding::Binary => Ok(hex::encode_upper(bytes)),
        DataEncoding::Bcd => {
            let digit_count = if def.length_type().is_variable() {
                // the prefix declared bytes; each byte holds two digits
                byte_len * 2
            } else {
                def.length()
            };
            match def.data_type() {
                DataType::Track2 | DataType::ExtendedBcd => {
                    unpack_extended(def, bytes, digit_count)
                }
                _ => Bcd::unpack(bytes, digit_count).map_err(|e| field_scoped(n, &e)),
            }
        }
    }
}

// Track 2 and extended BCD pack the nibble alphabet 0..=F; '=' is the
// track separator and travels as nibble 0xD.
fn pack_extended(n: u8, value: &str) -> FepResult<Vec<u8>> {
    let nibbles: Vec<u8> = value
        .bytes()
        .map(|b| match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            b'=' => Ok(0xD),
            _ => Err(FepError::field(
                n,
                format!("character {:?} not packable", char::from(b)),
            )),
        })
        .collect::<FepResult<_>>()?;
    let mut out = Vec::with_capacity(Bcd::byte_len(nibbles.len()));
    let odd = nibbles.len() % 2 == 1;
    let mut iter = nibbles.into_iter();
    if odd {
        out.push(iter.next().unwrap_or(0));
    }
    while let (Some(hi), Some(lo)) = (iter.next(), iter.next()) {
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn unpack_extended(def: &FieldDefinition, bytes: &[u8], digit_count: usize) -> FepResult<String> {
    let n = def.number();
    if bytes.len() != Bcd::byte_len(digit_count) {
        return Err(FepError::field(
            n,
            format!(
                "{} bytes cannot hold {digit_count} packed characters",
                bytes.len()
            ),
        ));
    }
    let mut value = String::with_capacity(digit_count);
    let skip_first = digit_count % 2 == 1;
    for (i, byte) in bytes.iter().enumerate() {
        for (pos, nibble) in [(0, byte >> 4), (1, byte & 0x0F)] {
            if i == 0 && pos == 0 && skip_first {
                continue;
            }
            let c = match nibble {
                0..=9 => char::from(b'0' + nibble),
                0xD if def.data_type() == DataType::Track2 => '=',
                10..=15 => char::from(b'A' + nibble - 10),
                _ => unreachable!(),
            };
            value.push(c);
        }
    }
    Ok(value)
}

// --- variable-length prefixes -------------------------------------------

fn emit_length_prefix(def: &FieldDefinition, byte_len: usize, out: &mut Vec<u8>) -> FepResult<()> {
    let digits = def.length_type().prefix_digits();
    let text = format!("{byte_len:0width$}", width = digits);
    match def.length_encoding() {
        LengthEncoding::Ascii => out.extend_from_slice(text.as_bytes()),
        LengthEncoding::Bcd => {
            out.extend_from_slice(&Bcd::pack(&text).map_err(|e| field_scoped(def.number(), &e))?);
        }
    }
    Ok(())
}

fn read_length_prefix(def: &FieldDefinition, cursor: &mut ByteCursor<'_>) -> FepResult<usize> {
    let n = def.number();
    let digits = def.length_type().prefix_digits();
    let prefix_bytes = def.length_encoding().prefix_byte_length(digits);
    let bytes = cursor
        .take(prefix_bytes)
        .map_err(|e| FepError::field(n, e.to_string()))?;
    let text = match def.length_encoding() {
        LengthEncoding::Ascii => String::from_utf8(bytes.to_vec())
            .map_err(|e| FepError::field(n, format!("invalid ASCII length prefix: {e}")))?,
        LengthEncoding::Bcd => Bcd::unpack(bytes, digits).map_err(|e| field_scoped(n, &e))?,
    };
    text.parse::<usize>()
        .map_err(|e| FepError::field(n, format!("length prefix {text:?}: {e}")))
}

fn field_scoped(n: u8, e: &FepError) -> FepError {
    FepError::field(n, e.to_string())
}

#[cfg(test)]
mod test {
    use super::{decode_field, encode_field};
    use crate::protocol::{
        field_definition::{DataEncoding, DataType, FieldDefinition, LengthEncoding, LengthType},
        util::ByteCursor,
    };

    fn def(
        n: u8,
        data_type: DataType,
        length_type: LengthType,
        length: usize,
        data_encoding: DataEncoding,
        length_encoding: LengthEncoding,
    ) -> FieldDefinition {
        FieldDefinition::new(
            n,
            format!("F{n}"),
            "",
            data_type,
            length_type,
            length,
            data_encoding,
            length_encoding,
            false,
            None,
            None,
        )
        .unwrap()
    }

    fn roundtrip(definition: &FieldDefinition, value: &str) -> String {
        let mut out = Vec::new();
        encode_field(definition, value, &mut out).unwrap();
        let mut cursor = ByteCursor::new(&out);
        let decoded = decode_field(definition, &mut cursor).unwrap();
        assert!(cursor.is_exhausted());
        decoded
    }

    #[test]
    fn test_llvar_bcd_pan() {
        let pan = def(
            2,
            DataType::Numeric,
            LengthType::Llvar,
            19,
            DataEncoding::Bcd,
            LengthEncoding::Bcd,
        );
        let mut out = Vec::new();
        encode_field(&pan, "4111111111111111", &mut out).unwrap();
        // 16 digits -> 8 data bytes, BCD prefix 0x08
        assert_eq!(out[0], 0x08);
        assert_eq!(out.len(), 9);
        assert_eq!(roundtrip(&pan, "4111111111111111"), "4111111111111111");
    }

    #[test]
    fn test_fixed_bcd_preserves_leading_zeros() {
        let amount = def(
            4,
            DataType::Numeric,
            LengthType::Fixed,
            12,
            DataEncoding::Bcd,
            LengthEncoding::Bcd,
        );
        let mut out = Vec::new();
        encode_field(&amount, "10000", &mut out).unwrap();
        assert_eq!(out, vec![0x00, 0x00, 0x00, 0x01, 0x00, 0x00]);
        let mut cursor = ByteCursor::new(&out);
        assert_eq!(decode_field(&amount, &mut cursor).unwrap(), "000000010000");
    }

    #[test]
    fn test_fixed_ascii_pads_and_trims() {
        let terminal = def(
            41,
            DataType::AlphaNumericSpecial,
            LengthType::Fixed,
            8,
            DataEncoding::Ascii,
            LengthEncoding::Ascii,
        );
        let mut out = Vec::new();
        encode_field(&terminal, "ATM1", &mut out).unwrap();
        assert_eq!(out, b"ATM1    ");
        assert_eq!(roundtrip(&terminal, "ATM1"), "ATM1");
    }

    #[test]
    fn test_numeric_rejects_letters() {
        let stan = def(
            11,
            DataType::Numeric,
            LengthType::Fixed,
            6,
            DataEncoding::Bcd,
            LengthEncoding::Bcd,
        );
        let mut out = Vec::new();
        assert!(encode_field(&stan, "12A456", &mut out).is_err());
    }

    #[test]
    fn test_variable_over_maximum_rejected() {
        let private = def(
            48,
            DataType::AlphaNumericSpecial,
            LengthType::Llvar,
            25,
            DataEncoding::Ascii,
            LengthEncoding::Ascii,
        );
        let mut out = Vec::new();
        let long = "x".repeat(26);
        assert!(encode_field(&private, &long, &mut out).is_err());
    }

    #[test]
    fn test_ascii_length_prefix() {
        let data = def(
            44,
            DataType::AlphaNumeric,
            LengthType::Llvar,
            25,
            DataEncoding::Ascii,
            LengthEncoding::Ascii,
        );
        let mut out = Vec::new();
        encode_field(&data, "HELLO", &mut out).unwrap();
        assert_eq!(&out[..2], b"05");
        assert_eq!(&out[2..], b"HELLO");
    }

    #[test]
    fn test_track2_separator() {
        let track2 = def(
            35,
            DataType::Track2,
            LengthType::Llvar,
            37,
            DataEncoding::Bcd,
            LengthEncoding::Bcd,
        );
        let value = "4111111111111111=2712101";
        assert_eq!(roundtrip(&track2, value), value);
    }

    #[test]
    fn test_binary_fixed() {
        let mac = def(
            64,
            DataType::Binary,
            LengthType::Fixed,
            8,
            DataEncoding::Binary,
            LengthEncoding::Bcd,
        );
        let mut out = Vec::new();
        encode_field(&mac, "0011223344556677", &mut out).unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(roundtrip(&mac, "0011223344556677"), "0011223344556677");
        let mut short = Vec::new();
        assert!(encode_field(&mac, "0011", &mut short).is_err());
    }

    #[test]
    fn test_declared_length_over_max_rejected_on_decode() {
        let data = def(
            44,
            DataType::AlphaNumeric,
            LengthType::Llvar,
            10,
            DataEncoding::Ascii,
            LengthEncoding::Ascii,
        );
        let bytes = b"99xxxxxxxx";
        let mut cursor = ByteCursor::new(bytes);
        assert!(decode_field(&data, &mut cursor).is_err());
    }
}
