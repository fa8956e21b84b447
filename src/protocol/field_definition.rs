use crate::{FepError, FepResult};
use serde::{Deserialize, Serialize};

/// Content class of a field, as declared in the definition source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Numeric,
    Alpha,
    Special,
    AlphaNumeric,
    AlphaNumericSpecial,
    NumericSpecial,
    Binary,
    Track2,
    ExtendedBcd,
}

impl DataType {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "NUMERIC" => Self::Numeric,
            "ALPHA" => Self::Alpha,
            "SPECIAL" => Self::Special,
            "ALPHA_NUMERIC" => Self::AlphaNumeric,
            "ALPHA_NUMERIC_SPECIAL" => Self::AlphaNumericSpecial,
            "NUMERIC_SPECIAL" => Self::NumericSpecial,
            "BINARY" => Self::Binary,
            "TRACK2" => Self::Track2,
            "EXTENDED_BCD" => Self::ExtendedBcd,
            _ => return None,
        })
    }

    /// Digit-only content; drives the zero-padding default and the
    /// all-digits validation at encode time.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Numeric | Self::ExtendedBcd)
    }
}

/// Length rule of a field: fixed, or variable with a 2/3/4-digit prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LengthType {
    Fixed,
    Llvar,
    Lllvar,
    Llllvar,
}

impl LengthType {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "FIXED" => Self::Fixed,
            "LLVAR" => Self::Llvar,
            "LLLVAR" => Self::Lllvar,
            "LLLLVAR" => Self::Llllvar,
            _ => return None,
        })
    }

    /// Number of decimal digits in the length prefix; 0 for fixed.
    pub fn prefix_digits(self) -> usize {
        match self {
            Self::Fixed => 0,
            Self::Llvar => 2,
            Self::Lllvar => 3,
            Self::Llllvar => 4,
        }
    }

    /// Largest value the length prefix can carry.
    pub fn prefix_capacity(self) -> usize {
        match self {
            Self::Fixed => 0,
            Self::Llvar => 99,
            Self::Lllvar => 999,
            Self::Llllvar => 9_999,
        }
    }

    pub fn is_variable(self) -> bool {
        !matches!(self, Self::Fixed)
    }
}

/// How the field's data bytes are laid out on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataEncoding {
    Ascii,
    Bcd,
    Ebcdic,
    Binary,
}

impl DataEncoding {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "ASCII" => Self::Ascii,
            "BCD" => Self::Bcd,
            "EBCDIC" => Self::Ebcdic,
            "BINARY" => Self::Binary,
            _ => return None,
        })
    }

    /// Wire bytes occupied by a value of `len` declared units.
    ///
    /// BCD packs two digits per byte; ASCII and EBCDIC are one character
    /// per byte; for BINARY the declared length counts bytes (values are
    /// hex strings of twice as many characters).
    pub fn byte_length(self, len: usize) -> usize {
        match self {
            Self::Bcd => len.div_ceil(2),
            Self::Ascii | Self::Ebcdic | Self::Binary => len,
        }
    }
}

/// How a variable field's length prefix is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LengthEncoding {
    Ascii,
    Bcd,
}

impl LengthEncoding {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "ASCII" => Self::Ascii,
            "BCD" => Self::Bcd,
            _ => return None,
        })
    }

    /// Wire bytes occupied by a prefix of `digits` decimal digits.
    pub fn prefix_byte_length(self, digits: usize) -> usize {
        match self {
            Self::Ascii => digits,
            Self::Bcd => digits.div_ceil(2),
        }
    }
}

/// Layout of one data field, loaded from the definition source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDefinition {
    number: u8,
    name: String,
    description: String,
    data_type: DataType,
    length_type: LengthType,
    length: usize,
    data_encoding: DataEncoding,
    length_encoding: LengthEncoding,
    sensitive: bool,
    padding_char: char,
    left_padding: bool,
}

impl FieldDefinition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number: u8,
        name: impl Into<String>,
        description: impl Into<String>,
        data_type: DataType,
        length_type: LengthType,
        length: usize,
        data_encoding: DataEncoding,
        length_encoding: LengthEncoding,
        sensitive: bool,
        padding_char: Option<char>,
        left_padding: Option<bool>,
    ) -> FepResult<Self> {
        if !(2..=128).contains(&number) {
            return Err(FepError::UsageDetailed(format!(
                "field number {number} outside 2..=128"
            )));
        }
        if length == 0 {
            return Err(FepError::UsageDetailed(format!(
                "field {number}: length must be positive"
            )));
        }
        if length_type.is_variable() && length > length_type.prefix_capacity() {
            return Err(FepError::UsageDetailed(format!(
                "field {number}: max length {length} does not fit a {:?} prefix",
                length_type
            )));
        }
        // Numeric content left-pads with zeros, text right-pads with blanks.
        let padding_char = padding_char.unwrap_or(if data_type.is_numeric() { '0' } else { ' ' });
        let left_padding = left_padding.unwrap_or(data_type.is_numeric());
        Ok(Self {
            number,
            name: name.into(),
            description: description.into(),
            data_type,
            length_type,
            length,
            data_encoding,
            length_encoding,
            sensitive,
            padding_char,
            left_padding,
        })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn length_type(&self) -> LengthType {
        self.length_type
    }

    /// Exact length for fixed fields, maximum for variable ones, counted
    /// in characters (bytes for BINARY).
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn data_encoding(&self) -> DataEncoding {
        self.data_encoding
    }

    pub fn length_encoding(&self) -> LengthEncoding {
        self.length_encoding
    }

    /// Sensitive values (PAN, track data, PIN blocks) are masked in any
    /// human-readable rendering.
    pub fn sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn padding_char(&self) -> char {
        self.padding_char
    }

    pub fn left_padding(&self) -> bool {
        self.left_padding
    }
}

// One row of the JSON representation; CSV rows are funneled through the
// same record before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DefinitionRecord {
    field_number: u8,
    name: String,
    #[serde(default)]
    description: String,
    field_type: DataType,
    length_type: LengthType,
    length: usize,
    data_encoding: DataEncoding,
    length_encoding: LengthEncoding,
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    padding_char: Option<char>,
    #[serde(default)]
    left_padding: Option<bool>,
}

impl DefinitionRecord {
    fn finish(self, line: usize) -> FepResult<FieldDefinition> {
        FieldDefinition::new(
            self.field_number,
            self.name,
            self.description,
            self.field_type,
            self.length_type,
            self.length,
            self.data_encoding,
            self.length_encoding,
            self.sensitive,
            self.padding_char,
            self.left_padding,
        )
        .map_err(|e| FepError::Definition {
            line,
            reason: e.to_string(),
        })
    }
}

// Expected CSV column order; the header row is required but only checked
// for arity so that renamed headers keep working.
const CSV_COLUMNS: usize = 11;

pub(crate) fn parse_csv(source: &str) -> FepResult<Vec<FieldDefinition>> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(source.as_bytes());

    let mut definitions = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| {
            let line = e
                .position()
                .map_or(0, |p| usize::try_from(p.line()).unwrap_or(0));
            FepError::Definition {
                line,
                reason: e.to_string(),
            }
        })?;
        let line = record
            .position()
            .map_or(0, |p| usize::try_from(p.line()).unwrap_or(0));
        if record.len() != CSV_COLUMNS {
            return Err(FepError::Definition {
                line,
                reason: format!("expected {CSV_COLUMNS} columns, got {}", record.len()),
            });
        }
        definitions.push(parse_csv_record(&record, line)?);
    }
    Ok(definitions)
}

fn parse_csv_record(record: &csv::StringRecord, line: usize) -> FepResult<FieldDefinition> {
    let definition_err = |reason: String| FepError::Definition { line, reason };

    let field_number = record[0]
        .parse::<u8>()
        .map_err(|e| definition_err(format!("fieldNumber {:?}: {e}", &record[0])))?;
    let field_type = DataType::from_token(&record[3])
        .ok_or_else(|| definition_err(format!("unknown fieldType {:?}", &record[3])))?;
    let length_type = LengthType::from_token(&record[4])
        .ok_or_else(|| definition_err(format!("unknown lengthType {:?}", &record[4])))?;
    let length = record[5]
        .parse::<usize>()
        .map_err(|e| definition_err(format!("length {:?}: {e}", &record[5])))?;
    let data_encoding = DataEncoding::from_token(&record[6])
        .ok_or_else(|| definition_err(format!("unknown dataEncoding {:?}", &record[6])))?;
    let length_encoding = LengthEncoding::from_token(&record[7])
        .ok_or_else(|| definition_err(format!("unknown lengthEncoding {:?}", &record[7])))?;
    let sensitive = parse_bool(&record[8])
        .ok_or_else(|| definition_err(format!("sensitive {:?} is not a boolean", &record[8])))?;
    let padding_char = match &record[9] {
        "" => None,
        s if s.chars().count() == 1 => s.chars().next(),
        s => {
            return Err(definition_err(format!(
                "paddingChar {s:?} must be a single character"
            )))
        }
    };
    let left_padding = match &record[10] {
        "" => None,
        s => Some(
            parse_bool(s)
                .ok_or_else(|| definition_err(format!("leftPadding {s:?} is not a boolean")))?,
        ),
    };

    DefinitionRecord {
        field_number,
        name: record[1].to_string(),
        description: record[2].to_string(),
        field_type,
        length_type,
        length,
        data_encoding,
        length_encoding,
        sensitive,
        padding_char,
        left_padding,
    }
    .finish(line)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "TRUE" | "1" => Some(true),
        "false" | "FALSE" | "0" | "" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_json(source: &str) -> FepResult<Vec<FieldDefinition>> {
    let records: Vec<DefinitionRecord> =
        serde_json::from_str(source).map_err(|e| FepError::Definition {
            line: e.line(),
            reason: e.to_string(),
        })?;
    records
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.finish(i + 1))
        .collect()
}

#[cfg(test)]
mod test {
    use super::{parse_csv, parse_json, DataEncoding, DataType, LengthType};

    const HEADER: &str = "fieldNumber,name,description,fieldType,lengthType,length,dataEncoding,lengthEncoding,sensitive,paddingChar,leftPadding\n";

    #[test]
    fn test_csv_row() {
        let source = format!("{HEADER}2,PAN,Primary account number,NUMERIC,LLVAR,19,BCD,BCD,true,,\n");
        let defs = parse_csv(&source).unwrap();
        assert_eq!(defs.len(), 1);
        let def = &defs[0];
        assert_eq!(def.number(), 2);
        assert_eq!(def.data_type(), DataType::Numeric);
        assert_eq!(def.length_type(), LengthType::Llvar);
        assert_eq!(def.data_encoding(), DataEncoding::Bcd);
        assert!(def.sensitive());
        assert_eq!(def.padding_char(), '0');
        assert!(def.left_padding());
    }

    #[test]
    fn test_csv_comments_and_blank_lines() {
        let source = format!(
            "{HEADER}# card data\n\n41,TerminalId,\"Terminal id, card acceptor\",ALPHA_NUMERIC_SPECIAL,FIXED,8,ASCII,ASCII,false,,\n"
        );
        let defs = parse_csv(&source).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].description(), "Terminal id, card acceptor");
        assert_eq!(defs[0].padding_char(), ' ');
        assert!(!defs[0].left_padding());
    }

    #[test]
    fn test_csv_unknown_enum_is_line_numbered() {
        let source = format!("{HEADER}2,PAN,,NUMERIC,WAT,19,BCD,BCD,true,,\n");
        let err = parse_csv(&source).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("line 2"), "{text}");
        assert!(text.contains("WAT"), "{text}");
    }

    #[test]
    fn test_length_must_fit_prefix() {
        let source = format!("{HEADER}63,Private,,ALPHA_NUMERIC,LLVAR,120,ASCII,ASCII,false,,\n");
        assert!(parse_csv(&source).is_err());
    }

    #[test]
    fn test_json_source() {
        let source = r#"[
            {"fieldNumber": 11, "name": "Stan", "fieldType": "NUMERIC",
             "lengthType": "FIXED", "length": 6,
             "dataEncoding": "BCD", "lengthEncoding": "BCD"}
        ]"#;
        let defs = parse_json(source).unwrap();
        assert_eq!(defs[0].number(), 11);
        assert!(!defs[0].sensitive());
    }
}
