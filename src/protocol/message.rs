use crate::{
    protocol::{Bitmap, FieldTable, Mti},
    FepError, FepResult,
};
use vec_map::VecMap;

/// An ISO 8583 message: a message type indicator plus data fields indexed
/// 2..=128.
///
/// The field set *is* the bitmap — the serialized bitmap is derived from
/// the present indices, so the two can never disagree. Values are
/// strings; BINARY fields carry upper-case hex strings.
///
/// `Debug` prints field numbers and value lengths only. Rendering values
/// requires the field table (to mask sensitive fields) — see
/// [`Message::display_with`].
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    mti: Mti,
    fields: VecMap<String>,
}

impl Message {
    /// Trace / system trace audit number.
    pub const FIELD_STAN: u8 = 11;
    /// Response code.
    pub const FIELD_RESPONSE_CODE: u8 = 39;
    /// Network management information code.
    pub const FIELD_NETMGMT_CODE: u8 = 70;

    pub fn new(mti: Mti) -> Self {
        Self {
            mti,
            fields: VecMap::new(),
        }
    }

    pub fn mti(&self) -> Mti {
        self.mti
    }

    pub fn set_mti(&mut self, mti: Mti) {
        self.mti = mti;
    }

    /// Sets field `n`, replacing any previous value.
    pub fn set(&mut self, n: u8, value: impl Into<String>) -> FepResult<()> {
        Self::check_index(n)?;
        self.fields.insert(n as usize, value.into());
        Ok(())
    }

    /// Builder-style [`set`](Self::set); panics on an invalid index, which
    /// is fine for literal field numbers.
    #[must_use]
    pub fn with(mut self, n: u8, value: impl Into<String>) -> Self {
        assert!((2..=128).contains(&n), "field index {n} outside 2..=128");
        self.fields.insert(n as usize, value.into());
        self
    }

    pub fn get(&self, n: u8) -> Option<&str> {
        self.fields.get(n as usize).map(String::as_str)
    }

    pub fn remove(&mut self, n: u8) -> Option<String> {
        self.fields.remove(n as usize)
    }

    pub fn contains(&self, n: u8) -> bool {
        self.fields.contains_key(n as usize)
    }

    /// Present fields in ascending index order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn fields(&self) -> impl Iterator<Item = (u8, &str)> {
        self.fields.iter().map(|(n, v)| (n as u8, v.as_str()))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// The bitmap derived from the present fields.
    pub fn bitmap(&self) -> Bitmap {
        // indices were checked on insertion
        Bitmap::from_fields(self.fields().map(|(n, _)| n)).unwrap_or_default()
    }

    /// Field 11, the correlation key of the dual-channel link.
    pub fn trace(&self) -> Option<&str> {
        self.get(Self::FIELD_STAN)
    }

    pub fn response_code(&self) -> Option<&str> {
        self.get(Self::FIELD_RESPONSE_CODE)
    }

    /// True when field 39 carries "00".
    pub fn is_approved(&self) -> bool {
        self.response_code() == Some(crate::protocol::mti::response_code::APPROVED)
    }

    /// Renders the message with values, masking fields the table marks
    /// sensitive.
    pub fn display_with<'a>(&'a self, table: &'a FieldTable) -> MaskedMessage<'a> {
        MaskedMessage {
            message: self,
            table,
        }
    }

    fn check_index(n: u8) -> FepResult<()> {
        if !(2..=128).contains(&n) {
            return Err(FepError::UsageDetailed(format!(
                "field index {n} outside 2..=128"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message(mti {}", self.mti)?;
        for (n, value) in self.fields() {
            write!(f, ", F{n}[{}]", value.len())?;
        }
        write!(f, ")")
    }
}

/// See [`Message::display_with`].
#[derive(Debug)]
pub struct MaskedMessage<'a> {
    message: &'a Message,
    table: &'a FieldTable,
}

impl std::fmt::Display for MaskedMessage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mti {}", self.message.mti)?;
        for (n, value) in self.message.fields() {
            let sensitive = self.table.get(n).is_some_and(super::FieldDefinition::sensitive);
            if sensitive {
                write!(f, " F{n}=<masked:{}>", value.len())?;
            } else {
                write!(f, " F{n}={value:?}")?;
            }
        }
        Ok(())
    }
}
