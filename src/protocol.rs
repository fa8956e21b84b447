// The wire format: framing, bitmap, field layout tables, per-field codec,
// and the message value type they operate on.

mod bcd;
mod bitmap;
mod ebcdic;
mod field_codec;
mod field_definition;
pub(crate) mod field_table;
mod message;
mod message_codec;
pub(crate) mod mti;
pub(crate) mod util;

pub use self::{
    bitmap::Bitmap,
    field_definition::{DataEncoding, DataType, FieldDefinition, LengthEncoding, LengthType},
    field_table::FieldTable,
    message::{MaskedMessage, Message},
    message_codec::MessageCodec,
    mti::{netmgmt, response_code, Mti},
};

pub(crate) use self::bcd::Bcd;

/// Largest body a frame can carry; the length prefix holds four BCD digits.
pub(crate) const MAX_BODY_LEN: usize = 9_999;

/// Smallest possible body: MTI (2 bytes) plus a primary bitmap (8 bytes).
pub(crate) const MIN_BODY_LEN: usize = 10;
