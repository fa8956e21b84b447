use crate::{
    protocol::{
        field_codec,
        util::{self, ByteCursor},
        Bcd, Bitmap, FieldTable, Message, Mti, MAX_BODY_LEN, MIN_BODY_LEN,
    },
    FepError, FepResult,
};
use std::{str::FromStr, sync::Arc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Stateless encoder/decoder for complete messages.
///
/// Frame layout: `BCD(length, 4 digits, 2 bytes) || BCD(MTI, 4 digits,
/// 2 bytes) || bitmap(8 or 16 bytes) || fields in ascending index order`.
/// The field table is an explicit constructor argument; the "FISC"
/// default provider is a convenience, not a hidden global.
#[derive(Clone, Debug)]
pub struct MessageCodec {
    table: Arc<FieldTable>,
    with_length_prefix: bool,
}

impl MessageCodec {
    pub fn new(table: Arc<FieldTable>) -> Self {
        Self {
            table,
            with_length_prefix: true,
        }
    }

    /// Codec over the default "FISC" provider.
    pub fn fisc() -> FepResult<Self> {
        Ok(Self::new(crate::protocol::field_table::provider(
            crate::DEFAULT_PROVIDER,
        )?))
    }

    /// Builder-method for switching the 2-byte frame length prefix on or
    /// off (some legacy channel gateways frame externally).
    #[must_use]
    pub fn with_length_prefix(mut self, on: bool) -> Self {
        self.with_length_prefix = on;
        self
    }

    pub fn table(&self) -> &Arc<FieldTable> {
        &self.table
    }

    /// Encodes a complete frame (length prefix included when configured).
    pub fn encode(&self, message: &Message) -> FepResult<Vec<u8>> {
        let body = self.encode_body(message)?;
        if !self.with_length_prefix {
            return Ok(body);
        }
        if body.len() > MAX_BODY_LEN {
            return Err(FepError::Protocol(format!(
                "body of {} bytes exceeds the frame length prefix",
                body.len()
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        let prefix = Bcd::encode_u16(body.len() as u16)?;
        let mut frame = Vec::with_capacity(2 + body.len());
        frame.extend_from_slice(&prefix);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    pub(crate) fn encode_body(&self, message: &Message) -> FepResult<Vec<u8>> {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(&Bcd::pack(&message.mti().digits())?);
        body.extend_from_slice(&message.bitmap().to_bytes());
        for (n, value) in message.fields() {
            let definition = self.table.get(n).ok_or_else(|| {
                FepError::Protocol(format!(
                    "field {n} has no definition in table {:?}",
                    self.table.name()
                ))
            })?;
            field_codec::encode_field(definition, value, &mut body)?;
        }
        trace!(
            "encoded mti {} with {} fields into {} body bytes",
            message.mti(),
            message.field_count(),
            body.len()
        );
        Ok(body)
    }

    /// Decodes a complete frame (length prefix expected when configured).
    pub fn decode(&self, frame: &[u8]) -> FepResult<Message> {
        let body = if self.with_length_prefix {
            if frame.len() < 2 {
                return Err(FepError::Protocol("frame shorter than its prefix".to_string()));
            }
            let declared = usize::from(Bcd::decode_u16([frame[0], frame[1]])?);
            let body = &frame[2..];
            if declared != body.len() {
                return Err(FepError::Protocol(format!(
                    "length prefix declares {declared} bytes, frame carries {}",
                    body.len()
                )));
            }
            body
        } else {
            frame
        };
        self.decode_body(body)
    }

    pub(crate) fn decode_body(&self, body: &[u8]) -> FepResult<Message> {
        if body.len() < MIN_BODY_LEN {
            return Err(FepError::Protocol(format!(
                "body of {} bytes cannot hold MTI and bitmap",
                body.len()
            )));
        }
        let mut cursor = ByteCursor::new(body);

        let mti_digits = Bcd::unpack(cursor.take(2)?, 4)?;
        let mti = Mti::from_str(&mti_digits)
            .map_err(|e| FepError::Protocol(format!("bad MTI: {e}")))?;
        let (bitmap, consumed) = Bitmap::from_bytes(&body[cursor.position()..])?;
        let _ = cursor.take(consumed)?;

        let mut message = Message::new(mti);
        for n in bitmap.fields() {
            let definition = self.table.get(n).ok_or_else(|| {
                FepError::Protocol(format!(
                    "bitmap flags field {n} which has no definition in table {:?}",
                    self.table.name()
                ))
            })?;
            let value = field_codec::decode_field(definition, &mut cursor)?;
            message.set(n, value)?;
        }
        if !cursor.is_exhausted() {
            return Err(FepError::Protocol(format!(
                "{} trailing bytes after the last field: {}",
                cursor.remaining(),
                util::to_hex(&body[cursor.position()..])
            )));
        }
        trace!(
            "decoded mti {mti} with {} fields from {} body bytes",
            message.field_count(),
            body.len()
        );
        Ok(message)
    }

    /// Reads one length-prefixed frame off the stream and returns the
    /// complete frame (prefix included) ready for [`decode`](Self::decode).
    pub async fn read_frame<R>(&self, rdr: &mut R) -> FepResult<Vec<u8>>
    where
        R: AsyncReadExt + Unpin,
    {
        debug_assert!(self.with_length_prefix, "framed reads need the prefix");
        let mut prefix = [0_u8; 2];
        rdr.read_exact(&mut prefix).await?;
        let body_len = usize::from(Bcd::decode_u16(prefix)?);
        if body_len < MIN_BODY_LEN {
            return Err(FepError::Protocol(format!(
                "frame prefix declares {body_len} bytes, below the minimum body"
            )));
        }
        let mut frame = vec![0_u8; 2 + body_len];
        frame[..2].copy_from_slice(&prefix);
        rdr.read_exact(&mut frame[2..]).await?;
        Ok(frame)
    }

    /// Encodes and writes one message.
    pub async fn write_message<W>(&self, w: &mut W, message: &Message) -> FepResult<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        let frame = self.encode(message)?;
        w.write_all(&frame).await?;
        w.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::MessageCodec;
    use crate::protocol::{field_table::FieldTable, Message, Mti};
    use std::{str::FromStr, sync::Arc};

    fn codec() -> MessageCodec {
        MessageCodec::new(Arc::new(
            FieldTable::from_csv("FISC", include_str!("default_fisc.csv")).unwrap(),
        ))
    }

    #[test]
    fn test_roundtrip_financial_request() {
        let codec = codec();
        let msg = Message::new(Mti::from_str("0200").unwrap())
            .with(2, "4111111111111111")
            .with(3, "011000")
            .with(4, "000000010000")
            .with(11, "000002")
            .with(41, "ATM00001");
        let frame = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_roundtrip_with_secondary_bitmap() {
        let codec = codec();
        let msg = Message::new(Mti::from_str("0800").unwrap())
            .with(11, "000001")
            .with(70, "301");
        let frame = codec.encode(&msg).unwrap();
        // body: MTI(2) + bitmaps(16) + stan(3) + code(2)
        assert_eq!(frame.len(), 2 + 2 + 16 + 3 + 2);
        let decoded = codec.decode(&frame).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.bitmap().secondary());
    }

    #[test]
    fn test_exact_frame_bytes_for_echo() {
        let codec = codec();
        let msg = Message::new(Mti::from_str("0800").unwrap())
            .with(11, "000001")
            .with(70, "301");
        let frame = codec.encode(&msg).unwrap();
        // prefix: 23 body bytes -> 0x00 0x23
        assert_eq!(&frame[..2], &[0x00, 0x23]);
        // MTI 0800
        assert_eq!(&frame[2..4], &[0x08, 0x00]);
        // primary bitmap: secondary flag + field 11
        assert_eq!(frame[4], 0x80);
        assert_eq!(frame[5], 0x20);
        // secondary bitmap: field 70 = bit 6 of byte 8 (0-indexed)
        assert_eq!(frame[12], 0x04);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let codec = codec();
        let msg = Message::new(Mti::from_str("0800").unwrap())
            .with(11, "000001")
            .with(70, "301");
        let mut body = codec.encode_body(&msg).unwrap();
        body.push(0xFF);
        assert!(codec.decode_body(&body).is_err());
    }

    #[test]
    fn test_undefined_field_rejected() {
        let codec = codec();
        // field 5 has no definition in the default table
        let msg = Message::new(Mti::from_str("0200").unwrap()).with(5, "1");
        assert!(codec.encode(&msg).is_err());
    }

    #[test]
    fn test_prefix_mismatch_rejected() {
        let codec = codec();
        let msg = Message::new(Mti::from_str("0800").unwrap())
            .with(11, "000001")
            .with(70, "301");
        let mut frame = codec.encode(&msg).unwrap();
        frame.truncate(frame.len() - 1);
        assert!(codec.decode(&frame).is_err());
    }
}
