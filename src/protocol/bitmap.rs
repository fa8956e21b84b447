use crate::{FepError, FepResult};

/// The set of fields present in a message.
///
/// Serializes big-endian: bit k, 1-indexed from the left, corresponds to
/// field k. Bit 1 is not a data field — on the wire it flags the presence
/// of the secondary bitmap (fields 65..=128); in memory it is never set.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Bitmap {
    bytes: [u8; 16],
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bitmap from field indices.
    pub fn from_fields<I: IntoIterator<Item = u8>>(fields: I) -> FepResult<Self> {
        let mut bitmap = Self::new();
        for n in fields {
            bitmap.set(n)?;
        }
        Ok(bitmap)
    }

    /// Marks field `n` (2..=128) as present.
    pub fn set(&mut self, n: u8) -> FepResult<()> {
        Self::check_index(n)?;
        self.bytes[(n as usize - 1) / 8] |= Self::mask(n);
        Ok(())
    }

    /// Clears field `n`.
    pub fn clear(&mut self, n: u8) -> FepResult<()> {
        Self::check_index(n)?;
        self.bytes[(n as usize - 1) / 8] &= !Self::mask(n);
        Ok(())
    }

    pub fn is_set(&self, n: u8) -> bool {
        if Self::check_index(n).is_err() {
            return false;
        }
        self.bytes[(n as usize - 1) / 8] & Self::mask(n) != 0
    }

    /// True iff any field above 64 is present, i.e. the serialized form
    /// carries a secondary bitmap.
    pub fn secondary(&self) -> bool {
        self.bytes[8..].iter().any(|&b| b != 0)
    }

    /// Present field indices in ascending order.
    pub fn fields(&self) -> Vec<u8> {
        (2..=128).filter(|&n| self.is_set(n)).collect()
    }

    /// Serializes to 8 or 16 bytes; with a secondary bitmap the first bit
    /// of the first byte is set.
    pub fn to_bytes(self) -> Vec<u8> {
        if self.secondary() {
            let mut out = self.bytes.to_vec();
            out[0] |= 0x80;
            out
        } else {
            self.bytes[..8].to_vec()
        }
    }

    /// Reads a bitmap off the front of `bytes`, returning it together
    /// with the number of bytes consumed (8 or 16).
    pub fn from_bytes(bytes: &[u8]) -> FepResult<(Self, usize)> {
        if bytes.len() < 8 {
            return Err(FepError::Protocol(format!(
                "bitmap needs at least 8 bytes, got {}",
                bytes.len()
            )));
        }
        let secondary = bytes[0] & 0x80 != 0;
        let consumed = if secondary { 16 } else { 8 };
        if bytes.len() < consumed {
            return Err(FepError::Protocol(
                "secondary bitmap flagged but body ends after the primary".to_string(),
            ));
        }
        let mut raw = [0_u8; 16];
        raw[..consumed].copy_from_slice(&bytes[..consumed]);
        raw[0] &= 0x7F; // presence flag is serialization-only
        Ok((Self { bytes: raw }, consumed))
    }

    fn check_index(n: u8) -> FepResult<()> {
        if !(2..=128).contains(&n) {
            return Err(FepError::Protocol(format!(
                "field index {n} is not addressable (bit 1 is the secondary-bitmap flag)"
            )));
        }
        Ok(())
    }

    fn mask(n: u8) -> u8 {
        0x80 >> ((n as usize - 1) % 8)
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bitmap{:?}", self.fields())
    }
}

#[cfg(test)]
mod test {
    use super::Bitmap;

    #[test]
    fn test_primary_only() {
        let bitmap = Bitmap::from_fields([2, 3, 11, 39, 64]).unwrap();
        let bytes = bitmap.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert!(!bitmap.secondary());
        let (parsed, consumed) = Bitmap::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(parsed, bitmap);
        assert_eq!(parsed.fields(), vec![2, 3, 11, 39, 64]);
    }

    #[test]
    fn test_secondary() {
        let bitmap = Bitmap::from_fields([2, 70, 128]).unwrap();
        assert!(bitmap.secondary());
        let bytes = bitmap.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0] & 0x80, 0x80);
        let (parsed, consumed) = Bitmap::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, 16);
        assert_eq!(parsed, bitmap);
        assert!(!parsed.is_set(1));
    }

    #[test]
    fn test_set_clear() {
        let mut bitmap = Bitmap::new();
        bitmap.set(11).unwrap();
        assert!(bitmap.is_set(11));
        bitmap.clear(11).unwrap();
        assert!(!bitmap.is_set(11));
        assert!(bitmap.set(1).is_err());
        assert!(bitmap.set(0).is_err());
    }

    #[test]
    fn test_exact_bit_positions() {
        // field 2 is the second bit of the first byte
        let bitmap = Bitmap::from_fields([2]).unwrap();
        assert_eq!(bitmap.to_bytes(), vec![0x40, 0, 0, 0, 0, 0, 0, 0]);
        // field 8 is the last bit of the first byte
        let bitmap = Bitmap::from_fields([8]).unwrap();
        assert_eq!(bitmap.to_bytes(), vec![0x01, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_truncated_secondary_rejected() {
        let bitmap = Bitmap::from_fields([2, 70]).unwrap();
        let bytes = bitmap.to_bytes();
        assert!(Bitmap::from_bytes(&bytes[..12]).is_err());
    }
}
