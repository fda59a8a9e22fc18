//! Stored measurement record
//!
//! One record is 12 bytes: the 8 byte timestamp followed by the temperature as
//! a little endian f32. The same bytes are sent upstream as the result payload.

use crate::clock::{Timestamp, TIMESTAMP_LEN};

/// Size of one record on flash and on the wire
pub const RECORD_LEN: usize = 12;

/// One finished measurement waiting to be synced
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct FlashRecord {
    pub timestamp: Timestamp,
    pub sample: [u8; 4],
}

impl FlashRecord {
    pub fn new(timestamp: Timestamp, temperature: f32) -> Self {
        Self {
            timestamp,
            sample: temperature.to_le_bytes(),
        }
    }

    /// Temperature in degrees celsius
    pub fn temperature(&self) -> f32 {
        f32::from_le_bytes(self.sample)
    }

    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut b = [0u8; RECORD_LEN];
        b[..TIMESTAMP_LEN].copy_from_slice(&self.timestamp.to_bytes());
        b[TIMESTAMP_LEN..].copy_from_slice(&self.sample);
        b
    }

    pub fn from_bytes(b: &[u8; RECORD_LEN]) -> Self {
        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&b[..TIMESTAMP_LEN]);

        let mut sample = [0u8; 4];
        sample.copy_from_slice(&b[TIMESTAMP_LEN..]);

        Self {
            timestamp: Timestamp::from_bytes(&ts),
            sample,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_layout() {
        let r = FlashRecord::new(Timestamp::new(16, 4, 25, 20, 59, 16, 1), 36.5);

        // 36.5f32 = 0x42120000, low byte first
        assert_eq!(r.to_bytes(), [16, 59, 20, 25, 4, 1, 16, 0, 0x00, 0x00, 0x12, 0x42]);
        assert_eq!(FlashRecord::from_bytes(&r.to_bytes()), r);
        assert_eq!(r.temperature(), 36.5);
    }
}
