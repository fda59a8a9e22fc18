//! Wall clock timestamps
//!
//! Timestamps come from a DS1302 style RTC which stores every field as BCD.
//! The decoded form is what gets written to flash and sent upstream.
//!
//! Copyright 2016-2019 thermo-node authors

use core::fmt::Debug;

/// Source of the current time
pub trait Clock {
    type Error: Debug;

    /// Fetch the current time
    fn now(&mut self) -> Result<Timestamp, Self::Error>;
}

/// Decoded RTC time, every field in plain decimal
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct Timestamp {
    /// 0 - 59
    pub sec: u8,
    /// 0 - 59
    pub min: u8,
    /// 0 - 23, 24 hour mode
    pub hour: u8,
    /// Day of month, 1 - 31
    pub date: u8,
    /// 1 - 12
    pub month: u8,
    /// Day of week, 1 - 7
    pub week: u8,
    /// Year within the century, 0 - 99
    pub year: u8,
}

/// Size of a timestamp in a stored record, the trailing byte is reserved
pub const TIMESTAMP_LEN: usize = 8;

/// Register masks applied before BCD decoding, in register order
const REGISTER_MASKS: [u8; 7] = [0x7F, 0x7F, 0x3F, 0x3F, 0x1F, 0x07, 0xFF];

/// Convert a decimal value (0 - 99) to packed BCD
pub fn to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Convert packed BCD to decimal
pub fn from_bcd(v: u8) -> u8 {
    ((v >> 4) & 0x0F) * 10 + (v & 0x0F)
}

impl Timestamp {
    pub fn new(year: u8, month: u8, date: u8, hour: u8, min: u8, sec: u8, week: u8) -> Self {
        Self { sec, min, hour, date, month, week, year }
    }

    /// Decode the seven RTC clock registers (seconds first)
    /// Control bits sharing the registers (clock halt, 12/24h) are masked off
    pub fn from_registers(regs: &[u8; 7]) -> Self {
        let mut v = [0u8; 7];
        for (i, r) in regs.iter().enumerate() {
            v[i] = from_bcd(r & REGISTER_MASKS[i]);
        }
        Self {
            sec: v[0],
            min: v[1],
            hour: v[2],
            date: v[3],
            month: v[4],
            week: v[5],
            year: v[6],
        }
    }

    /// Encode into the seven RTC clock registers
    pub fn to_registers(&self) -> [u8; 7] {
        [
            to_bcd(self.sec),
            to_bcd(self.min),
            to_bcd(self.hour),
            to_bcd(self.date),
            to_bcd(self.month),
            to_bcd(self.week),
            to_bcd(self.year),
        ]
    }

    /// Record layout: sec, min, hour, date, month, week, year, reserved
    pub fn to_bytes(&self) -> [u8; TIMESTAMP_LEN] {
        [self.sec, self.min, self.hour, self.date, self.month, self.week, self.year, 0]
    }

    pub fn from_bytes(b: &[u8; TIMESTAMP_LEN]) -> Self {
        Self {
            sec: b[0],
            min: b[1],
            hour: b[2],
            date: b[3],
            month: b[4],
            week: b[5],
            year: b[6],
        }
    }
}

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.date, self.hour, self.min, self.sec
        )
    }
}
