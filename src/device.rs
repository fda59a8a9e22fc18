//! AD7793 and SST25 flash device definitions
//!
//! Copyright 2016-2019 thermo-node authors

/// Dummy byte clocked out while reading
pub const DUMMY_BYTE: u8 = 0xFF;

/// AD7793 internal reference voltage
pub const AD7793_VREF: f32 = 1.17;

/// AD7793 communications register bits
pub const COMM_WRITE: u8 = 0 << 6;
pub const COMM_READ: u8 = 1 << 6;

/// Build the communications register byte selecting a register
pub const fn comm_addr(reg: Register) -> u8 {
    ((reg as u8) & 0x07) << 3
}

/// AD7793 register addresses
/// Every access starts with a write to the communications register selecting one of these
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Register {
    /// Status register on read, communications register on write (8-bit)
    Status = 0,
    /// Mode register (16-bit)
    Mode = 1,
    /// Configuration register (16-bit)
    Config = 2,
    /// Conversion data register (24-bit)
    Data = 3,
    /// ID register, low nibble is 0xB (8-bit)
    Id = 4,
    /// Excitation current register (8-bit)
    Io = 5,
    /// Offset calibration (24-bit)
    Offset = 6,
    /// Full-scale calibration (24-bit)
    FullScale = 7,
}

/// Status register /RDY bit, cleared when a conversion result is available
pub const STAT_RDY: u8 = 1 << 7;
/// Status register overrange / underrange flag
pub const STAT_ERR: u8 = 1 << 6;

pub const AD7793_ID: u8 = 0x0B;
pub const AD7793_ID_MASK: u8 = 0x0F;

/// Single conversion mode, internal 64kHz clock
pub const MODE_SINGLE: u16 = 1 << 13;

pub const CONF_UNIPOLAR: u16 = 1 << 12;
pub const CONF_REFSEL_INT: u16 = 1 << 7;
pub const CONF_BUF: u16 = 1 << 4;

pub const fn conf_vbias(x: u16) -> u16 {
    (x & 0x3) << 14
}

pub const fn conf_gain(x: u16) -> u16 {
    (x & 0x7) << 8
}

pub const fn conf_chan(x: u16) -> u16 {
    x & 0x7
}

/// Bias voltage generator connected to AIN1(-)
pub const VBIAS_AIN1: u16 = 1;

pub const GAIN_1: u16 = 0;
pub const GAIN_4: u16 = 2;
pub const GAIN_128: u16 = 7;

/// Excitation current sources IEXC1 -> IOUT1, IEXC2 -> IOUT2
pub const IEXC_DIR_DEFAULT: u8 = 0 << 2;
pub const IEXC_DISABLE: u8 = 0;
pub const IEXC_210UA: u8 = 2;

/// SST25 flash opcodes
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Opcode {
    /// Read memory, followed by a 24-bit address
    Read = 0x03,
    /// Erase one 4KiB sector, followed by a 24-bit address
    SectorErase4K = 0x20,
    /// Erase the full chip
    ChipErase = 0x60,
    /// Auto address increment word program
    /// The first command carries a 24-bit address and two data bytes,
    /// later ones only two data bytes
    AaiWordProgram = 0xAD,
    /// Read status register
    ReadStatus = 0x05,
    /// Enable write status register
    EnableWriteStatus = 0x50,
    /// Write status register
    WriteStatus = 0x01,
    /// Write enable
    WriteEnable = 0x06,
    /// Write disable, also terminates an AAI sequence
    WriteDisable = 0x04,
    /// Read JEDEC id (manufacturer, type, capacity)
    JedecId = 0x9F,
}

/// Status register BUSY bit
pub const FLASH_STATUS_BUSY: u8 = 0x01;

/// SST manufacturer id
pub const SST_MANUFACTURER_ID: u8 = 0xBF;

/// Bytes per erasable sector
pub const SECTOR_SIZE: u32 = 4096;

/// Sectors on the 16Mbit part
pub const SECTOR_COUNT: u16 = 512;

/// Maximum status polls before a flash operation is considered hung
pub const BUSY_POLL_LIMIT: u32 = 1_000_000;
