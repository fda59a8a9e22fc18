//! SPI NOR flash access
//!
//! The flash log only needs four primitives from the chip: read, even length
//! write, 4KiB sector erase and chip erase. `FlashDevice` captures these so the
//! log can run on the SST25 part via SPI or on `RamFlash` in memory.
//!
//! Copyright 2016-2019 thermo-node authors

use core::fmt::Debug;

use embedded_hal::blocking::spi;
use embedded_hal::digital::v2::OutputPin;

use crate::base::{Base, Error, SpiWrapper};
use crate::device::*;

/// Byte level flash primitives
pub trait FlashDevice {
    type Error: Debug;

    /// Read `data.len()` bytes starting at `addr`
    fn read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error>;

    /// Program bytes at `addr`, the target must be erased and `data` must be of even length
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Erase the 4KiB sector containing `addr` to 0xFF
    fn erase_sector(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// Erase the whole chip to 0xFF
    fn erase_chip(&mut self) -> Result<(), Self::Error>;
}

/// SST25VF016B style SPI flash
pub struct Sst25<Spi, Cs> {
    conn: SpiWrapper<Spi, Cs>,
    capacity: u32,
}

impl<Spi, Cs, CommsErr, PinErr> Sst25<Spi, Cs>
where
    Spi: spi::Transfer<u8, Error = CommsErr> + spi::Write<u8, Error = CommsErr>,
    Cs: OutputPin<Error = PinErr>,
    CommsErr: Debug,
    PinErr: Debug,
{
    /// Create a new flash instance, checking the JEDEC id and clearing block protection
    pub fn new(spi: Spi, cs: Cs) -> Result<Self, Error<CommsErr, PinErr>> {
        let conn = SpiWrapper::new(spi, cs)?;
        let mut f = Sst25 {
            conn,
            capacity: SECTOR_SIZE * SECTOR_COUNT as u32,
        };

        let id = f.jedec_id()?;
        if id[0] != SST_MANUFACTURER_ID {
            return Err(Error::NoDevice);
        }
        debug!("Found flash, JEDEC id: {:x?}", id);

        f.unprotect()?;

        Ok(f)
    }

    /// Read the manufacturer, memory type and capacity bytes
    pub fn jedec_id(&mut self) -> Result<[u8; 3], Error<CommsErr, PinErr>> {
        let mut id = [0u8; 3];
        self.conn.spi_read(&[Opcode::JedecId as u8], &mut id)?;
        Ok(id)
    }

    /// Clear the block protection bits so the whole array is writable
    pub fn unprotect(&mut self) -> Result<(), Error<CommsErr, PinErr>> {
        self.conn.spi_write(&[Opcode::EnableWriteStatus as u8], &[])?;
        self.conn.spi_write(&[Opcode::WriteStatus as u8, 0x00], &[])
    }

    /// Read the status register
    pub fn status(&mut self) -> Result<u8, Error<CommsErr, PinErr>> {
        let mut s = [0u8; 1];
        self.conn.spi_read(&[Opcode::ReadStatus as u8], &mut s)?;
        Ok(s[0])
    }

    /// Release the underlying bus and chip select
    pub fn free(self) -> (Spi, Cs) {
        self.conn.free()
    }

    fn write_enable(&mut self) -> Result<(), Error<CommsErr, PinErr>> {
        self.conn.spi_write(&[Opcode::WriteEnable as u8], &[])
    }

    fn wait_busy(&mut self) -> Result<(), Error<CommsErr, PinErr>> {
        for _i in 0..BUSY_POLL_LIMIT {
            if self.status()? & FLASH_STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<(), Error<CommsErr, PinErr>> {
        if addr as u64 + len as u64 > self.capacity as u64 {
            return Err(Error::Unaligned);
        }
        Ok(())
    }
}

fn addr_bytes(opcode: Opcode, addr: u32) -> [u8; 4] {
    [opcode as u8, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}

impl<Spi, Cs, CommsErr, PinErr> FlashDevice for Sst25<Spi, Cs>
where
    Spi: spi::Transfer<u8, Error = CommsErr> + spi::Write<u8, Error = CommsErr>,
    Cs: OutputPin<Error = PinErr>,
    CommsErr: Debug,
    PinErr: Debug,
{
    type Error = Error<CommsErr, PinErr>;

    fn read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error> {
        self.check_range(addr, data.len())?;
        self.conn.spi_read(&addr_bytes(Opcode::Read, addr), data)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        if data.is_empty() || data.len() % 2 != 0 || addr % 2 != 0 {
            return Err(Error::OddLength);
        }
        self.check_range(addr, data.len())?;

        self.write_enable()?;

        // The first word carries the start address, the chip increments from there
        let mut words = data.chunks(2);
        if let Some(w) = words.next() {
            self.conn.spi_write(&addr_bytes(Opcode::AaiWordProgram, addr), w)?;
            self.wait_busy()?;
        }
        for w in words {
            self.conn.spi_write(&[Opcode::AaiWordProgram as u8], w)?;
            self.wait_busy()?;
        }

        self.conn.spi_write(&[Opcode::WriteDisable as u8], &[])?;
        self.wait_busy()
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), Self::Error> {
        self.check_range(addr, 0)?;
        debug!("Erasing sector at 0x{:06x}", addr);

        self.write_enable()?;
        self.conn.spi_write(&addr_bytes(Opcode::SectorErase4K, addr), &[])?;
        self.wait_busy()
    }

    fn erase_chip(&mut self) -> Result<(), Self::Error> {
        debug!("Erasing chip");

        self.write_enable()?;
        self.conn.spi_write(&[Opcode::ChipErase as u8], &[])?;
        self.wait_busy()
    }
}

/// Errors from the in-memory flash
#[derive(PartialEq, Clone, Debug)]
pub enum RamFlashError {
    /// Access outside of the memory
    OutOfRange,
    /// Word program with an odd length or address
    OddLength,
    /// Program over bytes that were not erased
    NotErased(u32),
}

/// In-memory NOR flash with erase-before-write semantics
///
/// Writes may only clear bits that are still erased, matching the real part.
/// Useful for tests and for running the log on a host.
#[derive(Clone, Debug)]
pub struct RamFlash {
    mem: Vec<u8>,
    sector_size: u32,
}

impl RamFlash {
    /// Create an erased flash of `sectors` sectors of `sector_size` bytes
    pub fn new(sector_size: u32, sectors: u16) -> Self {
        Self {
            mem: vec![0xFF; sector_size as usize * sectors as usize],
            sector_size,
        }
    }

    /// Raw view of the memory
    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    /// Raw mutable view of the memory, bypassing program rules
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>, RamFlashError> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(RamFlashError::OutOfRange)?;
        if end > self.mem.len() {
            return Err(RamFlashError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl FlashDevice for RamFlash {
    type Error = RamFlashError;

    fn read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error> {
        let r = self.range(addr, data.len())?;
        data.copy_from_slice(&self.mem[r]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        if data.is_empty() || data.len() % 2 != 0 || addr % 2 != 0 {
            return Err(RamFlashError::OddLength);
        }
        let r = self.range(addr, data.len())?;

        if let Some(i) = self.mem[r.clone()].iter().position(|b| *b != 0xFF) {
            return Err(RamFlashError::NotErased(addr + i as u32));
        }

        self.mem[r].copy_from_slice(data);
        Ok(())
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), Self::Error> {
        let base = addr - addr % self.sector_size;
        let r = self.range(base, self.sector_size as usize)?;
        for b in &mut self.mem[r] {
            *b = 0xFF;
        }
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<(), Self::Error> {
        for b in self.mem.iter_mut() {
            *b = 0xFF;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    extern crate std;
    use std::vec;

    use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};
    use embedded_hal_mock::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    use super::*;

    /// Chip select toggles for `n` frames, after the initial deselect
    fn cs_frames(n: usize) -> Vec<PinTransaction> {
        let mut t = vec![PinTransaction::set(PinState::High)];
        for _i in 0..n {
            t.push(PinTransaction::set(PinState::Low));
            t.push(PinTransaction::set(PinState::High));
        }
        t
    }

    fn status_idle() -> [SpiTransaction; 2] {
        [
            SpiTransaction::write(vec![0x05]),
            SpiTransaction::transfer(vec![0xFF], vec![0x00]),
        ]
    }

    fn connect(
        expectations: &[SpiTransaction],
        frames: usize,
    ) -> (Sst25<SpiMock, PinMock>, SpiMock, PinMock) {
        let mut all = vec![
            SpiTransaction::write(vec![0x9F]),
            SpiTransaction::transfer(vec![0xFF, 0xFF, 0xFF], vec![0xBF, 0x25, 0x41]),
            SpiTransaction::write(vec![0x50]),
            SpiTransaction::write(vec![0x01, 0x00]),
        ];
        all.extend_from_slice(expectations);

        let spi = SpiMock::new(&all);
        let cs = PinMock::new(&cs_frames(3 + frames));

        let flash = Sst25::new(spi.clone(), cs.clone()).unwrap();
        (flash, spi, cs)
    }

    #[test]
    fn test_rejects_unknown_device() {
        let mut spi = SpiMock::new(&[
            SpiTransaction::write(vec![0x9F]),
            SpiTransaction::transfer(vec![0xFF, 0xFF, 0xFF], vec![0xEF, 0x40, 0x15]),
        ]);
        let mut cs = PinMock::new(&cs_frames(1));

        match Sst25::new(spi.clone(), cs.clone()) {
            Err(Error::NoDevice) => (),
            _ => panic!("expected NoDevice"),
        }

        spi.done();
        cs.done();
    }

    #[test]
    fn test_read() {
        let (mut flash, mut spi, mut cs) = connect(
            &[
                SpiTransaction::write(vec![0x03, 0x00, 0x10, 0x0C]),
                SpiTransaction::transfer(vec![0xFF; 4], vec![0xDE, 0xBC, 0x55, 0xAA]),
            ],
            1,
        );

        let mut buff = [0u8; 4];
        flash.read(0x100C, &mut buff).unwrap();
        assert_eq!(buff, [0xDE, 0xBC, 0x55, 0xAA]);

        spi.done();
        cs.done();
    }

    #[test]
    fn test_word_program() {
        let mut expect = vec![
            SpiTransaction::write(vec![0x06]),
            SpiTransaction::write(vec![0xAD, 0x00, 0x20, 0x00]),
            SpiTransaction::write(vec![0x01, 0x02]),
        ];
        expect.extend_from_slice(&status_idle());
        expect.push(SpiTransaction::write(vec![0xAD]));
        expect.push(SpiTransaction::write(vec![0x03, 0x04]));
        expect.extend_from_slice(&status_idle());
        expect.push(SpiTransaction::write(vec![0x04]));
        expect.extend_from_slice(&status_idle());

        // WREN, 2 words, WRDI and 3 status polls
        let (mut flash, mut spi, mut cs) = connect(&expect, 7);

        flash.write(0x2000, &[0x01, 0x02, 0x03, 0x04]).unwrap();

        spi.done();
        cs.done();
    }

    #[test]
    fn test_word_program_rejects_odd_length() {
        let (mut flash, mut spi, mut cs) = connect(&[], 0);

        match flash.write(0x2000, &[0x01, 0x02, 0x03]) {
            Err(Error::OddLength) => (),
            _ => panic!("expected OddLength"),
        }

        spi.done();
        cs.done();
    }

    #[test]
    fn test_sector_erase_polls_busy() {
        let expect = [
            SpiTransaction::write(vec![0x06]),
            SpiTransaction::write(vec![0x20, 0x00, 0x30, 0x00]),
            SpiTransaction::write(vec![0x05]),
            SpiTransaction::transfer(vec![0xFF], vec![0x03]),
            SpiTransaction::write(vec![0x05]),
            SpiTransaction::transfer(vec![0xFF], vec![0x00]),
        ];
        let (mut flash, mut spi, mut cs) = connect(&expect, 4);

        flash.erase_sector(0x3000).unwrap();

        spi.done();
        cs.done();
    }

    #[test]
    fn test_ram_flash_requires_erase() {
        let mut f = RamFlash::new(4096, 2);

        f.write(10, &[0x00, 0x11]).unwrap();
        assert_eq!(f.write(10, &[0x00, 0x11]), Err(RamFlashError::NotErased(10)));
        assert_eq!(f.write(11, &[0x00, 0x11]), Err(RamFlashError::OddLength));
        assert_eq!(f.write(8190, &[0, 0, 0, 0]), Err(RamFlashError::OutOfRange));

        f.erase_sector(4000).unwrap();
        f.write(10, &[0x00, 0x11]).unwrap();

        let mut b = [0u8; 2];
        f.read(10, &mut b).unwrap();
        assert_eq!(b, [0x00, 0x11]);
    }
}
