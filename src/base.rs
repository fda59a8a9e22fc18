//! Base SPI communication shared by the AD7793 and flash drivers
//!
//! Copyright 2016-2019 thermo-node authors

use core::fmt::Debug;

use embedded_hal::blocking::spi;
use embedded_hal::digital::v2::OutputPin;

/// Driver error object
#[derive(Debug)]
pub enum Error<CommsErr, PinErr> {
    /// Underlying SPI error
    Comms(CommsErr),
    /// Chip select pin error
    Pin(PinErr),
    /// Device did not identify itself correctly
    NoDevice,
    /// Device stayed busy past the poll limit
    Timeout,
    /// Word program needs an even, non-zero number of bytes
    OddLength,
    /// Address is outside the device
    Unaligned,
}

/// Base API for chip-select framed SPI transactions
/// This should not be required by consumers, but is exposed to support alternate use
pub trait Base<CommsErr, PinErr> {
    /// Write a command prefix followed by data in a single chip select frame
    fn spi_write(&mut self, prefix: &[u8], data: &[u8]) -> Result<(), Error<CommsErr, PinErr>>;
    /// Write a command prefix then read data back in a single chip select frame
    fn spi_read(&mut self, prefix: &[u8], data: &mut [u8]) -> Result<(), Error<CommsErr, PinErr>>;
}

/// SPI bus and active-low chip select owned by one device
pub struct SpiWrapper<Spi, Cs> {
    spi: Spi,
    cs: Cs,
}

impl<Spi, Cs, CommsErr, PinErr> SpiWrapper<Spi, Cs>
where
    Spi: spi::Transfer<u8, Error = CommsErr> + spi::Write<u8, Error = CommsErr>,
    Cs: OutputPin<Error = PinErr>,
    CommsErr: Debug,
    PinErr: Debug,
{
    /// Wrap an SPI bus and chip select, leaving the device deselected
    pub fn new(spi: Spi, mut cs: Cs) -> Result<Self, Error<CommsErr, PinErr>> {
        cs.set_high().map_err(Error::Pin)?;
        Ok(Self { spi, cs })
    }

    /// Release the underlying bus and pin
    pub fn free(self) -> (Spi, Cs) {
        (self.spi, self.cs)
    }

    fn frame<F>(&mut self, f: F) -> Result<(), Error<CommsErr, PinErr>>
    where
        F: FnOnce(&mut Spi) -> Result<(), CommsErr>,
    {
        self.cs.set_low().map_err(Error::Pin)?;

        let r = f(&mut self.spi);

        // Always deselect, even when the transfer failed
        self.cs.set_high().map_err(Error::Pin)?;

        r.map_err(Error::Comms)
    }
}

impl<Spi, Cs, CommsErr, PinErr> Base<CommsErr, PinErr> for SpiWrapper<Spi, Cs>
where
    Spi: spi::Transfer<u8, Error = CommsErr> + spi::Write<u8, Error = CommsErr>,
    Cs: OutputPin<Error = PinErr>,
    CommsErr: Debug,
    PinErr: Debug,
{
    fn spi_write(&mut self, prefix: &[u8], data: &[u8]) -> Result<(), Error<CommsErr, PinErr>> {
        trace!("Writing prefix: {:x?} data: {:x?}", prefix, data);

        self.frame(|spi| {
            spi.write(prefix)?;
            if !data.is_empty() {
                spi.write(data)?;
            }
            Ok(())
        })
    }

    fn spi_read(&mut self, prefix: &[u8], data: &mut [u8]) -> Result<(), Error<CommsErr, PinErr>> {
        trace!("Writing prefix: {:x?}", prefix);

        for b in data.iter_mut() {
            *b = crate::device::DUMMY_BYTE;
        }

        self.frame(|spi| {
            spi.write(prefix)?;
            spi.transfer(data)?;
            Ok(())
        })?;

        trace!("Read data: {:x?}", data);

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

    #[test]
    fn test_write_frames_chip_select() {
        let spi = SpiMock::new(&[
            SpiTransaction::write(vec![0x10]),
            SpiTransaction::write(vec![0x47, 0x90]),
        ]);
        let cs = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);

        let mut w = SpiWrapper::new(spi, cs).unwrap();
        w.spi_write(&[0x10], &[0x47, 0x90]).unwrap();

        let (mut spi, mut cs) = w.free();
        spi.done();
        cs.done();
    }

    #[test]
    fn test_read_clocks_dummy_bytes() {
        let spi = SpiMock::new(&[
            SpiTransaction::write(vec![0x58]),
            SpiTransaction::transfer(vec![0xFF, 0xFF, 0xFF], vec![0x80, 0x00, 0x01]),
        ]);
        let cs = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);

        let mut w = SpiWrapper::new(spi, cs).unwrap();
        let mut buff = [0u8; 3];
        w.spi_read(&[0x58], &mut buff).unwrap();
        assert_eq!(buff, [0x80, 0x00, 0x01]);

        let (mut spi, mut cs) = w.free();
        spi.done();
        cs.done();
    }
}
