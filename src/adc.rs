//! AD7793 acquisition
//!
//! Each of the three sensor inputs is converted in single conversion mode:
//! configure the channel, wait for the conversion time, poll the /RDY bit and
//! fetch the 24-bit result.
//!
//! Copyright 2016-2019 thermo-node authors

use core::fmt::Debug;

use embedded_hal::blocking::spi;
use embedded_hal::digital::v2::OutputPin;

use crate::base::{Base, Error, SpiWrapper};
use crate::device::*;

/// Analog inputs used by the node
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Channel {
    /// AIN1, thermocouple
    Thermocouple,
    /// AIN2, PT1000 bridge
    PtBridge,
    /// AIN3, reference resistor
    Reference,
}

impl Channel {
    /// Configuration register value for this input
    pub fn config(&self) -> u16 {
        match self {
            // Bipolar, gain 128, bias voltage on AIN1(-)
            Channel::Thermocouple => {
                conf_vbias(VBIAS_AIN1)
                    | conf_gain(GAIN_128)
                    | CONF_REFSEL_INT
                    | CONF_BUF
                    | conf_chan(0)
            }
            Channel::PtBridge => {
                CONF_UNIPOLAR | conf_gain(GAIN_4) | CONF_REFSEL_INT | CONF_BUF | conf_chan(1)
            }
            Channel::Reference => {
                CONF_UNIPOLAR | conf_gain(GAIN_1) | CONF_REFSEL_INT | CONF_BUF | conf_chan(2)
            }
        }
    }

    /// Excitation current register value for this input
    pub fn io(&self) -> u8 {
        match self {
            Channel::Thermocouple => IEXC_DIR_DEFAULT | IEXC_DISABLE,
            Channel::PtBridge | Channel::Reference => IEXC_DIR_DEFAULT | IEXC_210UA,
        }
    }

    /// Convert a raw 24-bit conversion code to volts
    pub fn voltage(&self, code: u32) -> f32 {
        let code = code as f64;
        let v = match self {
            Channel::Thermocouple => (code / 8388608.0 - 1.0) * AD7793_VREF as f64 / 128.0,
            Channel::PtBridge => code * AD7793_VREF as f64 / 16777215.0 / 4.0,
            Channel::Reference => code * AD7793_VREF as f64 / 16777215.0,
        };
        v as f32
    }
}

/// Output update rate in single conversion mode
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum UpdateRate {
    Hz4_17,
    Hz8_33,
    Hz16_7,
    Hz33_2,
    Hz62_0,
}

impl Default for UpdateRate {
    fn default() -> Self {
        UpdateRate::Hz33_2
    }
}

impl UpdateRate {
    /// Mode register filter select bits
    pub fn filter_code(&self) -> u8 {
        match self {
            UpdateRate::Hz4_17 => 0x0F,
            UpdateRate::Hz8_33 => 0x0D,
            UpdateRate::Hz16_7 => 0x0A,
            UpdateRate::Hz33_2 => 0x07,
            UpdateRate::Hz62_0 => 0x04,
        }
    }

    /// Nominal single conversion time in milliseconds
    pub fn conversion_ms(&self) -> u32 {
        match self {
            UpdateRate::Hz4_17 => 480,
            UpdateRate::Hz8_33 => 240,
            UpdateRate::Hz16_7 => 120,
            UpdateRate::Hz33_2 => 60,
            UpdateRate::Hz62_0 => 32,
        }
    }

    /// Wait after starting a conversion before the first ready poll, 5% margin
    pub fn settle_ms(&self) -> u32 {
        self.conversion_ms() * 105 / 100
    }
}

impl core::str::FromStr for UpdateRate {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4.17" => Ok(UpdateRate::Hz4_17),
            "8.33" => Ok(UpdateRate::Hz8_33),
            "16.7" => Ok(UpdateRate::Hz16_7),
            "33.2" => Ok(UpdateRate::Hz33_2),
            "62" | "62.0" => Ok(UpdateRate::Hz62_0),
            _ => Err("update rate must be one of 4.17, 8.33, 16.7, 33.2, 62"),
        }
    }
}

/// Acquisition collaborator driving one channel conversion at a time
pub trait Acquire {
    type Error: Debug;

    /// Configure a channel and start a single conversion
    fn start(&mut self, channel: Channel, rate: UpdateRate) -> Result<(), Self::Error>;

    /// Check whether the started conversion has finished
    fn is_ready(&mut self) -> Result<bool, Self::Error>;

    /// Fetch the finished conversion as a voltage
    fn fetch(&mut self, channel: Channel) -> Result<f32, Self::Error>;
}

/// AD7793 ADC object
pub struct Ad7793<Spi, Cs> {
    conn: SpiWrapper<Spi, Cs>,
}

impl<Spi, Cs, CommsErr, PinErr> Ad7793<Spi, Cs>
where
    Spi: spi::Transfer<u8, Error = CommsErr> + spi::Write<u8, Error = CommsErr>,
    Cs: OutputPin<Error = PinErr>,
    CommsErr: Debug,
    PinErr: Debug,
{
    /// Create a new AD7793 instance, checking the device id
    pub fn new(spi: Spi, cs: Cs) -> Result<Self, Error<CommsErr, PinErr>> {
        let conn = SpiWrapper::new(spi, cs)?;
        let mut adc = Ad7793 { conn };

        let id = adc.id()?;
        if id & AD7793_ID_MASK != AD7793_ID {
            return Err(Error::NoDevice);
        }

        Ok(adc)
    }

    /// Read the ID register
    pub fn id(&mut self) -> Result<u8, Error<CommsErr, PinErr>> {
        let mut b = [0u8; 1];
        self.conn.spi_read(&[COMM_READ | comm_addr(Register::Id)], &mut b)?;
        Ok(b[0])
    }

    /// Read the status register
    pub fn status(&mut self) -> Result<u8, Error<CommsErr, PinErr>> {
        let mut b = [0u8; 1];
        self.conn.spi_read(&[COMM_READ | comm_addr(Register::Status)], &mut b)?;
        Ok(b[0])
    }

    /// Release the underlying bus and chip select
    pub fn free(self) -> (Spi, Cs) {
        self.conn.free()
    }

    fn write_register16(
        &mut self,
        reg: Register,
        value: u16,
    ) -> Result<(), Error<CommsErr, PinErr>> {
        self.conn
            .spi_write(&[COMM_WRITE | comm_addr(reg)], &[(value >> 8) as u8, (value & 0xFF) as u8])
    }

    fn write_register8(&mut self, reg: Register, value: u8) -> Result<(), Error<CommsErr, PinErr>> {
        self.conn.spi_write(&[COMM_WRITE | comm_addr(reg)], &[value])
    }
}

impl<Spi, Cs, CommsErr, PinErr> Acquire for Ad7793<Spi, Cs>
where
    Spi: spi::Transfer<u8, Error = CommsErr> + spi::Write<u8, Error = CommsErr>,
    Cs: OutputPin<Error = PinErr>,
    CommsErr: Debug,
    PinErr: Debug,
{
    type Error = Error<CommsErr, PinErr>;

    fn start(&mut self, channel: Channel, rate: UpdateRate) -> Result<(), Self::Error> {
        debug!("Starting conversion on {:?} at {:?}", channel, rate);

        self.write_register16(Register::Config, channel.config())?;
        self.write_register8(Register::Io, channel.io())?;
        self.write_register16(Register::Mode, MODE_SINGLE | rate.filter_code() as u16)
    }

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        let s = self.status()?;
        if s & STAT_ERR != 0 {
            warn!("Conversion over or under range (status: 0x{:02x})", s);
        }
        Ok(s & STAT_RDY == 0)
    }

    fn fetch(&mut self, channel: Channel) -> Result<f32, Self::Error> {
        let mut b = [0u8; 3];
        self.conn.spi_read(&[COMM_READ | comm_addr(Register::Data)], &mut b)?;

        let code = (b[0] as u32) << 16 | (b[1] as u32) << 8 | (b[2] as u32);
        let v = channel.voltage(code);

        trace!("Fetched {:?}: code 0x{:06x} ({} V)", channel, code, v);

        Ok(v)
    }
}

#[cfg(test)]
mod test {
    extern crate std;
    use std::vec;

    use assert_approx_eq::assert_approx_eq;
    use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};
    use embedded_hal_mock::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    use super::*;

    fn cs_frames(n: usize) -> Vec<PinTransaction> {
        let mut t = vec![PinTransaction::set(PinState::High)];
        for _i in 0..n {
            t.push(PinTransaction::set(PinState::Low));
            t.push(PinTransaction::set(PinState::High));
        }
        t
    }

    fn connect(
        expectations: &[SpiTransaction],
        frames: usize,
    ) -> (Ad7793<SpiMock, PinMock>, SpiMock, PinMock) {
        let mut all = vec![
            SpiTransaction::write(vec![0x60]),
            SpiTransaction::transfer(vec![0xFF], vec![0x4B]),
        ];
        all.extend_from_slice(expectations);

        let spi = SpiMock::new(&all);
        let cs = PinMock::new(&cs_frames(1 + frames));

        let adc = Ad7793::new(spi.clone(), cs.clone()).unwrap();
        (adc, spi, cs)
    }

    #[test]
    fn test_channel_registers() {
        assert_eq!(Channel::Thermocouple.config(), 0x4790);
        assert_eq!(Channel::PtBridge.config(), 0x1291);
        assert_eq!(Channel::Reference.config(), 0x1092);

        assert_eq!(Channel::Thermocouple.io(), 0x00);
        assert_eq!(Channel::PtBridge.io(), 0x02);
    }

    #[test]
    fn test_conversion() {
        let tests = &[
            (Channel::Thermocouple, 0x800000, 0.0),
            (Channel::Thermocouple, 0xFFFFFF, 1.17 / 128.0),
            (Channel::PtBridge, 0xFFFFFF, 1.17 / 4.0),
            (Channel::Reference, 0x800000, 0.585),
        ];

        for t in tests {
            assert_approx_eq!(t.0.voltage(t.1), t.2, 1e-6);
        }
    }

    #[test]
    fn test_settle() {
        assert_eq!(UpdateRate::Hz33_2.settle_ms(), 63);
        assert_eq!(UpdateRate::Hz4_17.settle_ms(), 504);
        assert_eq!("16.7".parse::<UpdateRate>(), Ok(UpdateRate::Hz16_7));
        assert!("17".parse::<UpdateRate>().is_err());
    }

    #[test]
    fn test_rejects_unknown_device() {
        let mut spi = SpiMock::new(&[
            SpiTransaction::write(vec![0x60]),
            SpiTransaction::transfer(vec![0xFF], vec![0x4A]),
        ]);
        let mut cs = PinMock::new(&cs_frames(1));

        match Ad7793::new(spi.clone(), cs.clone()) {
            Err(Error::NoDevice) => (),
            _ => panic!("expected NoDevice"),
        }

        spi.done();
        cs.done();
    }

    #[test]
    fn test_start_thermocouple() {
        let (mut adc, mut spi, mut cs) = connect(
            &[
                SpiTransaction::write(vec![0x10]),
                SpiTransaction::write(vec![0x47, 0x90]),
                SpiTransaction::write(vec![0x28]),
                SpiTransaction::write(vec![0x00]),
                SpiTransaction::write(vec![0x08]),
                SpiTransaction::write(vec![0x20, 0x07]),
            ],
            3,
        );

        adc.start(Channel::Thermocouple, UpdateRate::Hz33_2).unwrap();

        spi.done();
        cs.done();
    }

    #[test]
    fn test_ready_and_fetch() {
        let (mut adc, mut spi, mut cs) = connect(
            &[
                SpiTransaction::write(vec![0x40]),
                SpiTransaction::transfer(vec![0xFF], vec![0x88]),
                SpiTransaction::write(vec![0x40]),
                SpiTransaction::transfer(vec![0xFF], vec![0x08]),
                SpiTransaction::write(vec![0x58]),
                SpiTransaction::transfer(vec![0xFF, 0xFF, 0xFF], vec![0x80, 0x00, 0x00]),
            ],
            3,
        );

        assert!(!adc.is_ready().unwrap());
        assert!(adc.is_ready().unwrap());

        let v = adc.fetch(Channel::Reference).unwrap();
        assert_approx_eq!(v, 0.585, 1e-6);

        spi.done();
        cs.done();
    }
}
