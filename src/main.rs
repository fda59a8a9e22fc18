//! Thermo-node command-line utility
//!
//! Copyright 2016-2019 thermo-node authors

extern crate embedded_hal;
extern crate linux_embedded_hal;
use linux_embedded_hal::spidev::{SpidevOptions, SPI_MODE_3, SPI_NO_CS};
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{Pin, Spidev};

extern crate structopt;
use structopt::StructOpt;

extern crate humantime;
use humantime::Duration as HumanDuration;

#[macro_use]
extern crate log;
extern crate simplelog;
use simplelog::{LevelFilter, TermLogger};

extern crate thermo_node;
use thermo_node::adc::UpdateRate;
use thermo_node::clock::{Clock, Timestamp};
use thermo_node::flash_log::FlashLog;
use thermo_node::recorder::{Disposition, Link, Publish, Recorder};
use thermo_node::session::{Config, Poll, Profile, Session};
use thermo_node::solver::Calibration;
use thermo_node::{Ad7793, FlashRecord, Sst25};

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(StructOpt)]
#[structopt(name = "thermo-util")]
/// A Command Line Interface (CLI) for a thermocouple node attached to a local SPI bus
pub struct Options {
    #[structopt(subcommand)]
    cmd: Command,

    /// Specify the spi interface connected to the AD7793
    #[structopt(long = "adc-spi", default_value = "/dev/spidev0.0", env = "THERMO_ADC_SPI")]
    adc_spi: String,

    /// GPIO number of the AD7793 chip select
    #[structopt(long = "adc-cs", default_value = "22")]
    adc_cs: u64,

    /// Specify the spi interface connected to the SST25 flash
    #[structopt(long = "flash-spi", default_value = "/dev/spidev0.1", env = "THERMO_FLASH_SPI")]
    flash_spi: String,

    /// GPIO number of the flash chip select
    #[structopt(long = "flash-cs", default_value = "27")]
    flash_cs: u64,

    /// SPI clock speed
    #[structopt(long = "spi-baud", default_value = "1000000")]
    baud: u32,

    /// Enable verbose logging
    #[structopt(long = "log-level", default_value = "info")]
    level: LevelFilter,
}

#[derive(StructOpt)]
pub enum Command {
    #[structopt(name = "measure")]
    /// Run measurement sessions
    Measure {
        /// ADC update rate in Hz (4.17, 8.33, 16.7, 33.2, 62)
        #[structopt(long = "rate", default_value = "33.2")]
        rate: UpdateRate,

        /// Measurement profile (fast, slow, go-to-stable)
        #[structopt(long = "profile", default_value = "fast")]
        profile: Profile,

        /// Store results in the flash log instead of printing them
        #[structopt(long = "offline")]
        offline: bool,

        /// Repeat measurements with this period
        #[structopt(short = "p", long = "period")]
        period: Option<HumanDuration>,

        /// Calibration cold end coefficient
        #[structopt(long = "cal-a", default_value = "0.0")]
        cal_a: f32,

        /// Calibration work end coefficient
        #[structopt(long = "cal-b", default_value = "1.0")]
        cal_b: f32,

        /// Calibration offset in degrees
        #[structopt(long = "cal-delta", default_value = "0.0")]
        cal_delta: f32,
    },

    #[structopt(name = "sync")]
    /// Print and drain every stored result
    Sync,

    #[structopt(name = "status")]
    /// Show flash log cursors
    Status,

    #[structopt(name = "format")]
    /// Erase the flash and start an empty log
    Format,
}

/// Wall clock from the host system time
struct SystemClock;

#[derive(Debug)]
enum ClockError {
    Time(std::time::SystemTimeError),
    Parse(std::num::ParseIntError),
}

impl Clock for SystemClock {
    type Error = ClockError;

    fn now(&mut self) -> Result<Timestamp, Self::Error> {
        let now = SystemTime::now();
        let days = now.duration_since(UNIX_EPOCH).map_err(ClockError::Time)?.as_secs() / 86400;

        // YYYY-MM-DDTHH:MM:SSZ
        let s = humantime::format_rfc3339_seconds(now).to_string();
        let field = |r: std::ops::Range<usize>| s[r].parse::<u8>().map_err(ClockError::Parse);

        Ok(Timestamp {
            year: field(2..4)?,
            month: field(5..7)?,
            date: field(8..10)?,
            hour: field(11..13)?,
            min: field(14..16)?,
            sec: field(17..19)?,
            // 1970-01-01 was a Thursday, Monday is 1
            week: ((days + 3) % 7 + 1) as u8,
        })
    }
}

/// Publish sink writing results to stdout
struct StdoutSink;

impl Publish for StdoutSink {
    type Error = std::io::Error;

    fn publish(&mut self, record: &FlashRecord) -> Result<(), Self::Error> {
        let payload: Vec<String> = record.to_bytes().iter().map(|b| format!("{:02x}", b)).collect();
        writeln!(
            std::io::stdout(),
            "{} {:.2} C [{}]",
            record.timestamp,
            record.temperature(),
            payload.join(" ")
        )
    }

    fn sync_over(&mut self) -> Result<(), Self::Error> {
        writeln!(std::io::stdout(), "sync over")
    }
}

fn open_spi(path: &str, baud: u32) -> Result<Spidev, std::io::Error> {
    let mut spi = Spidev::open(path)?;

    let options = SpidevOptions::new()
        .max_speed_hz(baud)
        .mode(SPI_MODE_3 | SPI_NO_CS)
        .build();
    spi.configure(&options)?;

    Ok(spi)
}

fn open_cs(num: u64) -> Result<Pin, linux_embedded_hal::sysfs_gpio::Error> {
    let cs = Pin::new(num);
    cs.export()?;
    cs.set_direction(Direction::High)?;
    Ok(cs)
}

fn main() {
    // Load options
    let opts = Options::from_args();

    // Setup logging
    if let Err(e) = TermLogger::init(opts.level, simplelog::Config::default()) {
        eprintln!("Error initialising logger: {:?}", e);
    }

    debug!("Connecting to flash");
    let flash = match open_spi(&opts.flash_spi, opts.baud) {
        Ok(v) => v,
        Err(e) => {
            error!("Error opening SPI device '{}': {:?}", &opts.flash_spi, e);
            std::process::exit(-1);
        }
    };
    let flash_cs = match open_cs(opts.flash_cs) {
        Ok(v) => v,
        Err(e) => {
            error!("Error opening flash chip select {}: {:?}", opts.flash_cs, e);
            std::process::exit(-1);
        }
    };
    let flash = match Sst25::new(flash, flash_cs) {
        Ok(v) => v,
        Err(e) => {
            error!("Error connecting to SST25: {:?}", e);
            std::process::exit(-2);
        }
    };

    let mut log = match FlashLog::init(flash) {
        Ok(v) => v,
        Err(e) => {
            error!("Error opening flash log: {:?}", e);
            std::process::exit(-2);
        }
    };

    let (rate, profile, offline, period, calibration) = match opts.cmd {
        Command::Status => {
            println!(
                "write: {:?} read: {:?} pending: {} capacity: {}",
                log.write_cursor(),
                log.read_cursor(),
                log.pending(),
                log.geometry().capacity()
            );
            return;
        }
        Command::Format => {
            if let Err(e) = log.format() {
                error!("Error formatting flash: {:?}", e);
                std::process::exit(-3);
            }
            return;
        }
        Command::Sync => {
            let mut recorder = Recorder::new(log, StdoutSink);
            let n = recorder.set_link(Link::Online).and_then(|_| recorder.sync_all());
            match n {
                Ok(n) => info!("Synced {} results", n),
                Err(e) => {
                    error!("Error syncing flash log: {:?}", e);
                    std::process::exit(-4);
                }
            }
            return;
        }
        Command::Measure {
            rate,
            profile,
            offline,
            period,
            cal_a,
            cal_b,
            cal_delta,
        } => (
            rate,
            profile,
            offline,
            period.map(|p| *p),
            Calibration::new(cal_a, cal_b, cal_delta),
        ),
    };

    debug!("Connecting to AD7793");
    let adc = match open_spi(&opts.adc_spi, opts.baud) {
        Ok(v) => v,
        Err(e) => {
            error!("Error opening SPI device '{}': {:?}", &opts.adc_spi, e);
            std::process::exit(-1);
        }
    };
    let adc_cs = match open_cs(opts.adc_cs) {
        Ok(v) => v,
        Err(e) => {
            error!("Error opening ADC chip select {}: {:?}", opts.adc_cs, e);
            std::process::exit(-1);
        }
    };
    let adc = match Ad7793::new(adc, adc_cs) {
        Ok(v) => v,
        Err(e) => {
            error!("Error connecting to AD7793: {:?}", e);
            std::process::exit(-2);
        }
    };

    let config = Config {
        rate,
        profile,
        calibration,
        ..Config::default()
    };
    let mut session = Session::new(adc, config);
    let mut clock = SystemClock;

    let mut recorder = Recorder::new(log, StdoutSink);
    let link = if offline { Link::Offline } else { Link::Online };
    if let Err(e) = recorder.set_link(link) {
        error!("Error setting link state: {:?}", e);
        std::process::exit(-4);
    }

    loop {
        debug!("Starting measurement session");

        let outcome = loop {
            match session.poll() {
                Ok(Poll::Pending { retry_ms }) => {
                    std::thread::sleep(std::time::Duration::from_millis(retry_ms as u64));
                }
                Ok(Poll::Done(o)) => break o,
                Err(e) => {
                    error!("Error sampling: {:?}", e);
                    std::process::exit(-5);
                }
            }
        };

        let now = match clock.now() {
            Ok(v) => v,
            Err(e) => {
                warn!("Error reading clock: {:?}", e);
                Timestamp::default()
            }
        };

        match recorder.record(now, outcome.temperature_c) {
            Ok(Disposition::Stored(c)) => info!("Stored {:.2} C at {:?}", outcome.temperature_c, c),
            Ok(_) => (),
            Err(e) => warn!("Error recording result: {:?}", e),
        }

        let period = match period {
            Some(p) => p,
            None => break,
        };

        std::thread::sleep(period);
        session.restart();
    }
}
