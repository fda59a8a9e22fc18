//! Thermocouple body temperature node
//!
//! Samples a thermocouple and its PT1000 cold junction through an AD7793,
//! tracks successive readings until they settle and keeps results that could
//! not be sent in a log on SPI NOR flash.
//!
//! Copyright 2016-2019 thermo-node authors

//#![no_std]

#[macro_use]
extern crate log;

extern crate embedded_hal;
extern crate heapless;

pub mod adc;
pub mod base;
pub mod clock;
pub mod device;
pub mod flash;
pub mod flash_log;
pub mod record;
pub mod recorder;
pub mod session;
pub mod solver;
pub mod tracker;

pub use adc::{Acquire, Ad7793, Channel, UpdateRate};
pub use clock::{Clock, Timestamp};
pub use flash::{FlashDevice, RamFlash, Sst25};
pub use flash_log::{Cursor, FlashLog, Geometry};
pub use record::FlashRecord;
pub use recorder::{Disposition, Link, Publish, Recorder, SyncStep};
pub use session::{Config, Outcome, Poll, Profile, Session, Termination};
pub use solver::{Calibration, IterationResult, SampleTriplet};
pub use tracker::ConvergenceTracker;
