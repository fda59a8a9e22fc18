//! Measure offline, reboot, then sync the stored results

extern crate assert_approx_eq;
extern crate color_backtrace;
extern crate thermo_node;

use assert_approx_eq::assert_approx_eq;

use thermo_node::adc::{Acquire, Channel, UpdateRate};
use thermo_node::flash_log::{FlashLog, Geometry};
use thermo_node::recorder::{Disposition, Link, Publish, Recorder, SyncStep};
use thermo_node::session::{Config, Poll, Session, Termination};
use thermo_node::solver::{bridge_voltage, thermocouple_voltage};
use thermo_node::{FlashRecord, RamFlash, Timestamp};

/// Probe resting at ambient for ten iterations then held against skin
struct Probe {
    skin_c: f32,
    iteration: usize,
}

impl Acquire for Probe {
    type Error = ();

    fn start(&mut self, _channel: Channel, _rate: UpdateRate) -> Result<(), ()> {
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool, ()> {
        Ok(true)
    }

    fn fetch(&mut self, channel: Channel) -> Result<f32, ()> {
        let v = match channel {
            Channel::PtBridge => bridge_voltage(23.0, 0.9),
            Channel::Reference => 0.9,
            Channel::Thermocouple => {
                let w = if self.iteration % 80 < 10 { 22.0 } else { self.skin_c };
                self.iteration += 1;
                thermocouple_voltage(w, 23.0)
            }
        };
        Ok(v)
    }
}

#[derive(Default)]
struct Gateway {
    received: Vec<FlashRecord>,
    sync_overs: usize,
}

impl Publish for Gateway {
    type Error = ();

    fn publish(&mut self, record: &FlashRecord) -> Result<(), ()> {
        self.received.push(*record);
        Ok(())
    }

    fn sync_over(&mut self) -> Result<(), ()> {
        self.sync_overs += 1;
        Ok(())
    }
}

fn measure(skin_c: f32) -> f32 {
    let mut session = Session::new(Probe { skin_c, iteration: 0 }, Config::default());

    loop {
        match session.poll().unwrap() {
            Poll::Pending { .. } => (),
            Poll::Done(o) => {
                assert_eq!(o.termination, Termination::Stable);
                return o.temperature_c;
            }
        }
    }
}

#[test]
fn measure_store_reboot_sync() {
    color_backtrace::install();

    let geometry = Geometry {
        sector_size: 4096,
        sector_count: 8,
    };
    let log = FlashLog::init_with(RamFlash::new(4096, 8), geometry).unwrap();
    let mut recorder = Recorder::new(log, Gateway::default());

    let readings = [36.5f32, 36.8, 37.2];
    for (i, skin) in readings.iter().enumerate() {
        let t = measure(*skin);
        assert_approx_eq!(t, *skin, 0.1);

        let ts = Timestamp::new(16, 4, 25, 8, i as u8 * 10, 0, 1);
        match recorder.record(ts, t).unwrap() {
            Disposition::Stored(_) => (),
            d => panic!("unexpected disposition: {:?}", d),
        }
    }

    // Power cycle
    let (log, gateway) = recorder.free();
    let flash = log.free();
    let log = FlashLog::init_with(flash, geometry).unwrap();
    assert_eq!(log.pending(), 3);

    let mut recorder = Recorder::new(log, gateway);
    recorder.set_link(Link::Online).unwrap();

    let mut steps = 0;
    while let SyncStep::Sent(_) = recorder.sync_step().unwrap() {
        steps += 1;
    }
    assert_eq!(steps, 3);

    let gateway = recorder.sink();
    assert_eq!(gateway.sync_overs, 1);

    // Newest first
    let minutes: Vec<u8> = gateway.received.iter().map(|r| r.timestamp.min).collect();
    assert_eq!(minutes, vec![20, 10, 0]);
    assert_approx_eq!(gateway.received[0].temperature(), 37.2, 0.1);

    // Online results skip the log
    assert_eq!(recorder.record(Timestamp::default(), 36.6).unwrap(), Disposition::Published);
    assert_eq!(recorder.log().pending(), 0);
}
