//! Polled measurement session
//!
//! A session samples the PT1000 bridge, the reference resistor and the
//! thermocouple in turn, solves the iteration and hands it to the convergence
//! tracker, until the tracker reports a stable reading or the iteration cap is
//! reached.
//!
//! Nothing in here blocks. `Session::poll` does one step of work and tells the
//! caller how long to wait before polling again.

use core::fmt::Debug;
use core::str::FromStr;

use crate::adc::{Acquire, Channel, UpdateRate};
use crate::solver::{self, Calibration, SampleTriplet};
use crate::tracker::{self, ConvergenceTracker, Progress, MAX_ITERATIONS};

/// Delay before a go-to-stable session starts over
pub const RESTART_DELAY_MS: u32 = 500;

/// Measurement strategy
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Profile {
    /// Wait for the probe to touch skin, finish as soon as the reading settles
    Fast,
    /// Track from the first iteration, never finish before 2/3 of the iteration cap
    Slow,
    /// Track from the first iteration, start over until a stable reading is found
    GoToStable,
}

impl Profile {
    fn detect_step_change(&self) -> bool {
        *self == Profile::Fast
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile::Fast
    }
}

impl FromStr for Profile {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Profile::Fast),
            "slow" => Ok(Profile::Slow),
            "go-to-stable" | "stable" => Ok(Profile::GoToStable),
            _ => Err("profile must be one of fast, slow, go-to-stable"),
        }
    }
}

/// Session configuration
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Config {
    pub rate: UpdateRate,
    /// Iteration cap, at most `MAX_ITERATIONS`
    pub max_iterations: usize,
    pub profile: Profile,
    pub calibration: Calibration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate: UpdateRate::default(),
            max_iterations: MAX_ITERATIONS,
            profile: Profile::default(),
            calibration: Calibration::default(),
        }
    }
}

impl Config {
    /// Wait after starting a conversion
    pub fn settle_ms(&self) -> u32 {
        self.rate.settle_ms()
    }

    /// Wait between ready polls once the settle time has passed
    pub fn retry_ms(&self) -> u32 {
        self.rate.settle_ms() / 10
    }

    /// Iterations a slow session runs before it may finish
    pub fn min_iterations(&self) -> usize {
        match self.profile {
            Profile::Slow => self.max_iterations * 2 / 3,
            _ => 0,
        }
    }
}

/// Why a session ended
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Termination {
    /// The tracker judged the temperature stable
    Stable,
    /// Iteration cap reached first, the output is a best effort estimate
    Timeout,
    /// A reading had no valid solution
    InvalidReading,
}

/// Finished measurement
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Outcome {
    /// Tracker output before calibration
    pub output_c: f32,
    /// Cold junction temperature of the last iteration
    pub cold_end_c: f32,
    /// Calibrated output rounded to 0.05 degrees, -1.0 after an invalid reading
    pub temperature_c: f32,
    pub termination: Termination,
    /// Iterations sampled in the final session
    pub iterations: usize,
}

impl Outcome {
    pub fn is_stable(&self) -> bool {
        self.termination == Termination::Stable
    }
}

/// Result of one poll
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Poll {
    /// Poll again after `retry_ms`
    Pending { retry_ms: u32 },
    /// Session finished
    Done(Outcome),
}

/// Session errors
#[derive(PartialEq, Clone, Debug)]
pub enum Error<AdcErr> {
    /// Acquisition failed
    Adc(AdcErr),
    /// Tracker refused the iteration
    Tracker(tracker::Error),
}

impl<AdcErr> From<tracker::Error> for Error<AdcErr> {
    fn from(e: tracker::Error) -> Self {
        Error::Tracker(e)
    }
}

#[derive(PartialEq, Clone, Copy, Debug)]
enum Stage {
    PtBridge,
    Reference,
    Thermocouple,
}

impl Stage {
    fn channel(&self) -> Channel {
        match self {
            Stage::PtBridge => Channel::PtBridge,
            Stage::Reference => Channel::Reference,
            Stage::Thermocouple => Channel::Thermocouple,
        }
    }
}

/// Measurement session driving one ADC
pub struct Session<A> {
    adc: A,
    config: Config,
    tracker: ConvergenceTracker,
    stage: Stage,
    sampling: bool,
    triplet: SampleTriplet,
    outcome: Option<Outcome>,
}

impl<A> Session<A>
where
    A: Acquire,
{
    pub fn new(adc: A, mut config: Config) -> Self {
        if config.max_iterations > MAX_ITERATIONS {
            warn!("Iteration cap {} limited to {}", config.max_iterations, MAX_ITERATIONS);
            config.max_iterations = MAX_ITERATIONS;
        }

        Self {
            adc,
            tracker: ConvergenceTracker::new(config.profile.detect_step_change()),
            config,
            stage: Stage::PtBridge,
            sampling: false,
            triplet: SampleTriplet::default(),
            outcome: None,
        }
    }

    /// Discard all progress and start a new measurement
    pub fn restart(&mut self) {
        self.tracker.reset();
        self.stage = Stage::PtBridge;
        self.sampling = false;
        self.triplet = SampleTriplet::default();
        self.outcome = None;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &ConvergenceTracker {
        &self.tracker
    }

    /// Release the ADC
    pub fn free(self) -> A {
        self.adc
    }

    /// Advance the session by one step
    ///
    /// Once finished the outcome is returned on every poll until `restart`.
    pub fn poll(&mut self) -> Result<Poll, Error<A::Error>> {
        if let Some(o) = self.outcome {
            return Ok(Poll::Done(o));
        }

        let channel = self.stage.channel();

        if !self.sampling {
            self.adc.start(channel, self.config.rate).map_err(Error::Adc)?;
            self.sampling = true;

            return Ok(Poll::Pending {
                retry_ms: self.config.settle_ms(),
            });
        }

        if !self.adc.is_ready().map_err(Error::Adc)? {
            return Ok(Poll::Pending {
                retry_ms: self.config.retry_ms(),
            });
        }

        let v = self.adc.fetch(channel).map_err(Error::Adc)?;
        self.sampling = false;

        trace!("{:?}: {:.6} V", channel, v);

        self.stage = match self.stage {
            Stage::PtBridge => {
                self.triplet.pt_voltage = v;
                Stage::Reference
            }
            Stage::Reference => {
                self.triplet.ref_voltage = v;
                Stage::Thermocouple
            }
            Stage::Thermocouple => {
                self.triplet.thermo_voltage = v;
                return self.iterate();
            }
        };

        Ok(Poll::Pending { retry_ms: 0 })
    }

    /// Solve and track the completed triplet
    fn iterate(&mut self) -> Result<Poll, Error<A::Error>> {
        let result = solver::solve(self.triplet);
        self.stage = Stage::PtBridge;
        self.triplet = SampleTriplet::default();

        let valid = result.is_valid();
        let Progress {
            mut complete,
            output_c,
            cold_end_c,
        } = if valid {
            self.tracker.record(result)?
        } else {
            self.tracker.fail(result)?
        };

        let iterations = self.tracker.len();
        if iterations < self.config.min_iterations() {
            complete = false;
        }

        if !complete && iterations < self.config.max_iterations {
            return Ok(Poll::Pending { retry_ms: 0 });
        }

        let termination = match (complete, valid) {
            (true, true) => Termination::Stable,
            (true, false) => Termination::InvalidReading,
            (false, _) => Termination::Timeout,
        };

        if termination == Termination::Timeout && self.config.profile == Profile::GoToStable {
            info!("No stable reading after {} iterations, restarting", iterations);
            self.restart();
            return Ok(Poll::Pending {
                retry_ms: RESTART_DELAY_MS,
            });
        }

        // An invalid reading leaves nothing worth reporting, whatever the estimate so far
        let temperature_c = match termination {
            Termination::InvalidReading => solver::INVALID_DEGREE,
            _ => solver::round_resolution(self.config.calibration.apply(output_c, cold_end_c)),
        };
        let outcome = Outcome {
            output_c,
            cold_end_c,
            temperature_c,
            termination,
            iterations,
        };

        info!(
            "Measurement finished: {:.2} C ({:?} after {} iterations, cold end {:.2} C)",
            temperature_c, termination, iterations, cold_end_c
        );

        self.outcome = Some(outcome);
        Ok(Poll::Done(outcome))
    }
}

impl<A> Debug for Session<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("stage", &self.stage)
            .field("sampling", &self.sampling)
            .field("iterations", &self.tracker.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::solver::{bridge_voltage, thermocouple_voltage};

    const REF_VOLTAGE: f32 = 0.8;

    /// ADC producing readings for a scripted work end temperature per iteration
    struct FakeAdc {
        work_end: fn(usize) -> f32,
        cold_end: f32,
        iteration: usize,
        busy_polls: u32,
        busy: u32,
        started: Option<Channel>,
    }

    impl FakeAdc {
        fn new(cold_end: f32, work_end: fn(usize) -> f32) -> Self {
            Self {
                work_end,
                cold_end,
                iteration: 0,
                busy_polls: 0,
                busy: 0,
                started: None,
            }
        }
    }

    impl Acquire for FakeAdc {
        type Error = ();

        fn start(&mut self, channel: Channel, _rate: UpdateRate) -> Result<(), ()> {
            self.started = Some(channel);
            self.busy = self.busy_polls;
            Ok(())
        }

        fn is_ready(&mut self) -> Result<bool, ()> {
            if self.busy > 0 {
                self.busy -= 1;
                return Ok(false);
            }
            Ok(true)
        }

        fn fetch(&mut self, channel: Channel) -> Result<f32, ()> {
            if self.started != Some(channel) {
                return Err(());
            }

            let v = match channel {
                Channel::PtBridge => bridge_voltage(self.cold_end, REF_VOLTAGE),
                Channel::Reference => REF_VOLTAGE,
                Channel::Thermocouple => {
                    let w = (self.work_end)(self.iteration);
                    self.iteration += 1;
                    thermocouple_voltage(w, self.cold_end)
                }
            };
            Ok(v)
        }
    }

    fn run<A: Acquire>(s: &mut Session<A>) -> (Outcome, Vec<u32>) {
        let mut waits = Vec::new();

        for _ in 0..10_000 {
            match s.poll().unwrap() {
                Poll::Pending { retry_ms } => waits.push(retry_ms),
                Poll::Done(o) => return (o, waits),
            }
        }
        panic!("session did not finish");
    }

    fn config(profile: Profile) -> Config {
        Config {
            profile,
            ..Config::default()
        }
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("fast".parse::<Profile>(), Ok(Profile::Fast));
        assert_eq!("go-to-stable".parse::<Profile>(), Ok(Profile::GoToStable));
        assert!("quick".parse::<Profile>().is_err());
    }

    #[test]
    fn test_step_change_session() {
        let adc = FakeAdc::new(24.0, |i| if i < 10 { 20.0 } else { 36.5 });
        let mut s = Session::new(adc, config(Profile::Fast));

        let (o, _) = run(&mut s);
        assert_eq!(o.termination, Termination::Stable);
        assert!(o.is_stable());
        assert!(o.iterations <= 26);
        assert_approx_eq!(o.output_c, 36.5, 0.1);
        assert_approx_eq!(o.temperature_c, 36.5, 1e-4);
        assert_approx_eq!(o.cold_end_c, 24.0, 1e-3);
        assert!(s.tracker().state().step_change_detected);

        // Finished sessions keep reporting the outcome
        assert_eq!(s.poll().unwrap(), Poll::Done(o));
    }

    #[test]
    fn test_poll_timing() {
        let mut adc = FakeAdc::new(24.0, |_| 36.5);
        adc.busy_polls = 2;
        let mut s = Session::new(adc, config(Profile::Fast));

        assert_eq!(s.config().settle_ms(), 63);

        let mut waits = [0u32; 12];
        for w in waits.iter_mut() {
            *w = match s.poll().unwrap() {
                Poll::Pending { retry_ms } => retry_ms,
                Poll::Done(_) => panic!("finished early"),
            };
        }

        // Start, two busy polls, fetch, for each of the three channels
        assert_eq!(waits, [63, 6, 6, 0, 63, 6, 6, 0, 63, 6, 6, 0]);
        assert_eq!(s.tracker().len(), 1);
    }

    #[test]
    fn test_invalid_reading_fails_fast() {
        let adc = FakeAdc::new(-5.0, |_| 36.5);
        let mut s = Session::new(adc, config(Profile::Fast));

        let (o, _) = run(&mut s);
        assert_eq!(o.termination, Termination::InvalidReading);
        assert_eq!(o.iterations, 1);
        assert_eq!(o.output_c, -1.0);
    }

    #[test]
    fn test_invalid_reading_discards_estimate() {
        let adc = FakeAdc::new(24.0, |i| if i == 16 { -10.0 } else { 33.0 });
        let mut s = Session::new(adc, config(Profile::Fast));

        let (o, _) = run(&mut s);
        assert_eq!(o.termination, Termination::InvalidReading);
        assert_eq!(o.iterations, 17);
        // The running estimate is kept for inspection only
        assert_approx_eq!(o.output_c, 33.0, 1e-3);
        assert_eq!(o.temperature_c, -1.0);
        assert!(!crate::recorder::is_acceptable(o.temperature_c));
    }

    #[test]
    fn test_no_step_change_times_out() {
        let adc = FakeAdc::new(24.0, |_| 36.5);
        let mut s = Session::new(adc, config(Profile::Fast));

        let (o, _) = run(&mut s);
        assert_eq!(o.termination, Termination::Timeout);
        assert_eq!(o.iterations, MAX_ITERATIONS);
        assert_approx_eq!(o.output_c, 36.5, 1e-3);
    }

    #[test]
    fn test_slow_profile_holds_off_completion() {
        let adc = FakeAdc::new(24.0, |_| 36.5);
        let mut s = Session::new(adc, config(Profile::Slow));

        let (o, _) = run(&mut s);
        assert_eq!(o.termination, Termination::Stable);
        // First fit at or beyond 53 iterations
        assert_eq!(o.iterations, 56);
    }

    #[test]
    fn test_go_to_stable_restarts() {
        let adc = FakeAdc::new(24.0, |i| if i < 80 { 30.0 + 0.1 * i as f32 } else { 36.5 });
        let mut s = Session::new(adc, config(Profile::GoToStable));

        let (o, waits) = run(&mut s);
        assert_eq!(waits.iter().filter(|w| **w == RESTART_DELAY_MS).count(), 1);
        assert_eq!(o.termination, Termination::Stable);
        assert_eq!(o.iterations, 11);
        assert_approx_eq!(o.temperature_c, 36.5, 1e-4);
    }

    #[test]
    fn test_calibration_applied() {
        let adc = FakeAdc::new(24.0, |i| if i < 10 { 20.0 } else { 36.5 });
        let mut c = config(Profile::Fast);
        c.calibration = Calibration::new(0.0, 1.0, 0.5);
        let mut s = Session::new(adc, c);

        let (o, _) = run(&mut s);
        assert_approx_eq!(o.temperature_c, 37.0, 1e-4);
    }

    #[test]
    fn test_restart_clears_progress() {
        let adc = FakeAdc::new(24.0, |_| 36.5);
        let mut s = Session::new(adc, config(Profile::Fast));

        for _ in 0..8 {
            s.poll().unwrap();
        }
        assert_eq!(s.tracker().len(), 1);

        s.restart();
        assert!(s.tracker().is_empty());
        assert_eq!(s.poll().unwrap(), Poll::Pending { retry_ms: 63 });
    }
}
