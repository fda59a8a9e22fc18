//! Convergence tracking
//!
//! Each measurement session records up to `MAX_ITERATIONS` solver results.
//! The tracker first waits for a step change (the probe touching skin), then
//! fits a line through the last ten work end temperatures every fifth
//! iteration and declares the reading stable once the slope flattens out.

use heapless::Vec;

use crate::solver::IterationResult;

/// Sampling iterations per session
pub const MAX_ITERATIONS: usize = 80;

/// Change between results three iterations apart that counts as a step (degrees)
pub const STEP_CHANGE_THRESHOLD: f32 = 1.9;

/// Consecutive over-threshold changes required to accept a step change
pub const STEP_CHANGE_RUN: u16 = 3;

/// Gradient below which the temperature is stable (degrees per iteration)
pub const STABLE_GRADIENT_THRESHOLD: f32 = 0.005;

/// Results per least-squares window
pub const LSE_WINDOW: usize = 10;

/// Iterations between successive least-squares evaluations
pub const LSE_INTERVAL: u16 = 5;

/// Initial gradient, far outside any real slope
const GRADIENT_FLOOR: f32 = -999999.0;

/// Sentinel output before any estimate exists
const NO_OUTPUT: f32 = -1.0;

/// Tracker state for one session
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct ConvergenceState {
    pub step_change_detected: bool,
    pub step_change_run_length: u16,
    pub step_change_index: u16,
    pub prev_gradient: f32,
    pub curr_gradient: f32,
    pub output_c: f32,
}

impl ConvergenceState {
    fn new(detect_step_change: bool) -> Self {
        Self {
            // Without detection the session behaves as if the step already happened
            step_change_detected: !detect_step_change,
            step_change_run_length: 0,
            step_change_index: 0,
            prev_gradient: GRADIENT_FLOOR,
            curr_gradient: GRADIENT_FLOOR,
            output_c: NO_OUTPUT,
        }
    }
}

/// Result of recording one iteration
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Progress {
    /// Temperature is stable, stop sampling
    pub complete: bool,
    /// Current best estimate of the work end temperature
    pub output_c: f32,
    /// Cold junction temperature of the latest iteration
    pub cold_end_c: f32,
}

/// Errors recording an iteration
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum Error {
    /// All `MAX_ITERATIONS` slots are used
    Exhausted,
}

/// Least-squares line through ten samples at x = 0..9
///
/// Returns `(slope, intercept)`.
pub fn lse_of_ten(window: &[f32; LSE_WINDOW]) -> (f32, f32) {
    // sum(x) = 45, n*sum(x^2) - sum(x)^2 = 825
    let mut ysum = 0.0f32;
    let mut xysum = 0.0f32;

    for (x, y) in window.iter().enumerate() {
        ysum += y;
        xysum += x as f32 * y;
    }

    let slope = (10.0 * xysum - 45.0 * ysum) / 825.0;
    let intercept = (ysum - slope * 45.0) / 10.0;

    (slope, intercept)
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Convergence tracker owning the iteration history of one session
#[derive(Clone, Debug)]
pub struct ConvergenceTracker {
    detect_step_change: bool,
    history: Vec<IterationResult, MAX_ITERATIONS>,
    state: ConvergenceState,
}

impl ConvergenceTracker {
    /// Create a tracker, `detect_step_change` false tracks stability from the first iteration
    pub fn new(detect_step_change: bool) -> Self {
        Self {
            detect_step_change,
            history: Vec::new(),
            state: ConvergenceState::new(detect_step_change),
        }
    }

    /// Clear history and state for a new session
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = ConvergenceState::new(self.detect_step_change);
    }

    /// Recorded iterations
    pub fn history(&self) -> &[IterationResult] {
        &self.history
    }

    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }

    /// Number of iterations recorded so far
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// No more iterations can be recorded
    pub fn is_full(&self) -> bool {
        self.history.len() >= MAX_ITERATIONS
    }

    /// Record a valid iteration and evaluate convergence
    pub fn record(&mut self, result: IterationResult) -> Result<Progress, Error> {
        self.history.push(result).map_err(|_| Error::Exhausted)?;

        let i = self.history.len() - 1;
        let complete = self.evaluate(i);

        self.history[i].debug_gradient = self.state.curr_gradient;

        Ok(Progress {
            complete,
            output_c: self.state.output_c,
            cold_end_c: self.history[i].cold_end_c,
        })
    }

    /// Record an invalid iteration, ending the session
    ///
    /// The estimate so far is kept as the output, no further evaluation happens.
    pub fn fail(&mut self, result: IterationResult) -> Result<Progress, Error> {
        self.history.push(result).map_err(|_| Error::Exhausted)?;

        warn!(
            "Invalid reading at iteration {} (cold end: {:.2}, work end: {:.2})",
            self.history.len() - 1,
            result.cold_end_c,
            result.work_end_c
        );

        Ok(Progress {
            complete: true,
            output_c: self.state.output_c,
            cold_end_c: result.cold_end_c,
        })
    }

    fn evaluate(&mut self, i: usize) -> bool {
        let s = &mut self.state;

        if !s.step_change_detected {
            let change = if i >= 3 {
                self.history[i].work_end_c - self.history[i - 3].work_end_c
            } else {
                0.0
            };

            if change.abs() > STEP_CHANGE_THRESHOLD {
                s.step_change_run_length += 1;
            } else {
                s.step_change_run_length = 0;
            }

            if s.step_change_run_length >= STEP_CHANGE_RUN {
                s.step_change_index = i as u16 - s.step_change_run_length;
                s.step_change_detected = true;
                s.prev_gradient = GRADIENT_FLOOR;
                s.curr_gradient = GRADIENT_FLOOR;
                s.output_c = NO_OUTPUT;

                debug!("Step change detected at iteration {}", s.step_change_index);
            }
        }

        let since = i as u16 - s.step_change_index;
        if since < LSE_WINDOW as u16 || since % LSE_INTERVAL != 0 {
            return false;
        }

        let mut window = [0.0f32; LSE_WINDOW];
        for (w, r) in window.iter_mut().zip(&self.history[i + 1 - LSE_WINDOW..=i]) {
            *w = r.work_end_c;
        }
        let (gradient, intercept) = lse_of_ten(&window);

        s.prev_gradient = s.curr_gradient;
        s.curr_gradient = gradient;

        let sign_p = sign(s.prev_gradient);
        let sign_c = sign(s.curr_gradient);

        debug!(
            "Iteration {}: gradient {:.4} (previous {:.4}), intercept {:.2}",
            i, s.curr_gradient, s.prev_gradient, intercept
        );

        if sign_c * s.curr_gradient < STABLE_GRADIENT_THRESHOLD {
            s.output_c = intercept + s.curr_gradient * 5.0;
            s.step_change_detected
        } else if sign_p * s.prev_gradient < STEP_CHANGE_THRESHOLD && sign_p * sign_c < 0.0 {
            // Slope changed direction after flattening, settle on the crossing
            s.output_c = intercept + s.curr_gradient * 2.0;
            s.step_change_detected
        } else {
            s.output_c = self.history[i].work_end_c;
            false
        }
    }
}
