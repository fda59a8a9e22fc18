//! Temperature solver
//!
//! Converts one set of raw voltages into cold junction (PT1000) and work end
//! (thermocouple tip) temperatures by solving the two sensor quadratics.
//!
//! Cold end, PT1000 against the reference resistor:
//!
//! ```text
//!  V_PT     R0_PT
//! ------ = ------- * (1 + a*t + b*t^2)
//!  V_REF    R_REF
//! ```
//!
//! Work end, thermocouple reference polynomial in millivolts:
//!
//! ```text
//! (a*t_w^2 + b*t_w) - (a*t_c^2 + b*t_c) - V_thermo = 0
//! ```
//!
//! Intermediates are computed in f64, the inputs and results stay f32.

/// R0_PT / R_REF, 1000.3 / 5000
pub const R0_RATIO: f64 = 0.20006;
/// PT1000 linear coefficient, from the PT1000 reference table
pub const PT1000_A: f64 = 0.003909234732360;
/// PT1000 quadratic coefficient, from the PT1000 reference table
pub const PT1000_B: f64 = -0.000000584884765;

/// Thermocouple quadratic coefficient (mV / C^2)
pub const THERMO_A: f64 = 0.000041922545506;
/// Thermocouple linear coefficient (mV / C)
pub const THERMO_B: f64 = 0.038603329738281;

/// Sentinel stored for a temperature with no physically valid root
pub const INVALID_DEGREE: f32 = -1.0;

/// Raw voltages captured in one sampling iteration
#[derive(PartialEq, Clone, Copy, Debug, Default)]
pub struct SampleTriplet {
    /// PT1000 bridge voltage
    pub pt_voltage: f32,
    /// Reference resistor voltage
    pub ref_voltage: f32,
    /// Thermocouple voltage
    pub thermo_voltage: f32,
}

/// Solver output for one iteration
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct IterationResult {
    pub triplet: SampleTriplet,
    /// Cold junction temperature, -1.0 when invalid
    pub cold_end_c: f32,
    /// Work end temperature, -1.0 when invalid
    pub work_end_c: f32,
    /// Gradient of the last stability fit when this iteration was recorded
    pub debug_gradient: f32,
}

impl IterationResult {
    /// An iteration with no solution yet
    pub fn empty(triplet: SampleTriplet) -> Self {
        Self {
            triplet,
            cold_end_c: INVALID_DEGREE,
            work_end_c: INVALID_DEGREE,
            debug_gradient: 0.0,
        }
    }

    /// Both temperatures are physically valid (non-negative)
    pub fn is_valid(&self) -> bool {
        self.cold_end_c >= 0.0 && self.work_end_c >= 0.0
    }
}

/// Positive root of `a*x^2 + b*x + c = 0`, None when the roots are not real
fn positive_root(a: f64, b: f64, c: f64) -> Option<f64> {
    if a == 0.0 {
        return None;
    }

    let d = b * b - 4.0 * a * c;
    if d < 0.0 || !d.is_finite() {
        return None;
    }

    let x = (-b + d.sqrt()) / (2.0 * a);
    if x.is_finite() {
        Some(x)
    } else {
        None
    }
}

/// Cold junction temperature from the PT1000 bridge and reference voltages
///
/// Returns None when the bridge equation has no real root (including a zero
/// reference voltage). The result may be negative for out of range inputs,
/// callers must check.
pub fn cold_end_temperature(pt_voltage: f32, ref_voltage: f32) -> Option<f32> {
    let tmp = R0_RATIO * ref_voltage as f64;

    let a1 = PT1000_B * tmp;
    let b1 = PT1000_A * tmp;
    let c1 = tmp - pt_voltage as f64;

    positive_root(a1, b1, c1).map(|t| t as f32)
}

/// Work end temperature from the cold junction temperature and thermocouple voltage
///
/// Returns None when the thermocouple equation has no real root.
pub fn work_end_temperature(cold_end_c: f32, thermo_voltage: f32) -> Option<f32> {
    let tc = cold_end_c as f64;

    // The reference table is in millivolts
    let c1 = -(THERMO_A * tc * tc + THERMO_B * tc) - 1000.0 * thermo_voltage as f64;

    positive_root(THERMO_A, THERMO_B, c1).map(|t| t as f32)
}

/// Solve both equations for one iteration
///
/// The thermocouple equation is only attempted with a valid cold end
/// temperature. Failed solutions are recorded as -1.0, check `is_valid`.
pub fn solve(triplet: SampleTriplet) -> IterationResult {
    let mut r = IterationResult::empty(triplet);

    let cold = match cold_end_temperature(triplet.pt_voltage, triplet.ref_voltage) {
        Some(t) => t,
        None => return r,
    };
    r.cold_end_c = cold;

    if cold < 0.0 {
        return r;
    }

    if let Some(work) = work_end_temperature(cold, triplet.thermo_voltage) {
        r.work_end_c = work;
    }

    r
}

/// PT1000 bridge voltage for a given cold junction temperature
/// This is the forward model of `cold_end_temperature`
pub fn bridge_voltage(cold_end_c: f32, ref_voltage: f32) -> f32 {
    let t = cold_end_c as f64;
    (R0_RATIO * ref_voltage as f64 * (1.0 + PT1000_A * t + PT1000_B * t * t)) as f32
}

/// Thermocouple voltage for a given work end and cold junction temperature
/// This is the forward model of `work_end_temperature`
pub fn thermocouple_voltage(work_end_c: f32, cold_end_c: f32) -> f32 {
    let w = work_end_c as f64;
    let c = cold_end_c as f64;
    let mv = (THERMO_A * w * w + THERMO_B * w) - (THERMO_A * c * c + THERMO_B * c);
    (mv / 1000.0) as f32
}

/// Factory calibration applied to a finished measurement
///
/// `output = a * cold_end + b * work_end + delta`
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Calibration {
    pub a: f32,
    pub b: f32,
    pub delta: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Calibration {
    /// No correction
    pub const IDENTITY: Self = Self {
        a: 0.0,
        b: 1.0,
        delta: 0.0,
    };

    pub const fn new(a: f32, b: f32, delta: f32) -> Self {
        Self { a, b, delta }
    }

    pub fn apply(&self, work_end_c: f32, cold_end_c: f32) -> f32 {
        self.a * cold_end_c + self.b * work_end_c + self.delta
    }
}

/// Round to the 0.05 degree display resolution, halves rounded up
pub fn round_resolution(t: f32) -> f32 {
    let steps = (t * 20.0 + 0.5) as i32;
    steps as f32 * 0.05
}
