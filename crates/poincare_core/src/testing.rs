//! Vector fields and a capturing logger shared by the unit tests.

use crate::traits::{DynamicalSystem, Scalar};
use std::sync::{Mutex, Once};

/// `x' = y`, `y' = -x`: every circle is a periodic orbit of period 2π,
/// traversed clockwise.
#[derive(Debug, Clone, Copy)]
pub struct HarmonicOscillator;

impl<T: Scalar> DynamicalSystem<T> for HarmonicOscillator {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], _params: &[T], out: &mut [T]) {
        out[0] = x[1];
        out[1] = -x[0];
    }
}

/// Hopf normal form with a decaying third direction:
///
/// ```text
/// x' = mu x - y - x (x² + y²)
/// y' = x + mu y - y (x² + y²)
/// z' = -lambda z
/// ```
///
/// Params are `[mu, lambda]`. For `mu > 0` the circle of radius `sqrt(mu)` in
/// the plane `z = 0` is a stable limit cycle of period 2π with nontrivial
/// Floquet multipliers `exp(-4π mu)` and `exp(-2π lambda)`.
#[derive(Debug, Clone, Copy)]
pub struct HopfNormalForm;

impl<T: Scalar> DynamicalSystem<T> for HopfNormalForm {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
        let r2 = x[0] * x[0] + x[1] * x[1];
        out[0] = params[0] * x[0] - x[1] - x[0] * r2;
        out[1] = x[0] + params[0] * x[1] - x[1] * r2;
        out[2] = -params[1] * x[2];
    }
}

/// The harmonic oscillator moved to the center `(c, c)`, params `[c]`:
/// `x' = y - c`, `y' = c - x`.
#[derive(Debug, Clone, Copy)]
pub struct ShiftedOscillator;

impl<T: Scalar> DynamicalSystem<T> for ShiftedOscillator {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], params: &[T], out: &mut [T]) {
        out[0] = x[1] - params[0];
        out[1] = params[0] - x[0];
    }
}

static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            if let Ok(mut warnings) = WARNINGS.lock() {
                warnings.push(record.args().to_string());
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

/// Installs the capturing logger for this test binary. Idempotent.
pub fn capture_warnings() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Warn);
        }
    });
}

/// Warnings logged so far (by any test in this binary) that contain `needle`.
pub fn warnings_containing(needle: &str) -> usize {
    WARNINGS
        .lock()
        .map(|warnings| warnings.iter().filter(|w| w.contains(needle)).count())
        .unwrap_or(0)
}
