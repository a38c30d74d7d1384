use std::error::Error;

/// Boxed static error type
pub type Err = Box<dyn Error + 'static>;

/// Default cutoff for `log_sum_delta`: past this gap the smaller term is below f32
/// resolution anyway.
pub const DEFAULT_LOG_SUM_DELTA: f32 = 16.0;

const APPROX_TABLE_RESOLUTION: f32 = 1024.0;
const APPROX_TABLE_RANGE: f32 = 32.0;

lazy_static! {
  /// `ln(1 + e^-x)` sampled over `[0, APPROX_TABLE_RANGE)`.
  static ref LOG1P_EXP_TABLE: Vec<f32> = {
    let len = (APPROX_TABLE_RANGE * APPROX_TABLE_RESOLUTION) as usize;
    (0..len)
      .map(|i| (-(i as f64) / APPROX_TABLE_RESOLUTION as f64).exp().ln_1p() as f32)
      .collect()
  };
}

/// Exact log-space addition: `ln(e^a + e^b)`.
///
/// Negative infinity is the additive identity, and the result is never NaN
/// for any pair of non-NaN inputs.
///
/// ```
/// use chartparse::utils::log_sum;
///
/// let half = 0.5f32.ln();
/// assert!((log_sum(half, half) - 0.0).abs() < 1e-6);
/// assert_eq!(log_sum(f32::NEG_INFINITY, -3.0), -3.0);
/// ```
pub fn log_sum(a: f32, b: f32) -> f32 {
  let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
  if lo == f32::NEG_INFINITY {
    return hi;
  }
  hi + (lo - hi).exp().ln_1p()
}

/// Log-space addition which ignores the smaller term once it trails the larger by more
/// than `delta`.
pub fn log_sum_delta(a: f32, b: f32, delta: f32) -> f32 {
  let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
  if lo == f32::NEG_INFINITY || hi - lo > delta {
    return hi;
  }
  hi + (lo - hi).exp().ln_1p()
}

/// Table-driven approximation of `log_sum_delta`, accurate to roughly 1e-3.
pub fn approximate_log_sum(a: f32, b: f32, delta: f32) -> f32 {
  let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
  let gap = hi - lo;
  if lo == f32::NEG_INFINITY || gap > delta || gap >= APPROX_TABLE_RANGE {
    return hi;
  }
  hi + LOG1P_EXP_TABLE[(gap * APPROX_TABLE_RESOLUTION) as usize]
}

/// Sums in log space with the exact or table-driven variant.
pub fn log_sum_with(a: f32, b: f32, delta: f32, approximate: bool) -> f32 {
  if approximate {
    approximate_log_sum(a, b, delta)
  } else {
    log_sum_delta(a, b, delta)
  }
}

/// Maps a float onto a `u32` whose unsigned order matches the float order (for non-NaN values).
pub fn ordered_bits(f: f32) -> u32 {
  let bits = f.to_bits();
  if bits & 0x8000_0000 != 0 {
    !bits
  } else {
    bits | 0x8000_0000
  }
}

/// Inverse of `ordered_bits`.
pub fn from_ordered_bits(bits: u32) -> f32 {
  if bits & 0x8000_0000 != 0 {
    f32::from_bits(bits & 0x7fff_ffff)
  } else {
    f32::from_bits(!bits)
  }
}
