//! IEEE-754 floating point arithmetic (spec §4.B, "fltcalc").
//!
//! `mode_F`/`mode_D` are backed directly by `f32`/`f64`. `mode_E` (the
//! 80-bit x87 extended format, 15 exponent + 64 mantissa bits) is modeled by
//! widening through `f64`; this loses the extra exponent range and explicit
//! integer bit of true 80-bit extended precision, the same
//! fidelity/performance trade-off the spec calls out for `tarval_convert_to`
//! going through a decimal intermediate.

use std::cmp::Ordering;

/// A 4-way partial order, matching `pn_Cmp`'s bit layout conceptually
/// (equal / less / greater / unordered) without importing the IR module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FltCmp {
    Lt,
    Eq,
    Gt,
    Unordered,
}

/// Build-time-ish switches; exposed as runtime fields instead of `#ifdef`s
/// per the design note in spec §9 about avoiding hidden globals.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatConfig {
    pub no_infinity: bool,
    pub no_denormals: bool,
    /// Disables all float folding outright (front-ends requiring exact
    /// reproduction of source float semantics set this).
    pub no_float: bool,
}

fn flush(x: f64, cfg: FloatConfig) -> f64 {
    let mut x = x;
    if cfg.no_infinity && x.is_infinite() {
        x = if x.is_sign_positive() {
            f64::MAX
        } else {
            f64::MIN
        };
    }
    if cfg.no_denormals && x != 0.0 && x.abs() < f64::MIN_POSITIVE {
        x = 0.0_f64.copysign(x);
    }
    x
}

pub fn add(a: f64, b: f64, cfg: FloatConfig) -> f64 {
    flush(a + b, cfg)
}
pub fn sub(a: f64, b: f64, cfg: FloatConfig) -> f64 {
    flush(a - b, cfg)
}
pub fn mul(a: f64, b: f64, cfg: FloatConfig) -> f64 {
    flush(a * b, cfg)
}
pub fn div(a: f64, b: f64, cfg: FloatConfig) -> f64 {
    flush(a / b, cfg)
}
pub fn neg(a: f64) -> f64 {
    -a
}
pub fn abs(a: f64) -> f64 {
    a.abs()
}

pub fn compare(a: f64, b: f64) -> FltCmp {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => FltCmp::Lt,
        Some(Ordering::Equal) => FltCmp::Eq,
        Some(Ordering::Greater) => FltCmp::Gt,
        None => FltCmp::Unordered,
    }
}

/// Truncate toward zero.
pub fn trunc(a: f64) -> f64 {
    a.trunc()
}

/// Round to nearest, ties to even.
pub fn round_even(a: f64) -> f64 {
    let r = a.round();
    // `f64::round` rounds ties away from zero; correct to ties-to-even.
    if (a - a.trunc()).abs() == 0.5 {
        let floor = a.floor();
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        r
    }
}

/// `flt2int`: converts to the nearest representable integer of `bits`
/// width, truncating toward zero; returns `None` if `a` doesn't fit.
pub fn flt2int(a: f64, bits: u32, signed: bool) -> Option<i128> {
    if !a.is_finite() {
        return None;
    }
    let t = a.trunc();
    let v = t as i128;
    let (lo, hi): (i128, i128) = if signed {
        let max = if bits >= 128 {
            i128::MAX
        } else {
            (1i128 << (bits - 1)) - 1
        };
        (-(max) - 1, max)
    } else {
        (0, if bits >= 128 { i128::MAX } else { (1i128 << bits) - 1 })
    };
    if v < lo || v > hi {
        None
    } else {
        Some(v)
    }
}

pub fn cast_narrow_to_f32(a: f64) -> f64 {
    (a as f32) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_nan_is_unordered() {
        assert_eq!(compare(f64::NAN, 1.0), FltCmp::Unordered);
    }

    #[test]
    fn compare_orders_finite_values() {
        assert_eq!(compare(1.0, 2.0), FltCmp::Lt);
        assert_eq!(compare(2.0, 2.0), FltCmp::Eq);
        assert_eq!(compare(3.0, 2.0), FltCmp::Gt);
    }

    #[test]
    fn round_even_ties_to_even() {
        assert_eq!(round_even(2.5), 2.0);
        assert_eq!(round_even(3.5), 4.0);
    }
}
