//! The tarval (target value) engine (spec §4.B).
//!
//! Tarvals are interned: equal `(mode, bit pattern)` always yields the same
//! `Tarval` handle, so `Tarval::eq` is a pointer comparison. Integer payload
//! is normalized (sign-extended, overflow-checked) through
//! [`get_tarval_overflow`] before interning; floats are normalized through
//! the mode's storage width (`f32` truncation for `mode_F`).

mod fltcalc;
mod strcalc;

pub use fltcalc::{FloatConfig, FltCmp};
pub use strcalc::Wide;

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;

use crate::mode::{self, Mode};

/// Selects what happens when an integer operation's mathematical result
/// does not fit the destination mode (spec §4.B / §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Truncate to the mode's width. Default, matches languages with
    /// defined-overflow integer semantics.
    Wrap,
    /// Clamp to the mode's `min`/`max`.
    Saturate,
    /// Return the `bad` tarval; the caller must handle folding failure.
    Bad,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Wrap
    }
}

static OVERFLOW_POLICY: Mutex<OverflowPolicy> = Mutex::new(OverflowPolicy::Wrap);

pub fn set_overflow_policy(policy: OverflowPolicy) {
    *OVERFLOW_POLICY.lock().expect("overflow policy lock poisoned") = policy;
}

pub fn overflow_policy() -> OverflowPolicy {
    *OVERFLOW_POLICY.lock().expect("overflow policy lock poisoned")
}

static FLOAT_CONFIG: Mutex<FloatConfig> = Mutex::new(FloatConfig {
    no_infinity: false,
    no_denormals: false,
    no_float: false,
});

pub fn set_float_config(cfg: FloatConfig) {
    *FLOAT_CONFIG.lock().expect("float config lock poisoned") = cfg;
}

pub fn float_config() -> FloatConfig {
    *FLOAT_CONFIG.lock().expect("float config lock poisoned")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Payload {
    Int(i128),
    Float(f64),
    Bool(bool),
    Bad,
    Undefined,
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum InternKey {
    Int(i128),
    FloatBits(u64),
    Bool(bool),
    Bad,
    Undefined,
    Reachable,
    Unreachable,
}

impl Payload {
    fn key(self) -> InternKey {
        match self {
            Payload::Int(v) => InternKey::Int(v),
            Payload::Float(f) => InternKey::FloatBits(f.to_bits()),
            Payload::Bool(b) => InternKey::Bool(b),
            Payload::Bad => InternKey::Bad,
            Payload::Undefined => InternKey::Undefined,
            Payload::Reachable => InternKey::Reachable,
            Payload::Unreachable => InternKey::Unreachable,
        }
    }
}

struct TarvalData {
    mode: Mode,
    payload: Payload,
}

/// An interned constant tagged with a [`Mode`]. Cheap to `Clone` (an `Arc`
/// bump) and `PartialEq` (a pointer compare).
#[derive(Clone)]
pub struct Tarval(Arc<TarvalData>);

impl PartialEq for Tarval {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Tarval {}

impl Hash for Tarval {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Tarval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self, self.0.mode)
    }
}

impl fmt::Display for Tarval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.payload {
            Payload::Int(v) => write!(f, "{v}"),
            Payload::Float(v) => write!(f, "{v}"),
            Payload::Bool(b) => write!(f, "{b}"),
            Payload::Bad => write!(f, "<bad>"),
            Payload::Undefined => write!(f, "<undefined>"),
            Payload::Reachable => write!(f, "<reachable>"),
            Payload::Unreachable => write!(f, "<unreachable>"),
        }
    }
}

type InternTable = HashMap<(u16, InternKey), Tarval>;
static INTERN: OnceLock<Mutex<InternTable>> = OnceLock::new();

fn intern_table() -> &'static Mutex<InternTable> {
    INTERN.get_or_init(|| Mutex::new(HashMap::new()))
}

fn intern(mode: Mode, payload: Payload) -> Tarval {
    let key = (mode.0, payload.key());
    let mut table = intern_table().lock().expect("tarval intern lock poisoned");
    if let Some(tv) = table.get(&key) {
        return tv.clone();
    }
    let tv = Tarval(Arc::new(TarvalData { mode, payload }));
    table.insert(key, tv.clone());
    tv
}

/// Drops every interned tarval. Mirrors `finish_tarval` (spec §3
/// "Lifecycles"); called from the crate's `finish()` during process
/// teardown.
pub fn finish_tarval() {
    intern_table()
        .lock()
        .expect("tarval intern lock poisoned")
        .clear();
}

fn sign_extend(value: i128, width_bits: u32, signed: bool) -> i128 {
    if width_bits == 0 || width_bits >= 128 {
        return value;
    }
    let mask = (1i128 << width_bits) - 1;
    let truncated = value & mask;
    if signed && (truncated & (1i128 << (width_bits - 1))) != 0 {
        truncated | !mask
    } else {
        truncated
    }
}

/// Normalizes a raw (possibly out-of-range) integer result for `mode`
/// according to the active [`OverflowPolicy`], then interns it. This is the
/// single chokepoint every integer arithmetic entry point funnels through
/// (spec §4.B "Interning").
pub fn get_tarval_overflow(mode: Mode, wide: Wide) -> Tarval {
    debug_assert!(mode.is_int() || mode.is_reference());
    let width = mode.size_bits();
    let normalized = sign_extend(wide.value, width, mode.is_signed());
    if wide.overflowed || normalized != wide.value {
        match overflow_policy() {
            OverflowPolicy::Wrap => intern(mode, Payload::Int(normalized)),
            OverflowPolicy::Saturate => {
                if wide.value > 0 {
                    mode.max()
                } else {
                    mode.min()
                }
            }
            OverflowPolicy::Bad => tarval_bad(),
        }
    } else {
        intern(mode, Payload::Int(normalized))
    }
}

fn float_bits_for_mode(mode: Mode, value: f64) -> f64 {
    if mode == mode::mode_F {
        fltcalc::cast_narrow_to_f32(value)
    } else {
        value
    }
}

pub fn get_tarval_float(mode: Mode, value: f64) -> Tarval {
    debug_assert!(mode.is_float());
    if value.is_nan() {
        // Canonicalize all NaN payloads to one bit pattern so NaN tarvals
        // compare pointer-equal to each other, matching interning intent.
        return intern(mode, Payload::Float(f64::NAN));
    }
    intern(mode, Payload::Float(float_bits_for_mode(mode, value)))
}

pub fn tarval_bad() -> Tarval {
    intern(mode::mode_BAD, Payload::Bad)
}

pub fn tarval_undefined(mode: Mode) -> Tarval {
    intern(mode, Payload::Undefined)
}

pub fn tarval_reachable() -> Tarval {
    intern(mode::mode_X, Payload::Reachable)
}

pub fn tarval_unreachable() -> Tarval {
    intern(mode::mode_X, Payload::Unreachable)
}

pub fn tarval_bool(value: bool) -> Tarval {
    intern(mode::mode_b, Payload::Bool(value))
}

#[derive(Debug, Error)]
pub enum TarvalConvertError {
    #[error("cannot convert tarval of mode {from} to incompatible mode {to}")]
    IncompatibleSort { from: Mode, to: Mode },
}

pub fn new_tarval_from_long(n: i128, mode: Mode) -> Tarval {
    get_tarval_overflow(mode, Wide { value: n, overflowed: false })
}

pub fn new_tarval_from_double(value: f64, mode: Mode) -> Tarval {
    get_tarval_float(mode, value)
}

/// Parses a decimal or `0x`-prefixed hex literal for an integer mode, or a
/// decimal float literal for a float mode.
pub fn new_tarval_from_str(s: &str, mode: Mode) -> Option<Tarval> {
    if mode.is_int() || mode.is_reference() {
        let n = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            i128::from_str_radix(hex, 16).ok()?
        } else {
            s.parse::<i128>().ok()?
        };
        Some(new_tarval_from_long(n, mode))
    } else if mode.is_float() {
        let f: f64 = s.parse().ok()?;
        Some(new_tarval_from_double(f, mode))
    } else {
        None
    }
}

/// True iff the tarval's value fits a host `i64` under the mode's width.
pub fn tarval_is_long(tv: &Tarval) -> bool {
    match tv.0.payload {
        Payload::Int(v) => i64::try_from(v).is_ok(),
        _ => false,
    }
}

pub fn get_tarval_long(tv: &Tarval) -> Option<i64> {
    match tv.0.payload {
        Payload::Int(v) => i64::try_from(v).ok(),
        _ => None,
    }
}

pub fn get_tarval_double(tv: &Tarval) -> Option<f64> {
    match tv.0.payload {
        Payload::Float(f) => Some(f),
        _ => None,
    }
}

impl Tarval {
    pub fn mode(&self) -> Mode {
        self.0.mode
    }

    pub fn is_bad(&self) -> bool {
        matches!(self.0.payload, Payload::Bad)
    }

    pub fn is_constant_like(&self) -> bool {
        !matches!(
            self.0.payload,
            Payload::Bad | Payload::Undefined | Payload::Unreachable
        )
    }

    pub fn is_null(&self) -> bool {
        match self.0.payload {
            Payload::Int(v) => v == 0,
            Payload::Float(f) => f == 0.0,
            _ => false,
        }
    }

    pub fn is_negative(&self) -> bool {
        match self.0.payload {
            Payload::Int(v) => v < 0,
            Payload::Float(f) => f < 0.0,
            _ => false,
        }
    }

    pub fn is_all_one(&self) -> bool {
        match self.0.payload {
            Payload::Int(v) => {
                let width = self.0.mode.size_bits();
                sign_extend(-1, width, true) == v
            }
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.0.payload {
            Payload::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Little-endian byte `i` of the value's storage representation
    /// (spec §4.B, used by code emission).
    pub fn sub_bits(&self, i: usize) -> u8 {
        match self.0.payload {
            Payload::Int(v) => ((v as u128) >> (i * 8)) as u8,
            Payload::Float(f) => {
                let bits = if self.0.mode == mode::mode_F {
                    (f as f32).to_bits() as u64
                } else {
                    f.to_bits()
                };
                (bits >> (i * 8)) as u8
            }
            _ => 0,
        }
    }
}

/// `tarval_cmp`'s result: a 4-valued partial order plus `False` for
/// incomparable (`bad`/mixed-mode) operands (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpResult {
    Lt,
    Eq,
    Gt,
    Uo,
    False,
}

pub fn tarval_cmp(a: &Tarval, b: &Tarval) -> CmpResult {
    if a.is_bad() || b.is_bad() || a.0.mode != b.0.mode {
        return CmpResult::False;
    }
    match (a.0.payload, b.0.payload) {
        (Payload::Int(x), Payload::Int(y)) => match x.cmp(&y) {
            std::cmp::Ordering::Less => CmpResult::Lt,
            std::cmp::Ordering::Equal => CmpResult::Eq,
            std::cmp::Ordering::Greater => CmpResult::Gt,
        },
        (Payload::Float(x), Payload::Float(y)) => match fltcalc::compare(x, y) {
            FltCmp::Lt => CmpResult::Lt,
            FltCmp::Eq => CmpResult::Eq,
            FltCmp::Gt => CmpResult::Gt,
            FltCmp::Unordered => CmpResult::Uo,
        },
        (Payload::Bool(x), Payload::Bool(y)) => {
            if x == y {
                CmpResult::Eq
            } else {
                CmpResult::False
            }
        }
        _ => CmpResult::False,
    }
}

/// Converts `tv` to `mode`, following every sensible cast the spec names:
/// int<->int (sign/zero extend or truncate), int->float (via decimal
/// intermediate), float->int (truncate), float<->float (narrow/widen).
/// Returns `tarval_bad()` for unsupported sort pairs.
pub fn tarval_convert_to(tv: &Tarval, mode: Mode) -> Tarval {
    if tv.0.mode == mode {
        return tv.clone();
    }
    match tv.0.payload {
        Payload::Int(v) if mode.is_int() || mode.is_reference() => {
            get_tarval_overflow(mode, Wide { value: v, overflowed: false })
        }
        Payload::Int(v) if mode.is_float() => {
            // int -> float via decimal intermediate: deliberate
            // fidelity/perf trade-off (spec §4.B).
            let s = v.to_string();
            match s.parse::<f64>() {
                Ok(f) => get_tarval_float(mode, f),
                Err(_) => tarval_bad(),
            }
        }
        Payload::Float(f) if mode.is_int() || mode.is_reference() => {
            match fltcalc::flt2int(f, mode.size_bits(), mode.is_signed()) {
                Some(v) => get_tarval_overflow(mode, Wide { value: v, overflowed: false }),
                None => tarval_bad(),
            }
        }
        Payload::Float(f) if mode.is_float() => get_tarval_float(mode, f),
        _ => tarval_bad(),
    }
}

// --- Arithmetic entry points used by the local optimizer's computed_value
// stage (spec §4.F item 1). Each takes same-mode operands (the caller is
// required to have already checked mode compatibility) and funnels the
// wide result through `get_tarval_overflow`.

macro_rules! int_binop {
    ($name:ident, $calc:path) => {
        pub fn $name(a: &Tarval, b: &Tarval) -> Tarval {
            match (a.0.payload, b.0.payload) {
                (Payload::Int(x), Payload::Int(y)) => {
                    get_tarval_overflow(a.0.mode, $calc(x, y))
                }
                _ => tarval_bad(),
            }
        }
    };
}

int_binop!(tarval_add, strcalc::add);
int_binop!(tarval_sub, strcalc::sub);
int_binop!(tarval_mul, strcalc::mul);
int_binop!(tarval_and, strcalc::and);
int_binop!(tarval_or, strcalc::or);
int_binop!(tarval_eor, strcalc::xor);

pub fn tarval_div(a: &Tarval, b: &Tarval) -> Tarval {
    match (a.0.payload, b.0.payload) {
        (Payload::Int(x), Payload::Int(y)) => match strcalc::div(x, y) {
            Some(w) => get_tarval_overflow(a.0.mode, w),
            None => tarval_bad(),
        },
        _ => tarval_bad(),
    }
}

pub fn tarval_mod(a: &Tarval, b: &Tarval) -> Tarval {
    match (a.0.payload, b.0.payload) {
        (Payload::Int(x), Payload::Int(y)) => match strcalc::rem(x, y) {
            Some(w) => get_tarval_overflow(a.0.mode, w),
            None => tarval_bad(),
        },
        _ => tarval_bad(),
    }
}

pub fn tarval_neg(a: &Tarval) -> Tarval {
    match a.0.payload {
        Payload::Int(x) => get_tarval_overflow(a.0.mode, strcalc::neg(x)),
        Payload::Float(x) => get_tarval_float(a.0.mode, fltcalc::neg(x)),
        _ => tarval_bad(),
    }
}

pub fn tarval_not(a: &Tarval) -> Tarval {
    match a.0.payload {
        Payload::Int(x) => get_tarval_overflow(a.0.mode, strcalc::not(x)),
        _ => tarval_bad(),
    }
}

pub fn tarval_shl(a: &Tarval, shift: u32) -> Tarval {
    match a.0.payload {
        Payload::Int(x) => {
            get_tarval_overflow(a.0.mode, strcalc::shl(x, shift, a.0.mode.modulo_shift()))
        }
        _ => tarval_bad(),
    }
}

pub fn tarval_shr(a: &Tarval, shift: u32) -> Tarval {
    match a.0.payload {
        Payload::Int(x) => get_tarval_overflow(
            a.0.mode,
            strcalc::shr(x, shift, a.0.mode.modulo_shift(), a.0.mode.size_bits()),
        ),
        _ => tarval_bad(),
    }
}

pub fn tarval_shrs(a: &Tarval, shift: u32) -> Tarval {
    match a.0.payload {
        Payload::Int(x) => {
            get_tarval_overflow(a.0.mode, strcalc::shrs(x, shift, a.0.mode.modulo_shift()))
        }
        _ => tarval_bad(),
    }
}

pub fn tarval_rotl(a: &Tarval, shift: u32) -> Tarval {
    match a.0.payload {
        Payload::Int(x) => {
            get_tarval_overflow(a.0.mode, strcalc::rotl(x, shift, a.0.mode.size_bits()))
        }
        _ => tarval_bad(),
    }
}

macro_rules! float_binop {
    ($name:ident, $calc:path) => {
        pub fn $name(a: &Tarval, b: &Tarval) -> Tarval {
            match (a.0.payload, b.0.payload) {
                (Payload::Float(x), Payload::Float(y)) => {
                    get_tarval_float(a.0.mode, $calc(x, y, float_config()))
                }
                _ => tarval_bad(),
            }
        }
    };
}

float_binop!(tarval_fadd, fltcalc::add);
float_binop!(tarval_fsub, fltcalc::sub);
float_binop!(tarval_fmul, fltcalc::mul);
float_binop!(tarval_fdiv, fltcalc::div);

pub fn tarval_fabs(a: &Tarval) -> Tarval {
    match a.0.payload {
        Payload::Float(x) => get_tarval_float(a.0.mode, fltcalc::abs(x)),
        _ => tarval_bad(),
    }
}

// --- Functions used by `mode.rs` to lazily populate per-mode constants.
// Kept crate-private: only the mode registry's caching wrapper calls these.

pub(crate) fn compute_min(mode: Mode) -> Tarval {
    if mode.is_float() {
        return get_tarval_float(mode, f64::NEG_INFINITY);
    }
    let width = mode.size_bits();
    let v = if mode.is_signed() {
        if width >= 128 {
            i128::MIN
        } else {
            -(1i128 << (width - 1))
        }
    } else {
        0
    };
    new_tarval_from_long(v, mode)
}

pub(crate) fn compute_max(mode: Mode) -> Tarval {
    if mode.is_float() {
        return get_tarval_float(mode, f64::INFINITY);
    }
    let width = mode.size_bits();
    let v = if mode.is_signed() {
        if width >= 128 {
            i128::MAX
        } else {
            (1i128 << (width - 1)) - 1
        }
    } else if width >= 128 {
        i128::MAX
    } else {
        (1i128 << width) - 1
    };
    new_tarval_from_long(v, mode)
}

pub(crate) fn compute_null(mode: Mode) -> Tarval {
    if mode.is_float() {
        get_tarval_float(mode, 0.0)
    } else {
        new_tarval_from_long(0, mode)
    }
}

pub(crate) fn compute_one(mode: Mode) -> Tarval {
    if mode.is_float() {
        get_tarval_float(mode, 1.0)
    } else {
        new_tarval_from_long(1, mode)
    }
}

pub(crate) fn compute_minus_one(mode: Mode) -> Tarval {
    if mode.is_float() {
        get_tarval_float(mode, -1.0)
    } else {
        new_tarval_from_long(-1, mode)
    }
}

pub(crate) fn compute_all_one(mode: Mode) -> Tarval {
    if mode.is_float() {
        return tarval_bad();
    }
    new_tarval_from_long(-1, mode)
}
