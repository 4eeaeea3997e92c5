//! The mode registry (spec §4.A).
//!
//! Modes are process-global and immutable after the registry is built.
//! Each predefined mode interns its own `min`/`max`/`0`/`1`/`-1`/`~0`
//! tarvals so callers never re-derive them.

use std::fmt;
use std::sync::{Mutex, OnceLock};

use strum::{Display, EnumIter};

use crate::tarval::Tarval;

/// Coarse classification of what a mode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Sort {
    Int,
    Reference,
    Float,
    Boolean,
    Memory,
    Control,
    Auxiliary,
    Tuple,
}

/// Which arithmetic engine, if any, backs values of this mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arithmetic {
    TwosComplement,
    Ieee754,
    None,
}

/// Opaque handle to an interned mode. Cheap to copy and compare.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(pub(crate) u16);

struct ModeRecord {
    name: &'static str,
    sort: Sort,
    size_bits: u32,
    signed: bool,
    arithmetic: Arithmetic,
    modulo_shift: u32,
}

/// Cached well-known tarvals for one mode; filled in lazily (the tarval
/// engine depends on `Mode`, so these can't be built during `build_registry`
/// itself without a chicken-and-egg problem).
#[derive(Default, Clone)]
struct ModeConsts {
    min: Option<Tarval>,
    max: Option<Tarval>,
    null: Option<Tarval>,
    one: Option<Tarval>,
    minus_one: Option<Tarval>,
    all_one: Option<Tarval>,
}

struct Registry {
    records: Vec<ModeRecord>,
    consts: Mutex<Vec<ModeConsts>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

macro_rules! mode_const {
    ($($name:ident => $idx:expr),* $(,)?) => {
        $(
            #[allow(non_upper_case_globals)]
            pub const $name: Mode = Mode($idx);
        )*
    };
}

// Indices must match the push order in `build_registry`.
mode_const! {
    mode_Bs => 0, mode_Bu => 1,
    mode_Hs => 2, mode_Hu => 3,
    mode_Is => 4, mode_Iu => 5,
    mode_Ls => 6, mode_Lu => 7,
    mode_P  => 8,
    mode_F  => 9, mode_D  => 10, mode_E => 11,
    mode_b  => 12,
    mode_M  => 13,
    mode_X  => 14,
    mode_T  => 15,
    mode_BB => 16,
    mode_ANY => 17,
    mode_BAD => 18,
}

const NUM_MODES: usize = 19;

fn build_registry() -> Registry {
    let mut records = Vec::with_capacity(NUM_MODES);
    let mut push =
        |name, sort, size_bits, signed, arithmetic, modulo_shift| {
            records.push(ModeRecord {
                name,
                sort,
                size_bits,
                signed,
                arithmetic,
                modulo_shift,
            });
        };
    use Arithmetic::None as NoArith;
    use Sort::*;
    push("Bs", Int, 8, true, Arithmetic::TwosComplement, 8);
    push("Bu", Int, 8, false, Arithmetic::TwosComplement, 8);
    push("Hs", Int, 16, true, Arithmetic::TwosComplement, 16);
    push("Hu", Int, 16, false, Arithmetic::TwosComplement, 16);
    push("Is", Int, 32, true, Arithmetic::TwosComplement, 32);
    push("Iu", Int, 32, false, Arithmetic::TwosComplement, 32);
    push("Ls", Int, 64, true, Arithmetic::TwosComplement, 64);
    push("Lu", Int, 64, false, Arithmetic::TwosComplement, 64);
    push("P", Reference, 64, false, Arithmetic::TwosComplement, 64);
    push("F", Float, 32, true, Arithmetic::Ieee754, 0);
    push("D", Float, 64, true, Arithmetic::Ieee754, 0);
    push("E", Float, 80, true, Arithmetic::Ieee754, 0);
    push("b", Boolean, 1, false, NoArith, 0);
    push("M", Memory, 0, false, NoArith, 0);
    push("X", Control, 0, false, NoArith, 0);
    push("T", Tuple, 0, false, NoArith, 0);
    push("BB", Auxiliary, 0, false, NoArith, 0);
    push("ANY", Auxiliary, 0, false, NoArith, 0);
    push("BAD", Auxiliary, 0, false, NoArith, 0);
    debug_assert_eq!(records.len(), NUM_MODES);
    Registry {
        records,
        consts: Mutex::new(vec![ModeConsts::default(); NUM_MODES]),
    }
}

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(build_registry)
}

impl Mode {
    fn record(self) -> &'static ModeRecord {
        &registry().records[self.0 as usize]
    }

    pub fn name(self) -> &'static str {
        self.record().name
    }

    pub fn sort(self) -> Sort {
        self.record().sort
    }

    pub fn size_bits(self) -> u32 {
        self.record().size_bits
    }

    pub fn is_signed(self) -> bool {
        self.record().signed
    }

    pub fn is_int(self) -> bool {
        self.sort() == Sort::Int
    }

    pub fn is_float(self) -> bool {
        self.sort() == Sort::Float
    }

    pub fn is_reference(self) -> bool {
        self.sort() == Sort::Reference
    }

    pub fn arithmetic(self) -> Arithmetic {
        self.record().arithmetic
    }

    pub fn modulo_shift(self) -> u32 {
        self.record().modulo_shift
    }

    /// The equivalent-width mode of the opposite signedness, used when the
    /// builder must lower an unsigned-to-float conversion through a signed
    /// intermediate (spec §4.A).
    pub fn find_signed_mode(self) -> Option<Mode> {
        companion_mode(self, true)
    }

    pub fn find_unsigned_mode(self) -> Option<Mode> {
        companion_mode(self, false)
    }

    fn cached_const(
        self,
        get: impl Fn(&ModeConsts) -> Option<Tarval>,
        set: impl Fn(&mut ModeConsts, Tarval),
        compute: impl Fn(Mode) -> Tarval,
    ) -> Tarval {
        let mut consts = registry().consts.lock().expect("mode const cache poisoned");
        let slot = &mut consts[self.0 as usize];
        if let Some(tv) = get(slot) {
            return tv;
        }
        // Drop the lock while computing: `compute` may itself need to read
        // other cached constants of the same mode (e.g. `all_one` derives
        // from `min`/`max`), which would otherwise deadlock.
        drop(consts);
        let tv = compute(self);
        let mut consts = registry().consts.lock().expect("mode const cache poisoned");
        let slot = &mut consts[self.0 as usize];
        if get(slot).is_none() {
            set(slot, tv.clone());
        }
        tv
    }

    pub fn min(self) -> Tarval {
        self.cached_const(
            |c| c.min.clone(),
            |c, tv| c.min = Some(tv),
            crate::tarval::compute_min,
        )
    }
    pub fn max(self) -> Tarval {
        self.cached_const(
            |c| c.max.clone(),
            |c, tv| c.max = Some(tv),
            crate::tarval::compute_max,
        )
    }
    pub fn null(self) -> Tarval {
        self.cached_const(
            |c| c.null.clone(),
            |c, tv| c.null = Some(tv),
            crate::tarval::compute_null,
        )
    }
    pub fn one(self) -> Tarval {
        self.cached_const(
            |c| c.one.clone(),
            |c, tv| c.one = Some(tv),
            crate::tarval::compute_one,
        )
    }
    pub fn minus_one(self) -> Tarval {
        self.cached_const(
            |c| c.minus_one.clone(),
            |c, tv| c.minus_one = Some(tv),
            crate::tarval::compute_minus_one,
        )
    }
    pub fn all_one(self) -> Tarval {
        self.cached_const(
            |c| c.all_one.clone(),
            |c, tv| c.all_one = Some(tv),
            crate::tarval::compute_all_one,
        )
    }
}

fn companion_mode(m: Mode, want_signed: bool) -> Option<Mode> {
    if m.sort() != Sort::Int {
        return None;
    }
    let table: &[(Mode, Mode)] = &[
        (mode_Bs, mode_Bu),
        (mode_Hs, mode_Hu),
        (mode_Is, mode_Iu),
        (mode_Ls, mode_Lu),
    ];
    for (s, u) in table {
        if *s == m || *u == m {
            return Some(if want_signed { *s } else { *u });
        }
    }
    None
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode_{}", self.name())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub fn all_int_modes() -> [Mode; 8] {
    [
        mode_Bs, mode_Bu, mode_Hs, mode_Hu, mode_Is, mode_Iu, mode_Ls, mode_Lu,
    ]
}

pub fn all_float_modes() -> [Mode; 3] {
    [mode_F, mode_D, mode_E]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_modes_round_trip() {
        assert_eq!(mode_Is.find_unsigned_mode(), Some(mode_Iu));
        assert_eq!(mode_Iu.find_signed_mode(), Some(mode_Is));
        assert_eq!(mode_P.find_signed_mode(), None);
    }

    #[test]
    fn sizes_and_signs() {
        assert_eq!(mode_Ls.size_bits(), 64);
        assert!(mode_Ls.is_signed());
        assert!(!mode_Lu.is_signed());
        assert!(mode_F.is_float());
        assert!(mode_P.is_reference());
    }
}
