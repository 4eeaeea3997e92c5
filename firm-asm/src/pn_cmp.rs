//! `pn_Cmp`: the 4-bit partial-order tag carried by a `Proj` off a `Cmp`
//! node (spec GLOSSARY). Bit 0 = equal, bit 1 = less, bit 2 = greater,
//! bit 3 = unordered.

use bitflags::bitflags;
use firm_types::tarval::CmpResult;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PnCmp: u8 {
        const FALSE = 0;
        const EQ    = 1 << 0;
        const LT    = 1 << 1;
        const GT    = 1 << 2;
        const UO    = 1 << 3;
        const LE    = Self::LT.bits() | Self::EQ.bits();
        const GE    = Self::GT.bits() | Self::EQ.bits();
        const NE    = Self::LT.bits() | Self::GT.bits() | Self::UO.bits();
        const LG    = Self::LT.bits() | Self::GT.bits();
        const TRUE  = Self::EQ.bits() | Self::LT.bits() | Self::GT.bits() | Self::UO.bits();
    }
}

impl PnCmp {
    /// Negates the relation: `Eor(Proj(Cmp), 1)` and `Not(Proj(Cmp))` both
    /// reduce to the Proj with the negated `pn_Cmp` (spec §4.F
    /// `transform_node`).
    pub fn negate(self) -> PnCmp {
        Self::TRUE - self
    }

    /// Mirrors the relation for swapped operands: `a < b` becomes `a > b`,
    /// `EQ`/`UO` are unaffected. Used when canonicalizing a commutative-ish
    /// `Cmp`'s operand order moves the constant to the right (spec §4.F
    /// "Cmp normalization").
    pub fn swap(self) -> PnCmp {
        let mut out = PnCmp::FALSE;
        if self.contains(PnCmp::EQ) {
            out |= PnCmp::EQ;
        }
        if self.contains(PnCmp::LT) {
            out |= PnCmp::GT;
        }
        if self.contains(PnCmp::GT) {
            out |= PnCmp::LT;
        }
        if self.contains(PnCmp::UO) {
            out |= PnCmp::UO;
        }
        out
    }

    /// Evaluates this relation against a concrete [`CmpResult`], the value
    /// `tarval_cmp` returns — this is how `Proj(Cmp(...))` folds in
    /// `computed_value` (spec §4.F item 1).
    pub fn evaluate(self, cmp: CmpResult) -> Option<bool> {
        let bit = match cmp {
            CmpResult::Lt => PnCmp::LT,
            CmpResult::Eq => PnCmp::EQ,
            CmpResult::Gt => PnCmp::GT,
            CmpResult::Uo => PnCmp::UO,
            CmpResult::False => return None,
        };
        Some(self.contains(bit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negate_is_involutive() {
        for pn in [PnCmp::EQ, PnCmp::LT, PnCmp::LE, PnCmp::NE] {
            assert_eq!(pn.negate().negate(), pn);
        }
    }

    #[test]
    fn swap_mirrors_lt_gt_and_leaves_eq_uo_alone() {
        assert_eq!(PnCmp::LT.swap(), PnCmp::GT);
        assert_eq!(PnCmp::GE.swap(), PnCmp::LE);
        assert_eq!(PnCmp::EQ.swap(), PnCmp::EQ);
        assert_eq!(PnCmp::NE.swap(), PnCmp::NE);
        for pn in [PnCmp::EQ, PnCmp::LT, PnCmp::LE, PnCmp::NE] {
            assert_eq!(pn.swap().swap(), pn);
        }
    }

    #[test]
    fn eq_evaluates_against_cmp_eq() {
        assert_eq!(PnCmp::EQ.evaluate(CmpResult::Eq), Some(true));
        assert_eq!(PnCmp::EQ.evaluate(CmpResult::Lt), Some(false));
        assert_eq!(PnCmp::EQ.evaluate(CmpResult::False), None);
    }

    #[test]
    fn scenario_eq_self_is_true() {
        // Proj(Cmp(Const(5,Is), Const(5,Is)), pn_Cmp_Eq) -> true (§8 scenario 4).
        assert_eq!(PnCmp::EQ.evaluate(CmpResult::Eq), Some(true));
    }
}
