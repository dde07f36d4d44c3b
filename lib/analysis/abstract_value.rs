//! An `AbstractValue` is partial knowledge of a bit pattern.
//!
//! For every bit of a value up to 64 bits wide we track whether it can be
//! zero and whether it can be one. A bit with exactly one possibility is
//! known; a bit with both is nondeterministic; a bit with neither has not
//! been observed yet. Merging definitions only ever adds possibilities,
//! so values form a join semilattice and the analysis converges.

use crate::il::Constant;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mask of the `bits` low bits.
pub(crate) fn bit_mask(bits: usize) -> u64 {
    if bits >= 64 {
        !0
    } else {
        (1u64 << bits) - 1
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AbstractValue {
    bits: usize,
    /// Bits that can be zero.
    zero_bits: u64,
    /// Bits that can be one.
    one_bits: u64,
}

impl AbstractValue {
    /// Create an `AbstractValue` from explicit possibility masks.
    pub fn new(bits: usize, zero_bits: u64, one_bits: u64) -> AbstractValue {
        let mask = bit_mask(bits);
        AbstractValue {
            bits,
            zero_bits: zero_bits & mask,
            one_bits: one_bits & mask,
        }
    }

    /// The fully nondeterministic value of the given width.
    pub fn nondeterministic(bits: usize) -> AbstractValue {
        AbstractValue::new(bits, !0, !0)
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Bits that can be zero.
    pub fn zero_bits(&self) -> u64 {
        self.zero_bits
    }

    /// Bits that can be one.
    pub fn one_bits(&self) -> u64 {
        self.one_bits
    }

    /// True if every bit has exactly one possibility.
    pub fn is_concrete(&self) -> bool {
        self.bits > 0 && self.zero_bits ^ self.one_bits == bit_mask(self.bits)
    }

    /// True if some bit can be both zero and one.
    pub fn is_nondeterministic(&self) -> bool {
        self.zero_bits & self.one_bits != 0
    }

    /// The concrete value, if this value is concrete.
    pub fn as_concrete(&self) -> Option<Constant> {
        if self.is_concrete() {
            Some(Constant::new(self.one_bits, self.bits))
        } else {
            None
        }
    }

    /// Join with another value, keeping every possibility of both.
    pub fn merge(mut self, other: &AbstractValue) -> AbstractValue {
        self.bits = self.bits.max(other.bits);
        self.zero_bits |= other.zero_bits;
        self.one_bits |= other.one_bits;
        self
    }

    /// True if `self` has every possibility `other` has. `merge` moves up
    /// this order.
    pub fn subsumes(&self, other: &AbstractValue) -> bool {
        self.bits >= other.bits
            && self.zero_bits & other.zero_bits == other.zero_bits
            && self.one_bits & other.one_bits == other.one_bits
    }

    /// Reposition the known bits by `offset` bits, left for positive
    /// offsets. Vacated positions carry no knowledge. The width is
    /// unchanged; use `resize` afterwards where needed.
    pub fn shift(mut self, offset: i64) -> AbstractValue {
        if offset >= 64 || offset <= -64 {
            self.zero_bits = 0;
            self.one_bits = 0;
        } else if offset >= 0 {
            self.zero_bits <<= offset as u32;
            self.one_bits <<= offset as u32;
        } else {
            self.zero_bits >>= (-offset) as u32;
            self.one_bits >>= (-offset) as u32;
        }
        self
    }

    /// Keep knowledge only about the bits set in `mask`.
    pub fn project(mut self, mask: u64) -> AbstractValue {
        self.zero_bits &= mask;
        self.one_bits &= mask;
        self
    }

    /// Change the width to `bits`, dropping knowledge beyond it. Newly
    /// added bits carry no knowledge.
    pub fn resize(mut self, bits: usize) -> AbstractValue {
        let mask = bit_mask(bits);
        self.bits = bits;
        self.zero_bits &= mask;
        self.one_bits &= mask;
        self
    }

    /// Widen to `bits`, the new high bits inheriting the possibilities of
    /// the sign bit.
    pub fn sign_extend(mut self, bits: usize) -> AbstractValue {
        if bits > self.bits && self.bits > 0 {
            let high = bit_mask(bits) & !bit_mask(self.bits);
            let sign = 1u64 << (self.bits - 1);
            if self.zero_bits & sign != 0 {
                self.zero_bits |= high;
            }
            if self.one_bits & sign != 0 {
                self.one_bits |= high;
            }
        }
        self.bits = self.bits.max(bits);
        self
    }

    /// Widen to `bits`, the new high bits known zero.
    pub fn zero_extend(mut self, bits: usize) -> AbstractValue {
        if bits > self.bits {
            self.zero_bits |= bit_mask(bits) & !bit_mask(self.bits);
            self.bits = bits;
        }
        self
    }

    fn result_bits(&self, other: &AbstractValue) -> usize {
        self.bits.max(other.bits)
    }

    fn concrete_binop<F>(&self, other: &AbstractValue, op: F) -> AbstractValue
    where
        F: Fn(&Constant, &Constant) -> Option<u64>,
    {
        let bits = self.result_bits(other);
        match (self.as_concrete(), other.as_concrete()) {
            (Some(lhs), Some(rhs)) => match op(&lhs, &rhs) {
                Some(value) => AbstractValue::from(Constant::new(value, bits)),
                None => AbstractValue::nondeterministic(bits),
            },
            _ => AbstractValue::nondeterministic(bits),
        }
    }

    fn concrete_comparison<F>(&self, other: &AbstractValue, op: F) -> AbstractValue
    where
        F: Fn(&Constant, &Constant) -> bool,
    {
        match (self.as_concrete(), other.as_concrete()) {
            (Some(lhs), Some(rhs)) => {
                AbstractValue::from(Constant::new(op(&lhs, &rhs) as u64, 1))
            }
            _ => AbstractValue::nondeterministic(1),
        }
    }

    /// Bitwise complement. Precise for every known bit.
    pub fn not(&self) -> AbstractValue {
        AbstractValue::new(self.bits, self.one_bits, self.zero_bits)
    }

    /// Two's-complement negation.
    pub fn neg(&self) -> AbstractValue {
        match self.as_concrete() {
            Some(constant) => {
                AbstractValue::from(Constant::new(constant.value().wrapping_neg(), self.bits))
            }
            None => AbstractValue::nondeterministic(self.bits),
        }
    }

    /// Bitwise and. Precise for every known bit.
    pub fn and(&self, other: &AbstractValue) -> AbstractValue {
        AbstractValue::new(
            self.result_bits(other),
            self.zero_bits | other.zero_bits,
            self.one_bits & other.one_bits,
        )
    }

    /// Bitwise or. Precise for every known bit.
    pub fn or(&self, other: &AbstractValue) -> AbstractValue {
        AbstractValue::new(
            self.result_bits(other),
            self.zero_bits & other.zero_bits,
            self.one_bits | other.one_bits,
        )
    }

    /// Bitwise xor. Precise for every known bit.
    pub fn xor(&self, other: &AbstractValue) -> AbstractValue {
        AbstractValue::new(
            self.result_bits(other),
            self.zero_bits & other.zero_bits | self.one_bits & other.one_bits,
            self.zero_bits & other.one_bits | self.one_bits & other.zero_bits,
        )
    }

    fn shift_amount(other: &AbstractValue) -> Option<u32> {
        other
            .as_concrete()
            .map(|constant| constant.value().min(64) as u32)
    }

    /// Logical shift left.
    pub fn shl(&self, other: &AbstractValue) -> AbstractValue {
        let bits = self.bits;
        match AbstractValue::shift_amount(other) {
            Some(k) if (k as usize) < 64 => AbstractValue::new(
                bits,
                self.zero_bits << k | bit_mask(k as usize),
                self.one_bits << k,
            ),
            Some(_) => AbstractValue::from(Constant::new(0, bits)),
            None => AbstractValue::nondeterministic(bits),
        }
    }

    /// Logical shift right; the left operand is treated as unsigned.
    pub fn shr(&self, other: &AbstractValue) -> AbstractValue {
        let bits = self.bits;
        match AbstractValue::shift_amount(other) {
            Some(k) if (k as usize) < bits => {
                let mask = bit_mask(bits);
                AbstractValue::new(
                    bits,
                    self.zero_bits >> k | mask & !(mask >> k),
                    self.one_bits >> k,
                )
            }
            Some(_) => AbstractValue::from(Constant::new(0, bits)),
            None => AbstractValue::nondeterministic(bits),
        }
    }

    /// Arithmetic shift right; the left operand is treated as signed.
    pub fn sar(&self, other: &AbstractValue) -> AbstractValue {
        let bits = self.bits;
        if bits == 0 {
            return AbstractValue::nondeterministic(bits);
        }
        let sign = 1u64 << (bits - 1);
        let mask = bit_mask(bits);
        match AbstractValue::shift_amount(other) {
            Some(k) => {
                let k = (k as usize).min(bits - 1) as u32;
                let fill = mask & !(mask >> k);
                let mut zero_bits = self.zero_bits >> k;
                let mut one_bits = self.one_bits >> k;
                if self.zero_bits & sign != 0 {
                    zero_bits |= fill;
                }
                if self.one_bits & sign != 0 {
                    one_bits |= fill;
                }
                AbstractValue::new(bits, zero_bits, one_bits)
            }
            None => AbstractValue::nondeterministic(bits),
        }
    }

    pub fn add(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_binop(other, |lhs, rhs| {
            Some(lhs.value().wrapping_add(rhs.value()))
        })
    }

    pub fn sub(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_binop(other, |lhs, rhs| {
            Some(lhs.value().wrapping_sub(rhs.value()))
        })
    }

    pub fn mul(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_binop(other, |lhs, rhs| {
            Some(lhs.value().wrapping_mul(rhs.value()))
        })
    }

    /// Unsigned division. Division by a possibly-zero divisor is
    /// nondeterministic.
    pub fn divu(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_binop(other, |lhs, rhs| match rhs.value() {
            0 => None,
            divisor => Some(lhs.value() / divisor),
        })
    }

    /// Signed division.
    pub fn divs(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_binop(other, |lhs, rhs| match rhs.signed_value() {
            0 => None,
            divisor => Some(lhs.signed_value().wrapping_div(divisor) as u64),
        })
    }

    /// Unsigned remainder.
    pub fn modu(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_binop(other, |lhs, rhs| match rhs.value() {
            0 => None,
            divisor => Some(lhs.value() % divisor),
        })
    }

    /// Signed remainder.
    pub fn mods(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_binop(other, |lhs, rhs| match rhs.signed_value() {
            0 => None,
            divisor => Some(lhs.signed_value().wrapping_rem(divisor) as u64),
        })
    }

    pub fn cmpeq(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_comparison(other, |lhs, rhs| lhs.value() == rhs.value())
    }

    pub fn cmplts(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_comparison(other, |lhs, rhs| lhs.signed_value() < rhs.signed_value())
    }

    pub fn cmples(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_comparison(other, |lhs, rhs| lhs.signed_value() <= rhs.signed_value())
    }

    pub fn cmpltu(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_comparison(other, |lhs, rhs| lhs.value() < rhs.value())
    }

    pub fn cmpleu(&self, other: &AbstractValue) -> AbstractValue {
        self.concrete_comparison(other, |lhs, rhs| lhs.value() <= rhs.value())
    }
}

impl From<Constant> for AbstractValue {
    fn from(constant: Constant) -> AbstractValue {
        let mask = bit_mask(constant.bits());
        AbstractValue {
            bits: constant.bits(),
            zero_bits: !constant.value() & mask,
            one_bits: constant.value() & mask,
        }
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.as_concrete() {
            Some(constant) => constant.fmt(f),
            None => write!(
                f,
                "abstract(zero=0x{:X}, one=0x{:X}):{}",
                self.zero_bits, self.one_bits, self.bits
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn concrete_roundtrip() {
        let value = AbstractValue::from(Constant::new(0xbeef, 16));
        assert!(value.is_concrete());
        assert!(!value.is_nondeterministic());
        assert_eq!(value.as_concrete().unwrap().value(), 0xbeef);
    }

    #[test]
    fn default_is_bottom() {
        let bottom = AbstractValue::default();
        assert!(!bottom.is_concrete());
        assert!(!bottom.is_nondeterministic());
        let five = AbstractValue::from(Constant::new(5, 32));
        assert_eq!(bottom.merge(&five), five);
    }

    #[test]
    fn merge_of_distinct_constants_is_nondeterministic() {
        let zero = AbstractValue::from(Constant::new(0, 32));
        let one = AbstractValue::from(Constant::new(1, 32));
        let merged = zero.merge(&one);
        assert!(!merged.is_concrete());
        assert!(merged.is_nondeterministic());
    }

    #[test]
    fn bitwise_precision_survives_unknowns() {
        let nondet = AbstractValue::nondeterministic(8);
        let zero = AbstractValue::from(Constant::new(0, 8));
        let ones = AbstractValue::from(Constant::new(0xff, 8));
        assert_eq!(nondet.and(&zero).as_concrete().unwrap().value(), 0);
        assert_eq!(nondet.or(&ones).as_concrete().unwrap().value(), 0xff);
        assert!(nondet.xor(&zero).is_nondeterministic());
    }

    #[test]
    fn shifts() {
        let value = AbstractValue::from(Constant::new(0xff00, 16));
        assert_eq!(
            value
                .shr(&AbstractValue::from(Constant::new(8, 16)))
                .as_concrete()
                .unwrap()
                .value(),
            0xff
        );
        assert_eq!(
            value
                .shl(&AbstractValue::from(Constant::new(8, 16)))
                .as_concrete()
                .unwrap()
                .value(),
            0
        );
        let negative = AbstractValue::from(Constant::new(0x80, 8));
        assert_eq!(
            negative
                .sar(&AbstractValue::from(Constant::new(7, 8)))
                .as_concrete()
                .unwrap()
                .value(),
            0xff
        );
    }

    #[test]
    fn extend_and_resize() {
        let value = AbstractValue::from(Constant::new(0xfc, 8));
        assert_eq!(
            value.clone().sign_extend(16).as_concrete().unwrap().value(),
            0xfffc
        );
        assert_eq!(
            value.clone().zero_extend(16).as_concrete().unwrap().value(),
            0xfc
        );
        assert_eq!(value.resize(4).as_concrete().unwrap().value(), 0xc);
    }

    #[test]
    fn reposition_and_project() {
        let value = AbstractValue::from(Constant::new(0xdeadbeef, 32));
        let high = value.clone().shift(-16).project(0xffff);
        assert_eq!(high.resize(16).as_concrete().unwrap().value(), 0xdead);
        let low = value.shift(0).project(0xffff);
        assert_eq!(low.resize(16).as_concrete().unwrap().value(), 0xbeef);
    }

    #[test]
    fn division_by_possible_zero_is_nondeterministic() {
        let lhs = AbstractValue::from(Constant::new(100, 32));
        let zero = AbstractValue::from(Constant::new(0, 32));
        assert!(lhs.divu(&zero).is_nondeterministic());
        assert!(lhs.divu(&AbstractValue::nondeterministic(32)).is_nondeterministic());
        assert_eq!(
            lhs.divu(&AbstractValue::from(Constant::new(10, 32)))
                .as_concrete()
                .unwrap()
                .value(),
            10
        );
    }

    proptest! {
        /// The join only loses precision: the result subsumes both inputs.
        #[test]
        fn merge_is_an_upper_bound(
            az in any::<u64>(), ao in any::<u64>(),
            bz in any::<u64>(), bo in any::<u64>(),
        ) {
            let a = AbstractValue::new(32, az, ao);
            let b = AbstractValue::new(32, bz, bo);
            let merged = a.clone().merge(&b);
            prop_assert!(merged.subsumes(&a));
            prop_assert!(merged.subsumes(&b));
        }

        #[test]
        fn merge_is_commutative_and_idempotent(
            az in any::<u64>(), ao in any::<u64>(),
            bz in any::<u64>(), bo in any::<u64>(),
        ) {
            let a = AbstractValue::new(32, az, ao);
            let b = AbstractValue::new(32, bz, bo);
            prop_assert_eq!(a.clone().merge(&b), b.clone().merge(&a));
            prop_assert_eq!(a.clone().merge(&a), a);
        }
    }
}
