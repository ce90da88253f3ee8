//! Property tests for the register operations and the whole-machine
//! invariants that must hold after every instruction.

use std::sync::Arc;

use proptest::prelude::*;

use act_core::constants::{REG_SIZE, STACK_SIZE};
use act_core::{Processor, RegId, RomImage};

fn processor() -> Processor {
    let rom = RomImage::from_words(vec![0; 4096], 1).unwrap();
    Processor::new(Arc::new(rom), 16)
}

fn decimal_nibbles() -> impl Strategy<Value = [u8; REG_SIZE]> {
    prop::array::uniform14(0u8..10)
}

fn field() -> impl Strategy<Value = (usize, usize)> {
    (0usize..REG_SIZE).prop_flat_map(|first| (Just(first), first..REG_SIZE))
}

/// Words drawn from the documented opcode set, safe to execute in
/// decimal base.
fn documented_opcode() -> impl Strategy<Value = u16> {
    prop_oneof![
        (0u16..32, 0u16..8).prop_map(|(op, f)| op << 5 | f << 2 | 0o2),
        (0u16..256).prop_map(|target| target << 2 | 0o1), // jsb
        (0u16..256).prop_map(|target| target << 2 | 0o3), // if nc goto
        Just(0o0620),                                     // p - 1 -> p
        Just(0o0720),                                     // p + 1 -> p
        Just(0o1020),                                     // return
        (0u16..16).prop_map(|n| n << 6 | 0o74),           // p = n
        (0u16..10).prop_map(|n| n << 6 | 0o30),           // load n
        (0u16..16).prop_map(|n| n << 6 | 0o04),           // 1 -> s(n)
        (0u16..16).prop_map(|n| n << 6 | 0o14),           // 0 -> s(n)
        Just(0o0010),                                     // clear registers
        Just(0o0110),                                     // clear s
        Just(0o1310),                                     // c -> stack
        Just(0o1110),                                     // down rotate
        Just(0o1010),                                     // stack -> a
    ]
}

fn assert_invariants(p: &Processor) {
    for reg in p.regs.iter().chain(p.ram.iter()) {
        for &nibble in &reg.nibbles {
            assert!(nibble < p.base, "nibble {nibble} escaped base {}", p.base);
        }
    }
    assert!(p.sp < STACK_SIZE);
    assert!((p.pc as usize) < p.rom().bank_size());
    assert!(p.p as usize <= REG_SIZE);
}

proptest! {
    #[test]
    fn copy_to_self_is_identity((first, last) in field(), nibbles in decimal_nibbles(), carry in any::<bool>()) {
        let mut p = processor();
        p.regs[RegId::A as usize].load(nibbles);
        p.flags.carry = carry;
        let before = p.regs[RegId::A as usize].clone();
        p.set_field(first, last);
        p.reg_copy(RegId::A, Some(RegId::A));
        prop_assert_eq!(&p.regs[RegId::A as usize], &before);
        prop_assert_eq!(p.flags.carry, carry);
    }

    #[test]
    fn exchange_twice_is_identity((first, last) in field(), a in decimal_nibbles(), b in decimal_nibbles()) {
        let mut p = processor();
        p.regs[RegId::A as usize].load(a);
        p.regs[RegId::B as usize].load(b);
        let (before_a, before_b) = (
            p.regs[RegId::A as usize].clone(),
            p.regs[RegId::B as usize].clone(),
        );
        p.set_field(first, last);
        p.reg_exch(RegId::A, RegId::B);
        p.reg_exch(RegId::A, RegId::B);
        prop_assert_eq!(&p.regs[RegId::A as usize], &before_a);
        prop_assert_eq!(&p.regs[RegId::B as usize], &before_b);
    }

    #[test]
    fn adding_a_zero_register_is_identity((first, last) in field(), nibbles in decimal_nibbles()) {
        let mut p = processor();
        p.regs[RegId::A as usize].load(nibbles);
        let before = p.regs[RegId::A as usize].clone();
        p.set_field(first, last);
        p.reg_add(Some(RegId::A), RegId::A, Some(RegId::B));
        prop_assert_eq!(&p.regs[RegId::A as usize], &before);
        prop_assert!(!p.flags.carry);
    }

    #[test]
    fn subtracting_a_register_from_itself_gives_zero((first, last) in field(), nibbles in decimal_nibbles()) {
        let mut p = processor();
        p.regs[RegId::A as usize].load(nibbles);
        p.set_field(first, last);
        p.reg_sub(Some(RegId::A), Some(RegId::A), Some(RegId::A));
        for i in first..=last {
            prop_assert_eq!(p.regs[RegId::A as usize].nibbles[i], 0);
        }
        prop_assert!(!p.flags.carry);
    }

    #[test]
    fn equality_tests_have_opposite_polarity((first, last) in field(), a in decimal_nibbles(), c in decimal_nibbles()) {
        let mut p = processor();
        p.regs[RegId::A as usize].load(a);
        p.regs[RegId::C as usize].load(c);
        p.set_field(first, last);
        p.reg_test_eq(RegId::A, Some(RegId::C));
        let eq_carry = p.flags.carry;
        p.reg_test_ne(RegId::A, Some(RegId::C));
        let ne_carry = p.flags.carry;
        prop_assert_ne!(eq_carry, ne_carry);
    }

    #[test]
    fn documented_programs_keep_the_machine_invariants(words in prop::collection::vec(documented_opcode(), 1..200)) {
        let mut image = words;
        image.resize(4096, 0);
        let mut p = Processor::new(Arc::new(RomImage::from_words(image, 1).unwrap()), 16);
        for _ in 0..256 {
            // A pointer fault is a legal outcome (P-relative field with
            // p at 14); it must still leave the machine well formed.
            if p.tick().is_err() {
                break;
            }
            assert_invariants(&p);
        }
        assert_invariants(&p);
    }
}
