//! Architectural constants for the ACT processor.

/// Number of nibbles in an arithmetic register (10 mantissa digits, a
/// mantissa sign, two exponent digits and an exponent sign).
pub const REG_SIZE: usize = 14;

/// Nibbles taken up by the exponent and its sign.
pub const EXP_SIZE: usize = 3;

/// Named registers in the register file (A, B, C, Y, Z, T, M, N).
pub const REGISTERS: usize = 8;

/// Return-address stack depth. The stack pointer wraps with a power-of-two
/// mask, so this must stay a power of two.
pub const STACK_SIZE: usize = 4;

/// Words per ROM page; page-relative branch targets are 8 bits wide.
pub const PAGE_SIZE: usize = 256;

/// Decoder table for `p = n`: the operand bits do not carry `n` directly
/// but index this hard-wired permutation from the mask-ROM decoder.
pub const P_SET: [u8; 16] = [14, 4, 7, 8, 11, 2, 10, 12, 1, 3, 13, 6, 0, 9, 5, 14];

/// Decoder table for `if p = n` / `if p # n`, permuted like [`P_SET`] but
/// with its own wiring.
pub const P_TEST: [u8; 16] = [4, 8, 12, 2, 9, 1, 6, 3, 1, 13, 5, 0, 11, 10, 7, 4];

/// Status bits that `clear s` leaves alone: scientific notation, auto
/// enter, decimal point entered, and the any-key-down latch.
pub const STICKY_STATUS_BITS: [usize; 4] = [1, 2, 5, 15];
