//! The decoder/executor: one [`tick`](Processor::tick) fetches, decodes
//! and executes a single 10-bit instruction, then advances the program
//! counter, latching CARRY into PREV_CARRY on the way.

use thiserror::Error;

use crate::constants::{PAGE_SIZE, P_SET, P_TEST, REG_SIZE, STACK_SIZE};
use crate::decode::{mnemonic, Field};
use crate::processor::Processor;
use crate::register::RegId;

/// A fault stops execution at the offending instruction. State is left
/// exactly as it was when the fault was detected, so a host may inspect
/// it and choose to reset or resume.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// An opcode outside the documented set.
    #[error("unexpected opcode {opcode:04o} at {bank:01o}-{pc:04o}")]
    Opcode { bank: u8, pc: u16, opcode: u16 },
    /// A P-relative field modifier while P points past the register end.
    #[error("pointer {p} out of range for opcode {opcode:04o} at {bank:01o}-{pc:04o}")]
    Pointer {
        bank: u8,
        pc: u16,
        opcode: u16,
        p: u8,
    },
    /// A computed address outside the ROM window.
    #[error("address {address:05o} out of range at {bank:01o}-{pc:04o}")]
    Address { bank: u8, pc: u16, address: u16 },
}

impl Processor {
    /// Execute one instruction. Branch instructions rewrite the program
    /// counter to `target - 1`; the single advance at the end of the
    /// tick then lands on the target and performs the carry latch.
    pub fn tick(&mut self) -> Result<(), Fault> {
        let opcode = self.fetch()?;
        let mut trace = String::new();
        if self.flags.trace {
            trace = format!("{:01o}-{:04o} {:04o}  ", self.rom_bank, self.pc, opcode);
            if let Some(text) = mnemonic(opcode, self.rom_bank, self.pc) {
                trace.push_str(&text);
            }
        }
        match opcode & 0o3 {
            0o0 => self.exec_special(opcode, &mut trace)?,
            0o1 => self.op_jsb(opcode >> 2, &mut trace),
            0o2 => self.exec_arithmetic(opcode, &mut trace)?,
            _ => self.op_if_nc_goto(opcode, &mut trace),
        }
        if self.flags.trace {
            self.emit_trace(&trace);
        }
        self.inc_pc();
        Ok(())
    }

    fn fetch(&self) -> Result<u16, Fault> {
        self.rom
            .word(self.rom_bank, self.pc)
            .ok_or(Fault::Address {
                bank: self.rom_bank,
                pc: self.pc,
                address: self.pc,
            })
    }

    fn fault(&self, opcode: u16) -> Fault {
        Fault::Opcode {
            bank: self.rom_bank,
            pc: self.pc,
            opcode,
        }
    }

    /// Advance the program counter within the current bank and latch
    /// CARRY into PREV_CARRY. This is the only place CARRY is cleared on
    /// the fetch path.
    fn inc_pc(&mut self) {
        let top = (self.rom.bank_size() - 1) as u16;
        self.pc = if self.pc >= top { 0 } else { self.pc + 1 };
        self.flags.prev_carry = self.flags.carry;
        self.flags.carry = false;
    }

    /// Commit a pending `delayed select rom` into the page bits of the
    /// program counter. Fires only at control transfers.
    fn delayed_rom_commit(&mut self, trace: &mut String) {
        if self.flags.delayed_rom {
            if self.flags.trace {
                trace.push_str(" **");
            }
            self.pc = (self.delayed_rom_bank as u16) << 8 | (self.pc & 0o377);
            self.flags.delayed_rom = false;
        }
    }

    fn op_jsb(&mut self, target: u16, trace: &mut String) {
        self.stack[self.sp] = self.pc;
        self.sp = (self.sp + 1) & (STACK_SIZE - 1);
        // The universal post-increment lands on the target.
        self.pc = ((self.pc & 0xff00) | target).wrapping_sub(1);
        self.delayed_rom_commit(trace);
    }

    fn op_rtn(&mut self) {
        self.sp = (self.sp + STACK_SIZE - 1) & (STACK_SIZE - 1);
        self.pc = self.stack[self.sp];
    }

    fn op_if_nc_goto(&mut self, opcode: u16, trace: &mut String) {
        if !self.flags.prev_carry {
            self.pc = ((self.pc & 0xff00) | (opcode >> 2)).wrapping_sub(1);
        }
        self.delayed_rom_commit(trace);
    }

    /// Consume the branch word that follows every test instruction. The
    /// program counter advances onto the word (latching the test's
    /// carry), and the branch is taken when PREV_CARRY is clear.
    fn take_test_branch(&mut self, trace: &mut String) -> Result<(), Fault> {
        self.inc_pc();
        let word = self.fetch()?;
        if self.flags.trace {
            trace.push_str(&format!(
                "\n{:01o}-{:04o} {:04o}    then goto {:01o}-{:04o}",
                self.rom_bank, self.pc, word, self.rom_bank, word
            ));
        }
        if !self.flags.prev_carry {
            self.pc = word.wrapping_sub(1);
            self.delayed_rom_commit(trace);
        }
        Ok(())
    }

    fn exec_special(&mut self, opcode: u16, trace: &mut String) -> Result<(), Fault> {
        let n = opcode >> 6;
        match (opcode >> 2) & 0o3 {
            0o0 => match (opcode >> 4) & 0o3 {
                0o0 => {} // nop
                0o1 => match opcode {
                    0o0020 => {
                        // keys -> rom address
                        self.pc &= 0x0f00;
                        self.pc = self
                            .pc
                            .wrapping_add(self.keycode as u16)
                            .wrapping_sub(1);
                    }
                    0o0420 => self.base = 16,
                    0o0620 => {
                        self.p = if self.p == 0 {
                            REG_SIZE as u8
                        } else {
                            self.p - 1
                        };
                    }
                    0o0720 => {
                        self.p = if self.p == REG_SIZE as u8 {
                            0
                        } else {
                            self.p + 1
                        };
                    }
                    0o1020 => self.op_rtn(),
                    _ => return Err(self.fault(opcode)),
                },
                0o2 => {
                    // select rom n
                    self.pc = n * PAGE_SIZE as u16 + self.pc % PAGE_SIZE as u16;
                }
                _ => match opcode {
                    0o1160 => {
                        // c -> data address
                        let c = &self.regs[RegId::C as usize];
                        self.address = (c.nibbles[1] as u16) << 4 | c.nibbles[0] as u16;
                        if self.address as usize >= self.rom.total_words() {
                            return Err(Fault::Address {
                                bank: self.rom_bank,
                                pc: self.pc,
                                address: self.address,
                            });
                        }
                    }
                    0o1260 => self.clear_data_registers(),
                    0o1760 => {} // hi I'm woodstock
                    _ => return Err(self.fault(opcode)),
                },
            },
            0o1 => match (opcode >> 4) & 0o3 {
                0o0 => self.set_status(n as usize, true),
                0o1 => {
                    if self.flags.trace {
                        trace.push_str(&format!(
                            " (s({n}) == {})",
                            self.status_bit(n as usize) as u8
                        ));
                    }
                    self.flags.carry = !self.status_bit(n as usize);
                    self.take_test_branch(trace)?;
                }
                0o2 => {
                    self.flags.carry = self.p != P_TEST[n as usize];
                    self.take_test_branch(trace)?;
                }
                _ => {
                    self.delayed_rom_bank = n as u8;
                    self.flags.delayed_rom = true;
                }
            },
            0o2 => match (opcode >> 4) & 0o3 {
                0o0 => self.exec_register_move(opcode)?,
                0o1 => {
                    // load n into C at P, stepping P down
                    if self.p as usize >= REG_SIZE {
                        return Err(Fault::Pointer {
                            bank: self.rom_bank,
                            pc: self.pc,
                            opcode,
                            p: self.p,
                        });
                    }
                    self.regs[RegId::C as usize].nibbles[self.p as usize] = n as u8 & 0x0f;
                    self.p = if self.p > 0 {
                        self.p - 1
                    } else {
                        (REG_SIZE - 1) as u8
                    };
                }
                // c -> data register(n) and data register(n) -> c are not
                // part of this family's documented set.
                _ => return Err(self.fault(opcode)),
            },
            _ => match (opcode >> 4) & 0o3 {
                0o0 => match n {
                    // Bits 5 and 15 are sticky: only the any-key-down
                    // latch clears, and only while no key is held.
                    5 | 15 => {
                        if !self.keydown {
                            self.set_status(15, false);
                        }
                    }
                    _ => self.set_status(n as usize, false),
                },
                0o1 => {
                    self.flags.carry = self.status_bit(n as usize);
                    self.take_test_branch(trace)?;
                }
                0o2 => {
                    self.flags.carry = self.p == P_TEST[n as usize];
                    self.take_test_branch(trace)?;
                }
                _ => self.p = P_SET[n as usize],
            },
        }
        Ok(())
    }

    /// Group-2 register moves: whole-word transfers between C, the
    /// memory registers and the Y/Z/T stack, display control, and the F
    /// register accessors.
    fn exec_register_move(&mut self, opcode: u16) -> Result<(), Fault> {
        use RegId::{A, C, M, N, T, Y, Z};
        self.set_field(0, REG_SIZE - 1);
        match opcode {
            0o0010 => self.clear_registers(),
            0o0110 => self.clear_status(),
            0o0210 => self.flags.display_enable = !self.flags.display_enable,
            0o0310 => self.flags.display_enable = false,
            0o0410 => self.reg_exch(M, C),
            0o0510 => self.reg_copy(C, Some(M)),
            0o0610 => self.reg_exch(N, C),
            0o0710 => self.reg_copy(C, Some(N)),
            0o1010 => {
                // stack -> a
                self.reg_copy(A, Some(Y));
                self.reg_copy(Y, Some(Z));
                self.reg_copy(Z, Some(T));
            }
            0o1110 => {
                // down rotate
                self.reg_exch(T, C);
                self.reg_exch(C, Y);
                self.reg_exch(Y, Z);
            }
            0o1210 => self.reg_copy(A, Some(Y)),
            0o1310 => {
                // c -> stack
                self.reg_copy(T, Some(Z));
                self.reg_copy(Z, Some(Y));
                self.reg_copy(Y, Some(C));
            }
            0o1410 => self.base = 10,
            0o1610 => self.regs[A as usize].nibbles[0] = self.f,
            0o1710 => {
                let t = self.regs[A as usize].nibbles[0];
                self.regs[A as usize].nibbles[0] = self.f;
                self.f = t;
            }
            _ => return Err(self.fault(opcode)),
        }
        Ok(())
    }

    fn exec_arithmetic(&mut self, opcode: u16, trace: &mut String) -> Result<(), Fault> {
        use RegId::{A, B, C};
        let field = Field::from_bits(opcode >> 2);
        let (first, last) = field.window(self.p as usize);
        self.set_field(first, last);
        if matches!(field, Field::P | Field::Wp) && self.p as usize >= REG_SIZE {
            // Clamp the window the way the hardware decoder degrades,
            // then surface the fault.
            self.last = match field {
                Field::P => 0,
                _ => REG_SIZE - 1,
            };
            return Err(Fault::Pointer {
                bank: self.rom_bank,
                pc: self.pc,
                opcode,
                p: self.p,
            });
        }
        match opcode >> 5 {
            0o00 => self.reg_copy(A, None),
            0o01 => self.reg_copy(B, None),
            0o02 => self.reg_exch(A, B),
            0o03 => self.reg_copy(B, Some(A)),
            0o04 => self.reg_exch(A, C),
            0o05 => self.reg_copy(A, Some(C)),
            0o06 => self.reg_copy(C, Some(B)),
            0o07 => self.reg_exch(B, C),
            0o10 => self.reg_copy(C, None),
            0o11 => self.reg_add(Some(A), A, Some(B)),
            0o12 => self.reg_add(Some(A), A, Some(C)),
            0o13 => self.reg_add(Some(C), C, Some(C)),
            0o14 => self.reg_add(Some(C), C, Some(A)),
            0o15 => self.reg_inc(A),
            0o16 => self.reg_shl(A),
            0o17 => self.reg_inc(C),
            0o20 => self.reg_sub(Some(A), Some(A), Some(B)),
            0o21 => self.reg_sub(Some(C), Some(A), Some(C)),
            0o22 => {
                self.flags.carry = true;
                self.reg_sub(Some(A), Some(A), None);
            }
            0o23 => {
                self.flags.carry = true;
                self.reg_sub(Some(C), Some(C), None);
            }
            0o24 => self.reg_sub(Some(C), None, Some(C)),
            0o25 => {
                self.flags.carry = true;
                self.reg_sub(Some(C), None, Some(C));
            }
            0o26 => {
                self.reg_test_eq(B, None);
                self.take_test_branch(trace)?;
            }
            0o27 => {
                self.reg_test_eq(C, None);
                self.take_test_branch(trace)?;
            }
            0o30 => {
                self.reg_sub(None, Some(A), Some(C));
                self.take_test_branch(trace)?;
            }
            0o31 => {
                self.reg_sub(None, Some(A), Some(B));
                self.take_test_branch(trace)?;
            }
            0o32 => {
                self.reg_test_ne(A, None);
                self.take_test_branch(trace)?;
            }
            0o33 => {
                self.reg_test_ne(C, None);
                self.take_test_branch(trace)?;
            }
            0o34 => self.reg_sub(Some(A), Some(A), Some(C)),
            0o35 => self.reg_shr(A),
            0o36 => self.reg_shr(B),
            _ => self.reg_shr(C),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::rom::RomImage;

    fn cpu(words: &[u16]) -> Processor {
        let mut image = words.to_vec();
        image.resize(4096, 0);
        Processor::new(Arc::new(RomImage::from_words(image, 1).unwrap()), 16)
    }

    #[test]
    fn nop_advances_pc_and_latches_carry() {
        let mut p = cpu(&[0o0000, 0o0000]);
        p.flags.carry = true;
        p.tick().unwrap();
        assert_eq!(p.pc, 1);
        assert!(p.flags.prev_carry);
        assert!(!p.flags.carry);
    }

    #[test]
    fn jsb_pushes_the_return_slot_and_return_pops_it() {
        // 0o0005: jsb 0o0005; 0o0005: return
        let mut p = cpu(&[0o0005 << 2 | 0o1, 0, 0, 0, 0, 0o1020]);
        p.tick().unwrap();
        assert_eq!(p.pc, 0o0005);
        assert_eq!(p.sp, 1);
        assert_eq!(p.stack[0], 0);
        p.tick().unwrap();
        assert_eq!(p.pc, 1);
        assert_eq!(p.sp, 0);
    }

    #[test]
    fn stack_wraps_modulo_its_depth() {
        let mut words = vec![0u16; 16];
        for (slot, word) in words.iter_mut().enumerate().take(STACK_SIZE + 1) {
            *word = ((slot as u16 + 1) << 2) | 0o1; // jsb to the next word
        }
        let mut p = cpu(&words);
        for _ in 0..=STACK_SIZE {
            p.tick().unwrap();
        }
        assert_eq!(p.sp, 1);
        // The first return slot was overwritten by the wrapped push.
        assert_eq!(p.stack[0], STACK_SIZE as u16);
    }

    #[test]
    fn select_rom_replaces_the_page() {
        // select rom 2 at pc 0: n<<6 | 0o40
        let mut p = cpu(&[2 << 6 | 0o40]);
        p.tick().unwrap();
        assert_eq!(p.pc, 2 * 256 + 1);
    }

    #[test]
    fn delayed_rom_commits_only_at_a_branch() {
        // delayed select rom 2; nop; goto 0o0050
        let mut p = cpu(&[2 << 6 | 0o64, 0o0000, 0o0050 << 2 | 0o3]);
        p.tick().unwrap();
        assert!(p.flags.delayed_rom);
        assert_eq!(p.delayed_rom_bank, 2);
        assert_eq!(p.pc, 1);
        p.tick().unwrap();
        assert!(p.flags.delayed_rom);
        p.tick().unwrap();
        assert!(!p.flags.delayed_rom);
        assert_eq!(p.pc, 2 * 256 + 0o0050);
    }

    #[test]
    fn two_delayed_selects_last_one_wins() {
        let mut p = cpu(&[1 << 6 | 0o64, 3 << 6 | 0o64, 0o0050 << 2 | 0o3]);
        p.tick().unwrap();
        p.tick().unwrap();
        assert_eq!(p.delayed_rom_bank, 3);
        p.tick().unwrap();
        assert_eq!(p.pc, 3 * 256 + 0o0050);
    }

    #[test]
    fn undocumented_opcode_faults_without_moving_pc() {
        let mut p = cpu(&[0o0000, 0o0220]);
        p.tick().unwrap();
        let err = p.tick().unwrap_err();
        assert_eq!(
            err,
            Fault::Opcode {
                bank: 0,
                pc: 1,
                opcode: 0o0220
            }
        );
        assert_eq!(p.pc, 1);
    }

    #[test]
    fn p_field_with_pointer_off_the_end_faults() {
        // p - 1 -> p wraps 0 to 14, then a P-field op faults.
        let arith = 0o05 << 5 | 0o2; // c -> a[p]
        let mut p = cpu(&[0o0620, arith]);
        p.tick().unwrap();
        assert_eq!(p.p, 14);
        let err = p.tick().unwrap_err();
        assert!(matches!(err, Fault::Pointer { p: 14, .. }));
        assert_eq!(p.last, 0);
    }

    #[test]
    fn keys_to_rom_address_dispatches_on_the_latched_code() {
        let mut p = cpu(&[0o0020]);
        p.set_key(0o24, true);
        p.tick().unwrap();
        assert_eq!(p.pc, 0o24);
    }

    #[test]
    fn data_address_latch_checks_the_rom_window() {
        // A 128-word image: the latch takes 0x25 but rejects 0xff.
        let mut words = vec![0u16; 128];
        words[0] = 0o1160;
        words[1] = 0o1160;
        let mut p = Processor::new(Arc::new(RomImage::from_words(words, 1).unwrap()), 16);
        p.regs[RegId::C as usize].nibbles[1] = 2;
        p.regs[RegId::C as usize].nibbles[0] = 5;
        p.tick().unwrap();
        assert_eq!(p.address, 0x25);
        p.regs[RegId::C as usize].nibbles[1] = 0xf;
        p.regs[RegId::C as usize].nibbles[0] = 0xf;
        let err = p.tick().unwrap_err();
        assert!(matches!(err, Fault::Address { address: 0xff, .. }));
    }
}
