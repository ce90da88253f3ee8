use std::fmt;
use std::io::Write;
use std::sync::Arc;

use serde::Serialize;

use crate::constants::{REGISTERS, REG_SIZE, STACK_SIZE, STICKY_STATUS_BITS};
use crate::register::{RegId, Register, RegisterTag};
use crate::rom::RomImage;

/// Processor flag word. Carry and previous carry implement the
/// test-then-branch discipline: the program-counter advance latches
/// CARRY into PREV_CARRY and clears CARRY, so a branch word always sees
/// the verdict of the instruction right before it.
#[derive(Clone, Debug, Default)]
pub struct Flags {
    /// Run (true) or program mode.
    pub mode: bool,
    pub carry: bool,
    pub prev_carry: bool,
    /// A `delayed select rom` is waiting for the next control transfer.
    pub delayed_rom: bool,
    pub display_enable: bool,
    pub timer: bool,
    /// Trace execution. Implementation specific, no semantic effect.
    pub trace: bool,
}

/// The ACT processor: register file, data registers, return-address
/// stack and control state, stepped one instruction at a time by
/// [`tick`](Processor::tick).
///
/// The core is single threaded and non-blocking; between two ticks the
/// host may read any field and sees the post-state of the previous tick.
pub struct Processor {
    pub(crate) rom: Arc<RomImage>,
    pub regs: [Register; REGISTERS],
    pub ram: Vec<Register>,
    pub stack: [u16; STACK_SIZE],
    pub sp: usize,
    pub pc: u16,
    pub rom_bank: u8,
    pub delayed_rom_bank: u8,
    /// Pointer register, `0..=REG_SIZE`.
    pub p: u8,
    /// F register, one nibble wide.
    pub f: u8,
    /// Current field window, rewritten by the decoder before every
    /// field-scoped operation.
    pub first: usize,
    pub last: usize,
    /// Arithmetic radix, 10 or 16.
    pub base: u8,
    /// Processor status word, sixteen independent bits.
    pub status: u16,
    pub flags: Flags,
    /// ROM-dispatch index of the last key pressed.
    pub keycode: u8,
    pub keydown: bool,
    /// Memory-address latch, loaded from the low byte of C.
    pub address: u16,
    trace_sink: Option<Box<dyn Write + Send>>,
}

impl Processor {
    /// Create a processor over a borrowed ROM image with `data_registers`
    /// memory slots, reset and ready to run.
    pub fn new(rom: Arc<RomImage>, data_registers: usize) -> Self {
        let regs = RegId::ALL.map(|id| Register::new(RegisterTag::Named(id)));
        let ram = (0..data_registers)
            .map(|slot| Register::new(RegisterTag::Data(slot as u8)))
            .collect();
        let mut processor = Self {
            rom,
            regs,
            ram,
            stack: [0; STACK_SIZE],
            sp: 0,
            pc: 0,
            rom_bank: 0,
            delayed_rom_bank: 0,
            p: 0,
            f: 0,
            first: 0,
            last: REG_SIZE - 1,
            base: 10,
            status: 0,
            flags: Flags::default(),
            keycode: 0,
            keydown: false,
            address: 0,
            trace_sink: None,
        };
        processor.reset();
        processor
    }

    /// Reinitialise all state: registers, data registers and stack
    /// cleared, status and flags cleared except status bits 3 and 5,
    /// run mode selected, decimal base, pc at the start of bank 0.
    pub fn reset(&mut self) {
        self.clear_registers();
        self.clear_data_registers();
        self.status = 0;
        self.flags = Flags::default();
        self.set_status(3, true);
        self.set_status(5, true);
        self.flags.mode = true;
        self.pc = 0;
        self.sp = 0;
        self.p = 0;
        self.f = 0;
        self.keycode = 0;
        self.keydown = false;
        self.base = 10;
        self.delayed_rom_bank = 0;
        self.rom_bank = 0;
        self.address = 0;
    }

    pub fn rom(&self) -> &Arc<RomImage> {
        &self.rom
    }

    /// Latch a key event. Pressing a key records its dispatch index for
    /// `keys -> rom address` and sets status bit 15; releasing only drops
    /// the key-down latch, since bit 15 stays until the running program
    /// clears it with no key held.
    pub fn set_key(&mut self, keycode: u8, down: bool) {
        self.keydown = down;
        if down {
            self.keycode = keycode;
            self.set_status(15, true);
        }
    }

    pub fn set_trace(&mut self, enabled: bool) {
        self.flags.trace = enabled;
    }

    /// Redirect trace output; stdout is used when no sink is supplied.
    pub fn set_trace_sink(&mut self, sink: Box<dyn Write + Send>) {
        self.trace_sink = Some(sink);
    }

    pub(crate) fn emit_trace(&mut self, line: &str) {
        match self.trace_sink.as_mut() {
            Some(sink) => {
                let _ = writeln!(sink, "{line}");
            }
            None => println!("{line}"),
        }
    }

    pub fn status_bit(&self, bit: usize) -> bool {
        self.status & (1 << bit) != 0
    }

    pub fn set_status(&mut self, bit: usize, value: bool) {
        if value {
            self.status |= 1 << bit;
        } else {
            self.status &= !(1 << bit);
        }
    }

    /// Clear the status word, preserving the sticky bits.
    pub fn clear_status(&mut self) {
        for bit in 0..16 {
            if !STICKY_STATUS_BITS.contains(&bit) {
                self.set_status(bit, false);
            }
        }
    }

    /// Clear the register file and the return-address stack.
    pub fn clear_registers(&mut self) {
        self.set_field(0, REG_SIZE - 1);
        for reg in &mut self.regs {
            reg.clear();
        }
        self.stack = [0; STACK_SIZE];
    }

    pub fn clear_data_registers(&mut self) {
        for reg in &mut self.ram {
            reg.clear();
        }
    }

    /// Set the field window used by the next register operation.
    pub fn set_field(&mut self, first: usize, last: usize) {
        self.first = first;
        self.last = last;
    }

    fn nib(&self, reg: Option<RegId>, index: usize) -> u8 {
        reg.map(|r| self.regs[r as usize].nibbles[index])
            .unwrap_or(0)
    }

    /// `dst := src` over the field, or zero when `src` is absent. Does
    /// not touch carry.
    pub fn reg_copy(&mut self, dst: RegId, src: Option<RegId>) {
        for i in self.first..=self.last {
            let value = self.nib(src, i);
            self.regs[dst as usize].nibbles[i] = value;
        }
    }

    /// Swap the field nibbles of two registers.
    pub fn reg_exch(&mut self, a: RegId, b: RegId) {
        for i in self.first..=self.last {
            let t = self.regs[a as usize].nibbles[i];
            self.regs[a as usize].nibbles[i] = self.regs[b as usize].nibbles[i];
            self.regs[b as usize].nibbles[i] = t;
        }
    }

    /// `dst := src + arg + carry` nibble by nibble from the least
    /// significant end of the field, wrapping each nibble at the current
    /// base and carrying into the next. With `dst` absent the sum is
    /// discarded but carry is still produced, which is how the
    /// `if a >= b` comparisons work.
    pub fn reg_add(&mut self, dst: Option<RegId>, src: RegId, arg: Option<RegId>) {
        for i in self.first..=self.last {
            let mut t = self.nib(Some(src), i) + self.nib(arg, i) + self.flags.carry as u8;
            if t >= self.base {
                t -= self.base;
                self.flags.carry = true;
            } else {
                self.flags.carry = false;
            }
            if let Some(dst) = dst {
                self.regs[dst as usize].nibbles[i] = t;
            }
        }
    }

    /// `dst := src - arg - carry`; a borrow becomes the outgoing carry.
    /// An absent `src` subtracts from zero (negate), an absent `dst`
    /// keeps only the carry.
    pub fn reg_sub(&mut self, dst: Option<RegId>, src: Option<RegId>, arg: Option<RegId>) {
        for i in self.first..=self.last {
            let mut t =
                self.nib(src, i) as i16 - self.nib(arg, i) as i16 - self.flags.carry as i16;
            if t < 0 {
                t += self.base as i16;
                self.flags.carry = true;
            } else {
                self.flags.carry = false;
            }
            if let Some(dst) = dst {
                self.regs[dst as usize].nibbles[i] = t as u8;
            }
        }
    }

    /// Increment over the field by pre-setting carry and adding nothing.
    pub fn reg_inc(&mut self, reg: RegId) {
        self.flags.carry = true;
        self.reg_add(Some(reg), reg, None);
    }

    /// Shift the field one nibble towards the least significant end,
    /// clearing carry and zeroing the vacated nibble.
    pub fn reg_shr(&mut self, reg: RegId) {
        self.flags.carry = false;
        for i in self.first..=self.last {
            self.regs[reg as usize].nibbles[i] = if i == self.last {
                0
            } else {
                self.regs[reg as usize].nibbles[i + 1]
            };
        }
    }

    /// Shift the field one nibble towards the most significant end,
    /// clearing both carry flags.
    pub fn reg_shl(&mut self, reg: RegId) {
        for i in (self.first..=self.last).rev() {
            self.regs[reg as usize].nibbles[i] = if i == self.first {
                0
            } else {
                self.regs[reg as usize].nibbles[i - 1]
            };
        }
        self.flags.carry = false;
        self.flags.prev_carry = false;
    }

    /// Clear carry iff every field nibble of `dst` equals `src` (or zero
    /// when absent). Carry set means the following branch is declined.
    pub fn reg_test_eq(&mut self, dst: RegId, src: Option<RegId>) {
        self.flags.carry = false;
        for i in self.first..=self.last {
            if self.regs[dst as usize].nibbles[i] != self.nib(src, i) {
                self.flags.carry = true;
                break;
            }
        }
    }

    /// The opposite polarity of [`reg_test_eq`](Self::reg_test_eq).
    pub fn reg_test_ne(&mut self, dst: RegId, src: Option<RegId>) {
        self.flags.carry = true;
        for i in self.first..=self.last {
            if self.regs[dst as usize].nibbles[i] != self.nib(src, i) {
                self.flags.carry = false;
                break;
            }
        }
    }

    /// Snapshot of the observable state, for hosts and trace tooling.
    pub fn summary(&self) -> StateSummary {
        StateSummary {
            bank: self.rom_bank,
            pc: self.pc,
            sp: self.sp,
            p: self.p,
            f: self.f,
            base: self.base,
            status: self.status,
            carry: self.flags.carry,
            prev_carry: self.flags.prev_carry,
            display_enable: self.flags.display_enable,
            run_mode: self.flags.mode,
            a: self.regs[RegId::A as usize].digits(),
            b: self.regs[RegId::B as usize].digits(),
            c: self.regs[RegId::C as usize].digits(),
            y: self.regs[RegId::Y as usize].digits(),
            z: self.regs[RegId::Z as usize].digits(),
            t: self.regs[RegId::T as usize].digits(),
            m: self.regs[RegId::M as usize].digits(),
            n: self.regs[RegId::N as usize].digits(),
            data: self.ram.iter().map(Register::digits).collect(),
        }
    }
}

/// Serializable snapshot of the observable processor state. Register
/// values are rendered most significant nibble first, the way they
/// appear in listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub bank: u8,
    pub pc: u16,
    pub sp: usize,
    pub p: u8,
    pub f: u8,
    pub base: u8,
    pub status: u16,
    pub carry: bool,
    pub prev_carry: bool,
    pub display_enable: bool,
    pub run_mode: bool,
    pub a: String,
    pub b: String,
    pub c: String,
    pub y: String,
    pub z: String,
    pub t: String,
    pub m: String,
    pub n: String,
    pub data: Vec<String>,
}

impl fmt::Display for StateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            [('A', &self.a), ('B', &self.b), ('C', &self.c)],
            [('Y', &self.y), ('Z', &self.z), ('T', &self.t)],
        ];
        for row in rows {
            for (name, value) in row {
                write!(f, "reg[*{name}] = 0x{value}  ")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "reg[*M] = 0x{}  reg[*N] = 0x{}", self.m, self.n)?;
        write!(
            f,
            "status = 0x{:04x}  p = {:02}  f = {:x}  pc = {:01o}-{:04o}  sp = {}  base = {}",
            self.status, self.p, self.f, self.bank, self.pc, self.sp, self.base
        )
    }
}
