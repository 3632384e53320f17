use crate::memory::Memory;

pub const FLAG_Z: u8 = 0x80;
pub const FLAG_N: u8 = 0x40;
pub const FLAG_H: u8 = 0x20;
pub const FLAG_C: u8 = 0x10;

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => { log::trace!($($arg)*) };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

/// The whole register file, moved atomically by the debug surface.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct CpuRegisters {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
}

/// What stops `run_for` before the cycle budget runs out. At most one
/// condition is armed at a time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EndCondition {
    Idle,
    /// Stop when PC lands on a registered breakpoint.
    BreakOnAddress,
    /// Stop when the tracked call depth reaches zero or below. Armed with
    /// -1 for step-in, 0 for step-over, 1 for step-out.
    BreakOnDepth(i32),
}

/// The LR35902 interpreter and owner of the cycle clock.
///
/// `cycle_counter` is the only time reference in the engine; it advances 4
/// cycles per memory access plus the documented internal delays, and it
/// never wraps within a session. Peripherals observe it through the bus.
pub struct Cpu {
    pub regs: CpuRegisters,
    pub mem: Memory,
    pub cycle_counter: u64,
    pub ime: bool,
    pub halted: bool,
    /// HALT-bug flag: the next opcode fetch does not advance PC.
    pub halt_bug: bool,
    /// Interrupts are not dispatched before this stamp (EI latency).
    pub min_int_time: u64,
    pub end_condition: EndCondition,
    /// Single-shot: the next breakpoint match is skipped instead of
    /// stopping. Set when a breakpoint is placed on the current instruction
    /// and when one fires, so the instruction under the breakpoint can
    /// always be resumed past.
    pub suppress_next_match: bool,
    pub breakpoints: Vec<u16>,
    /// Whether `set_state_ptrs` has run for this session.
    pub state_bound: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            regs: CpuRegisters::default(),
            mem: Memory::new(),
            cycle_counter: 0,
            ime: false,
            halted: false,
            halt_bug: false,
            min_int_time: 0,
            end_condition: EndCondition::Idle,
            suppress_next_match: false,
            breakpoints: Vec::new(),
            state_bound: false,
        }
    }

    pub fn add_breakpoint(&mut self, addr: u16) {
        if !self.breakpoints.contains(&addr) {
            self.breakpoints.push(addr);
        }
        self.end_condition = EndCondition::BreakOnAddress;
        // A breakpoint placed on the instruction about to execute must not
        // stop the run before anything has happened; one placed elsewhere
        // fires on its first hit.
        if self.regs.pc == addr {
            self.suppress_next_match = true;
        }
    }

    pub fn remove_breakpoint(&mut self, addr: u16) {
        self.breakpoints.retain(|&a| a != addr);
        if self.breakpoints.is_empty()
            && self.end_condition == EndCondition::BreakOnAddress
        {
            self.end_condition = EndCondition::Idle;
        }
    }

    pub fn arm_break_on_depth(&mut self, depth: i32) {
        self.end_condition = EndCondition::BreakOnDepth(depth);
    }

    /// Run until `budget` cycles have elapsed or an end condition fires.
    ///
    /// Returns -1 when no program is loaded. Otherwise returns the signed
    /// overshoot past the requested budget: zero or a small positive value
    /// when the budget was consumed (the last instruction may straddle the
    /// boundary), negative when an end condition stopped the run early.
    pub fn run_for(&mut self, budget: u64) -> i64 {
        if !self.mem.loaded() {
            return -1;
        }
        let target = self.cycle_counter + budget;
        while self.cycle_counter < target {
            if self.mem.next_event_time() <= self.cycle_counter {
                self.mem.update_irqs(self.cycle_counter);
            }

            if self.halted {
                if self.mem.pending_irqs(self.cycle_counter) != 0 {
                    self.halted = false;
                    self.cycle_counter += 4;
                } else {
                    // Nothing to execute: jump straight to the next event
                    // stamp (or the budget boundary).
                    self.cycle_counter = self.mem.next_event_time().min(target);
                    continue;
                }
            }

            if self.ime && self.cycle_counter >= self.min_int_time {
                self.dispatch_irq();
            }

            if self.end_condition == EndCondition::BreakOnAddress
                && self.breakpoints.contains(&self.regs.pc)
            {
                if self.suppress_next_match {
                    self.suppress_next_match = false;
                } else {
                    cpu_trace!("breakpoint hit at {:04X}", self.regs.pc);
                    self.suppress_next_match = true;
                    break;
                }
            }

            self.execute_one();
            self.cycle_counter += self.mem.take_dma_stall();

            if let EndCondition::BreakOnDepth(depth) = self.end_condition {
                if depth <= 0 {
                    self.end_condition = EndCondition::Idle;
                    break;
                }
            }
        }
        self.cycle_counter as i64 - target as i64
    }

    /// Service the highest-priority pending interrupt, if any.
    fn dispatch_irq(&mut self) {
        let pending = self.mem.pending_irqs(self.cycle_counter);
        if pending == 0 {
            return;
        }
        let bit = pending.trailing_zeros() as u8;
        self.ime = false;
        self.mem.ack_irq(1 << bit);
        cpu_trace!("irq dispatch, vector {:02X}", 0x40 + bit * 8);
        // Two internal delay cycles, then the PC push.
        self.tick(8);
        self.push(self.regs.pc);
        self.tick(4);
        self.regs.pc = 0x0040 + bit as u16 * 8;
    }

    fn tick(&mut self, cycles: u64) {
        self.cycle_counter += cycles;
    }

    fn read(&mut self, addr: u16) -> u8 {
        self.tick(4);
        self.mem.read(addr, self.cycle_counter)
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.tick(4);
        self.mem.write(addr, self.cycle_counter, val);
    }

    fn fetch(&mut self) -> u8 {
        let b = self.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        b
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch() as u16;
        let hi = self.fetch() as u16;
        hi << 8 | lo
    }

    fn fetch_opcode(&mut self) -> u8 {
        let op = self.read(self.regs.pc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }
        op
    }

    // Register-pair accessors.
    pub fn af(&self) -> u16 {
        (self.regs.a as u16) << 8 | self.regs.f as u16
    }
    pub fn bc(&self) -> u16 {
        (self.regs.b as u16) << 8 | self.regs.c as u16
    }
    pub fn de(&self) -> u16 {
        (self.regs.d as u16) << 8 | self.regs.e as u16
    }
    pub fn hl(&self) -> u16 {
        (self.regs.h as u16) << 8 | self.regs.l as u16
    }
    fn set_af(&mut self, val: u16) {
        self.regs.a = (val >> 8) as u8;
        self.regs.f = val as u8 & 0xF0;
    }
    fn set_bc(&mut self, val: u16) {
        self.regs.b = (val >> 8) as u8;
        self.regs.c = val as u8;
    }
    fn set_de(&mut self, val: u16) {
        self.regs.d = (val >> 8) as u8;
        self.regs.e = val as u8;
    }
    fn set_hl(&mut self, val: u16) {
        self.regs.h = (val >> 8) as u8;
        self.regs.l = val as u8;
    }

    /// Operand order B C D E H L (HL) A, as encoded in the opcode bytes.
    fn read_reg(&mut self, idx: u8) -> u8 {
        match idx {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => self.read(self.hl()),
            _ => self.regs.a,
        }
    }

    fn write_reg(&mut self, idx: u8, val: u8) {
        match idx {
            0 => self.regs.b = val,
            1 => self.regs.c = val,
            2 => self.regs.d = val,
            3 => self.regs.e = val,
            4 => self.regs.h = val,
            5 => self.regs.l = val,
            6 => self.write(self.hl(), val),
            _ => self.regs.a = val,
        }
    }

    fn condition(&self, idx: u8) -> bool {
        match idx {
            0 => self.regs.f & FLAG_Z == 0,
            1 => self.regs.f & FLAG_Z != 0,
            2 => self.regs.f & FLAG_C == 0,
            _ => self.regs.f & FLAG_C != 0,
        }
    }

    fn push(&mut self, val: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write(self.regs.sp, (val >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write(self.regs.sp, val as u8);
    }

    fn pop(&mut self) -> u16 {
        let lo = self.read(self.regs.sp) as u16;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.read(self.regs.sp) as u16;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        hi << 8 | lo
    }

    /// Call-depth adjustment for the step state machine. Applied at decode
    /// for every call-class and return-class opcode, taken or not.
    fn adjust_depth(&mut self, delta: i32) {
        if let EndCondition::BreakOnDepth(depth) = &mut self.end_condition {
            *depth += delta;
        }
    }

    // ALU helpers.
    fn alu_add(&mut self, val: u8, carry_in: bool) {
        let carry = (carry_in && self.regs.f & FLAG_C != 0) as u16;
        let a = self.regs.a as u16;
        let sum = a + val as u16 + carry;
        let mut f = 0;
        if sum as u8 == 0 {
            f |= FLAG_Z;
        }
        if (a & 0x0F) + (val as u16 & 0x0F) + carry > 0x0F {
            f |= FLAG_H;
        }
        if sum > 0xFF {
            f |= FLAG_C;
        }
        self.regs.a = sum as u8;
        self.regs.f = f;
    }

    fn alu_sub(&mut self, val: u8, carry_in: bool, keep_result: bool) {
        let carry = (carry_in && self.regs.f & FLAG_C != 0) as i16;
        let a = self.regs.a as i16;
        let diff = a - val as i16 - carry;
        let mut f = FLAG_N;
        if diff as u8 == 0 {
            f |= FLAG_Z;
        }
        if (a & 0x0F) - (val as i16 & 0x0F) - carry < 0 {
            f |= FLAG_H;
        }
        if diff < 0 {
            f |= FLAG_C;
        }
        if keep_result {
            self.regs.a = diff as u8;
        }
        self.regs.f = f;
    }

    fn alu_logic(&mut self, result: u8, h_flag: bool) {
        self.regs.a = result;
        self.regs.f = if result == 0 { FLAG_Z } else { 0 };
        if h_flag {
            self.regs.f |= FLAG_H;
        }
    }

    fn alu_op(&mut self, op: u8, val: u8) {
        match op {
            0 => self.alu_add(val, false),
            1 => self.alu_add(val, true),
            2 => self.alu_sub(val, false, true),
            3 => self.alu_sub(val, true, true),
            4 => self.alu_logic(self.regs.a & val, true),
            5 => self.alu_logic(self.regs.a ^ val, false),
            6 => self.alu_logic(self.regs.a | val, false),
            _ => self.alu_sub(val, false, false),
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        self.regs.f = (self.regs.f & FLAG_C)
            | if result == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0x0F { FLAG_H } else { 0 };
        result
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        self.regs.f = (self.regs.f & FLAG_C)
            | FLAG_N
            | if result == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0 { FLAG_H } else { 0 };
        result
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.hl();
        let sum = hl.wrapping_add(val);
        self.regs.f = (self.regs.f & FLAG_Z)
            | if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF { FLAG_H } else { 0 }
            | if (hl as u32) + (val as u32) > 0xFFFF { FLAG_C } else { 0 };
        self.set_hl(sum);
        self.tick(4);
    }

    fn sp_plus_offset(&mut self) -> u16 {
        let offset = self.fetch() as i8 as i16 as u16;
        let sp = self.regs.sp;
        self.regs.f = (if (sp & 0x0F) + (offset & 0x0F) > 0x0F { FLAG_H } else { 0 })
            | (if (sp & 0xFF) + (offset & 0xFF) > 0xFF { FLAG_C } else { 0 });
        sp.wrapping_add(offset)
    }

    fn jr(&mut self, taken: bool) {
        let offset = self.fetch() as i8;
        if taken {
            self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            self.tick(4);
        }
    }

    fn jp(&mut self, taken: bool) {
        let addr = self.fetch_word();
        if taken {
            self.regs.pc = addr;
            self.tick(4);
        }
    }

    fn call(&mut self, taken: bool) {
        let addr = self.fetch_word();
        if taken {
            self.tick(4);
            self.push(self.regs.pc);
            self.regs.pc = addr;
        }
    }

    fn ret(&mut self) {
        self.regs.pc = self.pop();
        self.tick(4);
    }

    fn daa(&mut self) {
        let mut a = self.regs.a;
        let f = self.regs.f;
        if f & FLAG_N == 0 {
            if f & FLAG_C != 0 || a > 0x99 {
                a = a.wrapping_add(0x60);
                self.regs.f |= FLAG_C;
            }
            if f & FLAG_H != 0 || a & 0x0F > 0x09 {
                a = a.wrapping_add(0x06);
            }
        } else {
            if f & FLAG_C != 0 {
                a = a.wrapping_sub(0x60);
            }
            if f & FLAG_H != 0 {
                a = a.wrapping_sub(0x06);
            }
        }
        self.regs.a = a;
        self.regs.f &= !(FLAG_Z | FLAG_H);
        if a == 0 {
            self.regs.f |= FLAG_Z;
        }
    }

    fn execute_one(&mut self) {
        let op = self.fetch_opcode();
        match op {
            0x00 => {}
            0x08 => {
                let addr = self.fetch_word();
                self.write(addr, self.regs.sp as u8);
                self.write(addr.wrapping_add(1), (self.regs.sp >> 8) as u8);
            }
            0x10 => self.stop(),
            0x18 => self.jr(true),
            0x20 | 0x28 | 0x30 | 0x38 => {
                let taken = self.condition((op >> 3) & 0x03);
                self.jr(taken);
            }
            0x01 => {
                let val = self.fetch_word();
                self.set_bc(val);
            }
            0x11 => {
                let val = self.fetch_word();
                self.set_de(val);
            }
            0x21 => {
                let val = self.fetch_word();
                self.set_hl(val);
            }
            0x31 => self.regs.sp = self.fetch_word(),
            0x02 => self.write(self.bc(), self.regs.a),
            0x12 => self.write(self.de(), self.regs.a),
            0x22 => {
                self.write(self.hl(), self.regs.a);
                self.set_hl(self.hl().wrapping_add(1));
            }
            0x32 => {
                self.write(self.hl(), self.regs.a);
                self.set_hl(self.hl().wrapping_sub(1));
            }
            0x0A => self.regs.a = self.read(self.bc()),
            0x1A => self.regs.a = self.read(self.de()),
            0x2A => {
                self.regs.a = self.read(self.hl());
                self.set_hl(self.hl().wrapping_add(1));
            }
            0x3A => {
                self.regs.a = self.read(self.hl());
                self.set_hl(self.hl().wrapping_sub(1));
            }
            0x03 => {
                self.set_bc(self.bc().wrapping_add(1));
                self.tick(4);
            }
            0x13 => {
                self.set_de(self.de().wrapping_add(1));
                self.tick(4);
            }
            0x23 => {
                self.set_hl(self.hl().wrapping_add(1));
                self.tick(4);
            }
            0x33 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.tick(4);
            }
            0x0B => {
                self.set_bc(self.bc().wrapping_sub(1));
                self.tick(4);
            }
            0x1B => {
                self.set_de(self.de().wrapping_sub(1));
                self.tick(4);
            }
            0x2B => {
                self.set_hl(self.hl().wrapping_sub(1));
                self.tick(4);
            }
            0x3B => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                self.tick(4);
            }
            0x09 => self.add_hl(self.bc()),
            0x19 => self.add_hl(self.de()),
            0x29 => self.add_hl(self.hl()),
            0x39 => self.add_hl(self.regs.sp),
            0x07 => {
                let a = self.regs.a;
                self.regs.a = a.rotate_left(1);
                self.regs.f = if a & 0x80 != 0 { FLAG_C } else { 0 };
            }
            0x0F => {
                let a = self.regs.a;
                self.regs.a = a.rotate_right(1);
                self.regs.f = if a & 0x01 != 0 { FLAG_C } else { 0 };
            }
            0x17 => {
                let a = self.regs.a;
                let carry = (self.regs.f & FLAG_C != 0) as u8;
                self.regs.a = a << 1 | carry;
                self.regs.f = if a & 0x80 != 0 { FLAG_C } else { 0 };
            }
            0x1F => {
                let a = self.regs.a;
                let carry = (self.regs.f & FLAG_C != 0) as u8;
                self.regs.a = a >> 1 | carry << 7;
                self.regs.f = if a & 0x01 != 0 { FLAG_C } else { 0 };
            }
            0x27 => self.daa(),
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f |= FLAG_N | FLAG_H;
            }
            0x37 => self.regs.f = (self.regs.f & FLAG_Z) | FLAG_C,
            0x3F => self.regs.f = (self.regs.f & (FLAG_Z | FLAG_C)) ^ FLAG_C,
            0x76 => self.halt(),
            op if op & 0xC7 == 0x04 => {
                let idx = (op >> 3) & 0x07;
                let val = self.read_reg(idx);
                let result = self.inc8(val);
                self.write_reg(idx, result);
            }
            op if op & 0xC7 == 0x05 => {
                let idx = (op >> 3) & 0x07;
                let val = self.read_reg(idx);
                let result = self.dec8(val);
                self.write_reg(idx, result);
            }
            op if op & 0xC7 == 0x06 => {
                let val = self.fetch();
                self.write_reg((op >> 3) & 0x07, val);
            }
            0x40..=0x7F => {
                let val = self.read_reg(op & 0x07);
                self.write_reg((op >> 3) & 0x07, val);
            }
            0x80..=0xBF => {
                let val = self.read_reg(op & 0x07);
                self.alu_op((op >> 3) & 0x07, val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.adjust_depth(-1);
                let taken = self.condition((op >> 3) & 0x03);
                self.tick(4);
                if taken {
                    self.ret();
                }
            }
            0xC9 => {
                self.adjust_depth(-1);
                self.ret();
            }
            0xD9 => {
                self.adjust_depth(-1);
                self.ret();
                self.ime = true;
            }
            0xC1 => {
                let val = self.pop();
                self.set_bc(val);
            }
            0xD1 => {
                let val = self.pop();
                self.set_de(val);
            }
            0xE1 => {
                let val = self.pop();
                self.set_hl(val);
            }
            0xF1 => {
                let val = self.pop();
                self.set_af(val);
            }
            0xC5 => {
                self.tick(4);
                self.push(self.bc());
            }
            0xD5 => {
                self.tick(4);
                self.push(self.de());
            }
            0xE5 => {
                self.tick(4);
                self.push(self.hl());
            }
            0xF5 => {
                self.tick(4);
                self.push(self.af());
            }
            0xC3 => self.jp(true),
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let taken = self.condition((op >> 3) & 0x03);
                self.jp(taken);
            }
            0xE9 => self.regs.pc = self.hl(),
            0xCD => {
                self.adjust_depth(1);
                self.call(true);
            }
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                self.adjust_depth(1);
                let taken = self.condition((op >> 3) & 0x03);
                self.call(taken);
            }
            op if op & 0xC7 == 0xC7 => {
                // RST
                self.adjust_depth(1);
                self.tick(4);
                self.push(self.regs.pc);
                self.regs.pc = (op & 0x38) as u16;
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch();
                self.alu_op((op >> 3) & 0x07, val);
            }
            0xCB => self.execute_cb(),
            0xE0 => {
                let offset = self.fetch() as u16;
                self.write(0xFF00 | offset, self.regs.a);
            }
            0xF0 => {
                let offset = self.fetch() as u16;
                self.regs.a = self.read(0xFF00 | offset);
            }
            0xE2 => self.write(0xFF00 | self.regs.c as u16, self.regs.a),
            0xF2 => self.regs.a = self.read(0xFF00 | self.regs.c as u16),
            0xEA => {
                let addr = self.fetch_word();
                self.write(addr, self.regs.a);
            }
            0xFA => {
                let addr = self.fetch_word();
                self.regs.a = self.read(addr);
            }
            0xE8 => {
                self.regs.sp = self.sp_plus_offset();
                self.tick(8);
            }
            0xF8 => {
                let result = self.sp_plus_offset();
                self.set_hl(result);
                self.tick(4);
            }
            0xF9 => {
                self.regs.sp = self.hl();
                self.tick(4);
            }
            0xF3 => self.ime = false,
            0xFB => {
                self.ime = true;
                self.min_int_time = self.cycle_counter + 4;
            }
            _ => {
                // D3, DB, DD, E3, E4, EB, EC, ED, F4, FC, FD: no operation
                // is defined; real hardware locks up.
                log::warn!("undefined opcode {op:02X} at {:04X}", self.regs.pc.wrapping_sub(1));
            }
        }
    }

    fn execute_cb(&mut self) {
        let op = self.fetch();
        let idx = op & 0x07;
        match op {
            0x00..=0x3F => {
                let val = self.read_reg(idx);
                let (result, carry) = match op >> 3 {
                    0 => (val.rotate_left(1), val & 0x80 != 0),
                    1 => (val.rotate_right(1), val & 0x01 != 0),
                    2 => (val << 1 | (self.regs.f & FLAG_C != 0) as u8, val & 0x80 != 0),
                    3 => (
                        val >> 1 | ((self.regs.f & FLAG_C != 0) as u8) << 7,
                        val & 0x01 != 0,
                    ),
                    4 => (val << 1, val & 0x80 != 0),
                    5 => (val >> 1 | val & 0x80, val & 0x01 != 0),
                    6 => (val.rotate_left(4), false),
                    _ => (val >> 1, val & 0x01 != 0),
                };
                self.regs.f = (if result == 0 { FLAG_Z } else { 0 })
                    | (if carry { FLAG_C } else { 0 });
                self.write_reg(idx, result);
            }
            0x40..=0x7F => {
                let bit = (op >> 3) & 0x07;
                let val = self.read_reg(idx);
                self.regs.f = (self.regs.f & FLAG_C)
                    | FLAG_H
                    | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
            }
            0x80..=0xBF => {
                let bit = (op >> 3) & 0x07;
                let val = self.read_reg(idx);
                self.write_reg(idx, val & !(1 << bit));
            }
            _ => {
                let bit = (op >> 3) & 0x07;
                let val = self.read_reg(idx);
                self.write_reg(idx, val | 1 << bit);
            }
        }
    }

    fn halt(&mut self) {
        if !self.ime && self.mem.pending_irqs(self.cycle_counter) != 0 {
            // HALT bug: execution continues but the next opcode fetch does
            // not advance PC.
            self.halt_bug = true;
        } else {
            self.halted = true;
        }
    }

    fn stop(&mut self) {
        // STOP is encoded as two bytes.
        self.fetch();
        if self.mem.key1 & 0x01 != 0 {
            // Speed switch: flip the reported speed flag and clear the arm
            // bit. The timing model itself stays single-speed.
            self.mem.key1 = (self.mem.key1 ^ 0x80) & 0x80;
        } else {
            self.halted = true;
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;

    fn cpu_with(code: &[u8]) -> Cpu {
        let mut rom = vec![0u8; 0x8000];
        rom[0x100..0x100 + code.len()].copy_from_slice(code);
        let mut cpu = Cpu::new();
        cpu.mem.set_cartridge(Cartridge::from_bytes(rom));
        cpu.regs.pc = 0x100;
        cpu.regs.sp = 0xFFFE;
        cpu
    }

    #[test]
    fn run_for_without_a_rom_returns_minus_one() {
        let mut cpu = Cpu::new();
        assert_eq!(cpu.run_for(100), -1);
    }

    #[test]
    fn nop_takes_four_cycles() {
        let mut cpu = cpu_with(&[0x00, 0x00, 0x00]);
        assert_eq!(cpu.run_for(8), 0);
        assert_eq!(cpu.cycle_counter, 8);
        assert_eq!(cpu.regs.pc, 0x102);
    }

    #[test]
    fn overshoot_is_reported_when_an_instruction_straddles_the_budget() {
        // LD BC,nn is 12 cycles; a budget of 8 overshoots by 4.
        let mut cpu = cpu_with(&[0x01, 0x34, 0x12]);
        assert_eq!(cpu.run_for(8), 4);
        assert_eq!(cpu.bc(), 0x1234);
    }

    #[test]
    fn arithmetic_sets_the_documented_flags() {
        // LD A,0x0F ; ADD A,0x01 -> half-carry.
        let mut cpu = cpu_with(&[0x3E, 0x0F, 0xC6, 0x01]);
        cpu.run_for(16);
        assert_eq!(cpu.regs.a, 0x10);
        assert_eq!(cpu.regs.f, FLAG_H);
        // SUB 0x10 -> zero.
        let mut cpu = cpu_with(&[0x3E, 0x10, 0xD6, 0x10]);
        cpu.run_for(16);
        assert_eq!(cpu.regs.f, FLAG_Z | FLAG_N);
    }

    #[test]
    fn call_and_ret_round_trip_through_the_stack() {
        // CALL 0x0110 ; ... at 0x110: RET
        let mut code = vec![0xCD, 0x10, 0x01];
        code.resize(0x10, 0x00);
        code.push(0xC9);
        let mut cpu = cpu_with(&code);
        cpu.run_for(24);
        assert_eq!(cpu.regs.pc, 0x110);
        cpu.run_for(16);
        assert_eq!(cpu.regs.pc, 0x103);
        assert_eq!(cpu.regs.sp, 0xFFFE);
    }

    #[test]
    fn cb_bit_ops_read_and_modify_registers() {
        // LD B,0x80 ; BIT 7,B ; RES 7,B ; BIT 7,B
        let mut cpu = cpu_with(&[0x06, 0x80, 0xCB, 0x78, 0xCB, 0xB8, 0xCB, 0x78]);
        cpu.run_for(16);
        assert_eq!(cpu.regs.f & FLAG_Z, 0);
        cpu.run_for(16);
        assert_eq!(cpu.regs.b, 0x00);
        assert_ne!(cpu.regs.f & FLAG_Z, 0);
    }

    #[test]
    fn ei_delays_interrupt_dispatch_by_one_instruction() {
        // EI ; NOP ; NOP with a pending, enabled VBlank interrupt.
        let mut cpu = cpu_with(&[0xFB, 0x00, 0x00, 0x00]);
        cpu.mem.write(0xFFFF, 0, 0x01);
        cpu.mem.request_irq(0x01);
        // EI itself must not dispatch.
        cpu.run_for(4);
        assert_eq!(cpu.regs.pc, 0x101);
        // The following NOP executes, then dispatch happens.
        cpu.run_for(24);
        assert_eq!(cpu.regs.pc, 0x40);
        assert!(!cpu.ime);
    }

    #[test]
    fn halt_wakes_on_a_pending_interrupt() {
        let mut cpu = cpu_with(&[0x76, 0x00]);
        cpu.mem.write(0xFFFF, 0, 0x04);
        cpu.run_for(4);
        assert!(cpu.halted);
        // Enable the timer: overflow wakes the CPU without IME.
        cpu.mem.write(0xFF05, cpu.cycle_counter, 0xFF);
        cpu.mem.write(0xFF07, cpu.cycle_counter, 0x05);
        // Overflow at +16, wake costs 4, the NOP another 4.
        let r = cpu.run_for(24);
        assert!(!cpu.halted);
        assert_eq!(r, 0);
        assert_eq!(cpu.regs.pc, 0x102);
    }

    #[test]
    fn breakpoint_match_is_suppressed_once() {
        // JR -2 loop at 0x100.
        let mut cpu = cpu_with(&[0x18, 0xFE]);
        cpu.add_breakpoint(0x100);
        // First pass is suppressed; the second match stops the run.
        let r = cpu.run_for(1000);
        assert!(r < 0);
        assert_eq!(cpu.regs.pc, 0x100);
        assert_eq!(cpu.cycle_counter, 12);
    }

    #[test]
    fn breakpoint_ahead_of_pc_fires_on_its_first_hit() {
        // NOPs into an idle loop: 0x102 executes exactly once.
        let mut cpu = cpu_with(&[0x00, 0x00, 0x00, 0x18, 0xFE]);
        cpu.add_breakpoint(0x102);
        let r = cpu.run_for(100_000);
        assert!(r < 0);
        assert_eq!(cpu.regs.pc, 0x102);
        assert_eq!(cpu.cycle_counter, 8);
    }

    #[test]
    fn step_over_runs_a_call_to_completion() {
        // CALL 0x0110 ; NOP ... 0x110: NOP ; RET
        let mut code = vec![0xCD, 0x10, 0x01, 0x00];
        code.resize(0x10, 0x00);
        code.extend([0x00, 0xC9]);
        let mut cpu = cpu_with(&code);
        cpu.arm_break_on_depth(0);
        let r = cpu.run_for(1_000_000);
        assert!(r < 0);
        // Stopped after the matching RET, back at the call site.
        assert_eq!(cpu.regs.pc, 0x103);
        assert_eq!(cpu.end_condition, EndCondition::Idle);
    }

    #[test]
    fn step_in_stops_after_one_instruction() {
        let mut cpu = cpu_with(&[0x00, 0x00]);
        cpu.arm_break_on_depth(-1);
        let r = cpu.run_for(1_000_000);
        assert!(r < 0);
        assert_eq!(cpu.regs.pc, 0x101);
    }

    #[test]
    fn step_out_stops_after_the_enclosing_return() {
        // Start "inside" a routine: push a return address, arm depth 1.
        let mut code = vec![0x00, 0x00, 0xC9]; // NOP NOP RET at 0x100
        code.resize(0x20, 0x00);
        let mut cpu = cpu_with(&code);
        cpu.push(0x0110);
        cpu.cycle_counter = 0;
        cpu.arm_break_on_depth(1);
        let r = cpu.run_for(1_000_000);
        assert!(r < 0);
        assert_eq!(cpu.regs.pc, 0x110);
    }
}
