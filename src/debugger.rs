//! Debug surface over [`GameBoy`]: time-accurate byte access, breakpoints,
//! stepping, and whole-register transfers. Everything here operates at the
//! engine's current cycle, so reads see exactly what the CPU would see
//! (including blocked regions) and writes take effect as if the CPU had
//! performed them.

use crate::cpu::{CpuRegisters, EndCondition};
use crate::gameboy::GameBoy;

impl GameBoy {
    /// Read one byte through the bus at the current cycle. The touched
    /// peripheral is caught up first, so the value is time-accurate; a
    /// region the CPU could not access right now reads as it would for the
    /// CPU (for example 0xFF from VRAM during mode 3).
    pub fn gb_read_byte(&mut self, addr: u16) -> u8 {
        let cc = self.cpu().cycle_counter;
        self.cpu_mut().mem.read(addr, cc)
    }

    /// Write one byte through the bus at the current cycle, with full
    /// side effects (peripheral catch-up and rescheduling included).
    pub fn gb_write_byte(&mut self, addr: u16, val: u8) {
        let cc = self.cpu().cycle_counter;
        self.cpu_mut().mem.write(addr, cc, val);
    }

    /// Arm the next `run_for` to stop after one instruction, entering any
    /// call it makes.
    pub fn step_in(&mut self) {
        self.cpu_mut().arm_break_on_depth(-1);
    }

    /// Arm the next `run_for` to stop after one instruction, running any
    /// call it makes to completion first.
    pub fn step_over(&mut self) {
        self.cpu_mut().arm_break_on_depth(0);
    }

    /// Arm the next `run_for` to stop after the current routine returns.
    pub fn step_out(&mut self) {
        self.cpu_mut().arm_break_on_depth(1);
    }

    /// Stop `run_for` whenever PC lands on `addr`. A breakpoint placed on
    /// the current instruction skips its first match, so it does not fire
    /// before anything has run.
    pub fn add_breakpoint(&mut self, addr: u16) {
        self.cpu_mut().add_breakpoint(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u16) {
        self.cpu_mut().remove_breakpoint(addr);
    }

    pub fn clear_breakpoints(&mut self) {
        let cpu = self.cpu_mut();
        cpu.breakpoints.clear();
        if cpu.end_condition == EndCondition::BreakOnAddress {
            cpu.end_condition = EndCondition::Idle;
        }
    }

    /// The whole register file, captured atomically between instructions.
    pub fn get_registers(&self) -> CpuRegisters {
        self.cpu().regs
    }

    /// Replace the whole register file. The unused low nibble of F stays
    /// forced to zero.
    pub fn set_registers(&mut self, mut regs: CpuRegisters) {
        regs.f &= 0xF0;
        self.cpu_mut().regs = regs;
    }
}
