mod common;

use common::gb_with;
use lazyboy_core::serial::LinkPort;

struct Invert;

impl LinkPort for Invert {
    fn transfer(&mut self, byte: u8) -> u8 {
        !byte
    }
}

#[test]
fn div_counts_wall_cycles() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    let start = gb.gb_read_byte(0xFF04);
    gb.run_for(256 * 4);
    let after = gb.gb_read_byte(0xFF04);
    assert_eq!(after.wrapping_sub(start), 4);
    // Any write resets the divider.
    gb.gb_write_byte(0xFF04, 0x55);
    assert_eq!(gb.gb_read_byte(0xFF04), 0);
}

#[test]
fn tima_overflow_raises_the_timer_interrupt() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    gb.gb_write_byte(0xFF0F, 0x00);
    gb.gb_write_byte(0xFF05, 0xFF);
    gb.gb_write_byte(0xFF06, 0xAB);
    gb.gb_write_byte(0xFF07, 0x05); // enabled, 16-cycle period
    gb.run_for(64);
    assert_ne!(gb.gb_read_byte(0xFF0F) & 0x04, 0);
    // The counter reloaded from TMA and kept running.
    assert!(gb.gb_read_byte(0xFF05) >= 0xAB);
}

#[test]
fn serial_transfer_completes_against_a_link_partner() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    gb.connect_link_port(Box::new(Invert));
    gb.gb_write_byte(0xFF0F, 0x00);
    gb.gb_write_byte(0xFF01, 0xA5);
    gb.gb_write_byte(0xFF02, 0x81); // start, internal clock
    gb.run_for(5_000);
    assert_eq!(gb.gb_read_byte(0xFF01), 0x5A);
    assert_eq!(gb.gb_read_byte(0xFF02) & 0x80, 0);
    assert_ne!(gb.gb_read_byte(0xFF0F) & 0x08, 0);
}

#[test]
fn an_idle_serial_port_stays_idle() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    gb.gb_write_byte(0xFF0F, 0x00);
    gb.gb_write_byte(0xFF01, 0xA5);
    gb.run_for(100_000);
    assert_eq!(gb.gb_read_byte(0xFF01), 0xA5);
    assert_eq!(gb.gb_read_byte(0xFF0F) & 0x08, 0);
}

#[test]
fn ly_advances_line_by_line_and_wraps_per_frame() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    assert_eq!(gb.gb_read_byte(0xFF44), 0);
    gb.run_for(456);
    assert_eq!(gb.gb_read_byte(0xFF44), 1);
    gb.run_for(456 * 10);
    assert_eq!(gb.gb_read_byte(0xFF44), 11);
    // 154 lines per frame.
    gb.run_for(456 * 143);
    assert_eq!(gb.gb_read_byte(0xFF44), 0);
}

#[test]
fn vblank_interrupt_fires_once_per_frame() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    gb.gb_write_byte(0xFF0F, 0x00);
    gb.run_for(456 * 143);
    assert_eq!(gb.gb_read_byte(0xFF0F) & 0x01, 0);
    gb.run_for(456);
    assert_ne!(gb.gb_read_byte(0xFF0F) & 0x01, 0);
}

#[test]
fn repeated_reads_at_the_same_cycle_are_idempotent() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    gb.gb_write_byte(0xFF07, 0x05);
    gb.run_for(12_345);
    for addr in [0xFF04u16, 0xFF05, 0xFF44, 0xFF41] {
        let first = gb.gb_read_byte(addr);
        assert_eq!(gb.gb_read_byte(addr), first);
    }
}

#[test]
fn joypad_lines_read_active_low() {
    let mut gb = gb_with(&[0x18, 0xFE]);
    // No row selected: low nibble floats high.
    gb.gb_write_byte(0xFF00, 0x30);
    assert_eq!(gb.gb_read_byte(0xFF00) & 0x0F, 0x0F);
    // Select the direction row with Right held.
    gb.set_input(0x01);
    gb.gb_write_byte(0xFF00, 0x20);
    assert_eq!(gb.gb_read_byte(0xFF00) & 0x0F, 0x0E);
    // Select the button row with A held.
    gb.set_input(0x10);
    gb.gb_write_byte(0xFF00, 0x10);
    assert_eq!(gb.gb_read_byte(0xFF00) & 0x0F, 0x0E);
}
