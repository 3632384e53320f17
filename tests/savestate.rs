mod common;

use std::fs;

use common::build_rom;
use lazyboy_core::GameBoy;

#[test]
fn file_round_trip_resumes_bit_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");
    fs::write(&rom_path, build_rom(&[0x3C, 0x18, 0xFD])).unwrap();

    let mut gb = GameBoy::new();
    gb.load(&rom_path).unwrap();
    gb.run_for(123_456);
    assert!(gb.save_state());
    let regs = gb.get_registers();

    // Diverge far past the snapshot, then restore.
    gb.run_for(1_000_000);
    assert_ne!(gb.get_registers().a, regs.a);
    assert!(gb.load_state());
    assert_eq!(gb.get_registers(), regs);

    // The restored machine produces the same future: run both copies the
    // same distance and compare.
    gb.run_for(50_000);
    let after_first = gb.get_registers();
    assert!(gb.load_state());
    gb.run_for(50_000);
    assert_eq!(gb.get_registers(), after_first);
}

#[test]
fn saved_files_are_identical_across_a_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");
    fs::write(&rom_path, build_rom(&[0x18, 0xFE])).unwrap();

    let mut gb = GameBoy::new();
    gb.load(&rom_path).unwrap();
    gb.run_for(70_224 * 3);
    let first = dir.path().join("a.gqs");
    let second = dir.path().join("b.gqs");
    assert!(gb.save_state_to(&first));
    assert!(gb.load_state_from(&first));
    assert!(gb.save_state_to(&second));
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn slots_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");
    fs::write(&rom_path, build_rom(&[0x3C, 0x18, 0xFD])).unwrap();

    let mut gb = GameBoy::new();
    gb.load(&rom_path).unwrap();

    gb.run_for(10_000);
    gb.select_state(1);
    assert!(gb.save_state());
    let early = gb.get_registers();

    gb.run_for(200_000);
    gb.select_state(2);
    assert!(gb.save_state());
    let late = gb.get_registers();

    gb.select_state(1);
    assert!(gb.load_state());
    assert_eq!(gb.get_registers(), early);
    gb.select_state(2);
    assert!(gb.load_state());
    assert_eq!(gb.get_registers(), late);

    assert!(dir.path().join("game_1.gqs").exists());
    assert!(dir.path().join("game_2.gqs").exists());
}

#[test]
fn a_corrupt_file_leaves_the_machine_running() {
    let dir = tempfile::tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");
    fs::write(&rom_path, build_rom(&[0x3C, 0x18, 0xFD])).unwrap();

    let mut gb = GameBoy::new();
    gb.load(&rom_path).unwrap();
    gb.run_for(10_000);
    assert!(gb.save_state());

    // Flip the major version byte: the load must fail and change nothing.
    let path = dir.path().join("game_0.gqs");
    let mut bytes = fs::read(&path).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    gb.run_for(5_000);
    let regs = gb.get_registers();
    assert!(!gb.load_state());
    assert_eq!(gb.get_registers(), regs);
}

#[test]
fn a_newer_stream_with_extra_records_still_loads() {
    let dir = tempfile::tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");
    fs::write(&rom_path, build_rom(&[0x3C, 0x18, 0xFD])).unwrap();

    let mut gb = GameBoy::new();
    gb.load(&rom_path).unwrap();
    gb.run_for(10_000);
    assert!(gb.save_state());
    let regs = gb.get_registers();

    // Append a record a future format might produce.
    let path = dir.path().join("game_0.gqs");
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend(b"zspeed\0");
    bytes.extend([0x00, 0x00, 0x01, 0x01]);
    fs::write(&path, &bytes).unwrap();

    gb.run_for(100_000);
    assert!(gb.load_state());
    assert_eq!(gb.get_registers(), regs);
}

#[test]
fn breakpoints_stay_armed_across_a_state_load() {
    let dir = tempfile::tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");
    fs::write(&rom_path, build_rom(&[0x3C, 0x18, 0xFD])).unwrap();

    let mut gb = GameBoy::new();
    gb.load(&rom_path).unwrap();
    gb.run_for(10_000);
    assert!(gb.save_state());

    gb.add_breakpoint(0x100);
    assert!(gb.load_state());
    let r = gb.run_for(1_000_000);
    assert!(r < 0);
    assert_eq!(gb.get_registers().pc, 0x100);
}

#[test]
fn timers_keep_their_phase_across_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");
    fs::write(&rom_path, build_rom(&[0x18, 0xFE])).unwrap();

    let mut gb = GameBoy::new();
    gb.load(&rom_path).unwrap();
    gb.gb_write_byte(0xFF06, 0x80); // TMA
    gb.gb_write_byte(0xFF07, 0x06); // enabled, 64-cycle period
    gb.run_for(12_345);
    let tima = gb.gb_read_byte(0xFF05);
    let div = gb.gb_read_byte(0xFF04);
    assert!(gb.save_state());

    gb.run_for(999_999);
    assert!(gb.load_state());
    assert_eq!(gb.gb_read_byte(0xFF05), tima);
    assert_eq!(gb.gb_read_byte(0xFF04), div);
}
