mod common;

use common::gb_with;
use lazyboy_core::GameBoy;

#[test]
fn run_without_a_rom_returns_minus_one() {
    let mut gb = GameBoy::new();
    assert_eq!(gb.run_for(0), -1);
    assert_eq!(gb.run_for(1_000_000), -1);
}

#[test]
fn the_clock_is_monotonic_across_arbitrary_budgets() {
    let mut gb = GameBoy::new();
    gb.load_bytes(common::IDLE_LOOP.clone());
    let mut total: i64 = 0;
    for budget in [1u64, 7, 100, 4096, 1, 70224, 13, 500_000] {
        let r = gb.run_for(budget);
        // The run consumed the budget plus the reported overshoot.
        assert!(r >= 0);
        total += budget as i64 + r;
    }
    // Overshoot never exceeds one instruction's worth of cycles.
    assert!(total >= 574_442);
}

#[test]
fn overshoot_carries_into_the_next_run() {
    // The JR loop body is 12 cycles, so odd budgets always overshoot.
    let mut gb = gb_with(&[0x18, 0xFE]);
    let r1 = gb.run_for(10);
    assert_eq!(r1, 2);
    // The next run starts from the overshot position.
    let r2 = gb.run_for(12);
    assert_eq!(r2, 0);
}

#[test]
fn breakpoint_stops_the_run_at_the_marked_address() {
    // 0x100: INC A ; JR -3 (back to 0x100)
    let mut gb = gb_with(&[0x3C, 0x18, 0xFD]);
    gb.add_breakpoint(0x100);
    // First match (before anything ran) is suppressed: one full loop
    // iteration executes before the stop.
    let r = gb.run_for(1_000_000);
    assert!(r < 0);
    assert_eq!(gb.get_registers().pc, 0x100);
    let a_at_stop = gb.get_registers().a;
    assert_eq!(a_at_stop, 0x02);

    // Resuming executes past the breakpoint and stops on the next lap.
    let r = gb.run_for(1_000_000);
    assert!(r < 0);
    assert_eq!(gb.get_registers().a, a_at_stop + 1);

    gb.remove_breakpoint(0x100);
    assert!(gb.run_for(1_000) >= 0);
}

#[test]
fn breakpoint_set_ahead_stops_at_its_only_hit() {
    // Straight-line NOPs into an idle loop; 0x102 is reached exactly once,
    // so a missed first match could never fire.
    let mut gb = gb_with(&[0x00, 0x00, 0x00, 0x18, 0xFE]);
    gb.add_breakpoint(0x102);
    let r = gb.run_for(100_000);
    assert!(r < 0);
    assert_eq!(gb.get_registers().pc, 0x102);
}

#[test]
fn step_over_treats_a_call_as_one_step() {
    // 0x100: CALL 0x110 ; INC A ; JR -6
    // 0x110: INC B x3 ; RET
    let mut code = vec![0xCD, 0x10, 0x01, 0x3C, 0x18, 0xFA];
    code.resize(0x10, 0x00);
    code.extend([0x04, 0x04, 0x04, 0xC9]);
    let mut gb = gb_with(&code);

    gb.step_over();
    assert!(gb.run_for(1_000_000) < 0);
    // The whole routine ran, but control stopped at the call site.
    assert_eq!(gb.get_registers().pc, 0x103);
    assert_eq!(gb.get_registers().b, 3);

    gb.step_in();
    assert!(gb.run_for(1_000_000) < 0);
    assert_eq!(gb.get_registers().pc, 0x104);
}

#[test]
fn step_out_finishes_the_current_routine() {
    // 0x100: CALL 0x110 ; NOP...
    // 0x110: INC C ; INC C ; RET
    let mut code = vec![0xCD, 0x10, 0x01, 0x00, 0x00];
    code.resize(0x10, 0x00);
    code.extend([0x0C, 0x0C, 0xC9]);
    let mut gb = gb_with(&code);

    gb.step_in();
    gb.run_for(1_000_000);
    assert_eq!(gb.get_registers().pc, 0x110);

    gb.step_out();
    assert!(gb.run_for(1_000_000) < 0);
    assert_eq!(gb.get_registers().pc, 0x103);
    assert_eq!(gb.get_registers().c, 0x15); // post-boot C=0x13 plus two INCs
}

#[test]
fn end_conditions_disarm_after_firing() {
    let mut gb = gb_with(&[0x00, 0x00, 0x00, 0x18, 0xFE]);
    gb.step_in();
    assert!(gb.run_for(1_000_000) < 0);
    // Without re-arming, the run consumes its whole budget.
    assert!(gb.run_for(10_000) >= 0);
}

#[test]
fn writes_through_the_debugger_change_program_behavior() {
    // LD A,(0xC000) ; JR -5 — patch the loaded value mid-run.
    let mut gb = gb_with(&[0xFA, 0x00, 0xC0, 0x18, 0xFB]);
    gb.gb_write_byte(0xC000, 0x5A);
    gb.step_in();
    gb.run_for(1_000_000);
    assert_eq!(gb.get_registers().a, 0x5A);
}

#[test]
fn reset_restores_the_power_on_state() {
    let mut gb = gb_with(&[0x3C, 0x18, 0xFD]);
    gb.run_for(100_000);
    assert_ne!(gb.get_registers().a, 0x01);
    gb.reset();
    assert_eq!(gb.get_registers().a, 0x01);
    assert_eq!(gb.get_registers().pc, 0x100);
}

#[test]
fn title_comes_from_the_header() {
    let gb = gb_with(&[0x18, 0xFE]);
    assert_eq!(gb.title(), "TEST");
}
