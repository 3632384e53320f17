//! Cycle-stamped Game Boy emulation core.
//!
//! This crate contains the platform-agnostic engine: a CPU interpreter that
//! owns the single monotonic cycle counter, a memory bus that catches each
//! timing-sensitive peripheral up to the current cycle only when it is
//! touched (or when the clock crosses a scheduled event), and a versioned
//! save-state model and codec that can capture and resume the whole machine
//! bit-exactly. Frontends drive the engine through the [`gameboy`] facade
//! and introspect it through the [`debugger`] surface.

/// Optional boot image mapped over low ROM before cartridge execution.
pub mod bootrom;

/// Program image: ROM/RAM buffers and header metadata.
pub mod cartridge;

/// LR35902 CPU core, cycle clock, and run-control state machine.
pub mod cpu;

/// Debug facade: byte peek/poke, stepping, register access.
pub mod debugger;

/// High-level facade that wires the CPU and memory bus into a single machine.
pub mod gameboy;

/// Memory bus with lazy per-peripheral catch-up and DMA engines.
pub mod memory;

/// Real-time clock (wall-clock anchored, halt-aware).
pub mod rtc;

/// Snapshot model: flat aggregate of all resumable state.
pub mod savestate;

/// Serial unit with a scheduled completion stamp and link-port plumbing.
pub mod serial;

/// Four-channel audio unit with per-unit event counters.
pub mod sound;

/// Versioned, labeled binary save-state codec.
pub mod statesaver;

/// Divider/timer unit.
pub mod timer;

/// Video controller: frame position, STAT/VBlank scheduling, scanline blit.
pub mod video;

pub use cpu::{CpuRegisters, EndCondition};
pub use gameboy::GameBoy;
pub use video::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Stamp value meaning "no event scheduled".
pub(crate) const DISABLED_TIME: u64 = u64::MAX;
