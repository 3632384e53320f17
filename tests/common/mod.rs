use lazyboy_core::GameBoy;
use once_cell::sync::Lazy;

/// A minimal MBC3+RAM+battery header wrapped around `code` placed at the
/// entry point.
pub fn build_rom(code: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x134..0x138].copy_from_slice(b"TEST");
    rom[0x147] = 0x13;
    rom[0x149] = 0x03;
    rom[0x100..0x100 + code.len()].copy_from_slice(code);
    rom
}

/// A loaded machine executing `code` from the entry point.
pub fn gb_with(code: &[u8]) -> GameBoy {
    let mut gb = GameBoy::new();
    gb.load_bytes(build_rom(code));
    gb
}

/// An endless-loop program used where the executed code does not matter.
pub static IDLE_LOOP: Lazy<Vec<u8>> = Lazy::new(|| build_rom(&[0x18, 0xFE]));
