use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
    bootrom::BootRom,
    cartridge::Cartridge,
    cpu::Cpu,
    savestate::SaveState,
    serial::LinkPort,
    statesaver,
    video::FRAME_CYCLES,
};

/// Post-boot IO register values, written through the bus during
/// initialization when no boot image is mapped. Order matters for the sound
/// registers: NR52 powers the unit on before the channel registers land.
const POWER_ON_IO: &[(u16, u8)] = &[
    (0xFF26, 0x80), // NR52
    (0xFF10, 0x80),
    (0xFF11, 0xBF),
    (0xFF12, 0xF3),
    (0xFF14, 0x38),
    (0xFF16, 0x3F),
    (0xFF19, 0x38),
    (0xFF1A, 0x7F),
    (0xFF1B, 0xFF),
    (0xFF1C, 0x9F),
    (0xFF1E, 0x38),
    (0xFF20, 0xFF),
    (0xFF23, 0x38),
    (0xFF24, 0x77),
    (0xFF25, 0xF3),
    (0xFF40, 0x91), // LCDC
    (0xFF42, 0x00),
    (0xFF43, 0x00),
    (0xFF45, 0x00),
    (0xFF47, 0xFC), // BGP
    (0xFF48, 0xFF),
    (0xFF49, 0xFF),
    (0xFF4A, 0x00),
    (0xFF4B, 0x00),
];

/// The public driver: owns the engine, loads images, runs frames, and
/// manages numbered save-state slots.
pub struct GameBoy {
    cpu: Cpu,
    state: SaveState,
    state_base: Option<PathBuf>,
    state_slot: usize,
}

impl GameBoy {
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            state: SaveState::default(),
            state_base: None,
            state_slot: 0,
        }
    }

    /// Load a program image from a file. Numbered state slots are derived
    /// from the image path.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let cart = Cartridge::from_file(&path)?;
        self.state_base = Some(path.as_ref().with_extension(""));
        self.install(cart);
        Ok(())
    }

    /// Load a program image from memory. State slots stay unavailable
    /// until a base path exists.
    pub fn load_bytes(&mut self, data: Vec<u8>) {
        self.state_base = None;
        self.install(Cartridge::from_bytes(data));
    }

    fn install(&mut self, cart: Cartridge) {
        let bootrom = std::mem::replace(&mut self.cpu.mem.bootrom, BootRom::None);
        self.cpu = Cpu::new();
        self.cpu.mem.bootrom = bootrom;
        self.cpu.mem.set_cartridge(cart);
        self.state = SaveState::default();
        self.cpu.set_state_ptrs(&mut self.state);
        self.init_state();
    }

    /// Restart the loaded program from its power-on state.
    pub fn reset(&mut self) {
        if let Some(mut cart) = self.cpu.mem.cart.take() {
            cart.ram.fill(0);
            let bootrom = std::mem::replace(&mut self.cpu.mem.bootrom, BootRom::None);
            let bound = self.cpu.state_bound;
            self.cpu = Cpu::new();
            self.cpu.state_bound = bound;
            self.cpu.mem.bootrom = bootrom;
            self.cpu.mem.set_cartridge(cart);
            self.init_state();
        }
    }

    /// Registers and memory as the boot sequence leaves them; with a boot
    /// image mapped, execution instead starts inside the image at zero.
    fn init_state(&mut self) {
        if self.cpu.mem.bootrom.is_some() {
            self.cpu.mem.boot_mapped = true;
            return;
        }
        let cgb = self.cpu.mem.cgb();
        self.cpu.regs.a = if cgb { 0x11 } else { 0x01 };
        self.cpu.regs.f = 0xB0;
        self.cpu.regs.b = 0x00;
        self.cpu.regs.c = 0x13;
        self.cpu.regs.d = 0x00;
        self.cpu.regs.e = 0xD8;
        self.cpu.regs.h = 0x01;
        self.cpu.regs.l = 0x4D;
        self.cpu.regs.sp = 0xFFFE;
        self.cpu.regs.pc = 0x0100;
        for &(addr, val) in POWER_ON_IO {
            self.cpu.mem.write(addr, 0, val);
        }
    }

    /// Attach a DMG boot image. Returns false (with the feature left
    /// disabled) when the file is missing or too small.
    pub fn set_dmg_boot_rom<P: AsRef<Path>>(&mut self, path: P) -> bool {
        match BootRom::load_dmg(path) {
            Ok(boot) => {
                self.cpu.mem.bootrom = boot;
                true
            }
            Err(err) => {
                warn!("boot image rejected: {err}");
                false
            }
        }
    }

    pub fn set_cgb_boot_rom<P: AsRef<Path>>(&mut self, path: P) -> bool {
        match BootRom::load_cgb(path) {
            Ok(boot) => {
                self.cpu.mem.bootrom = boot;
                true
            }
            Err(err) => {
                warn!("boot image rejected: {err}");
                false
            }
        }
    }

    pub fn loaded(&self) -> bool {
        self.cpu.mem.loaded()
    }

    pub fn title(&self) -> &str {
        self.cpu.mem.cart.as_ref().map_or("", |c| &c.title)
    }

    /// Advance the machine by `cycles`. See [`Cpu::run_for`] for the
    /// return-value contract.
    pub fn run_for(&mut self, cycles: u64) -> i64 {
        self.cpu.run_for(cycles)
    }

    /// Run one frame's worth of cycles. A completed frame is blitted into
    /// `video` (row stride `pitch` pixels) and generated audio is drained
    /// into `audio`. Returns the run result and the sample count written.
    pub fn run_frame(
        &mut self,
        video: &mut [u32],
        pitch: usize,
        audio: &mut [u32],
    ) -> (i64, usize) {
        let r = self.cpu.run_for(FRAME_CYCLES);
        if r < 0 && !self.loaded() {
            return (r, 0);
        }
        self.cpu.mem.sound.generate_samples(self.cpu.cycle_counter);
        let samples = self.cpu.mem.sound.fill_sound_buffer(audio);
        if self.cpu.mem.video.take_frame_done() {
            self.cpu.mem.video.draw_frame(video, pitch);
        }
        (r, samples)
    }

    /// Current raw button state, 1 = pressed: bits 0-3 right/left/up/down,
    /// bits 4-7 A/B/Select/Start.
    pub fn set_input(&mut self, buttons: u8) {
        self.cpu.mem.input_state = buttons;
    }

    pub fn connect_link_port(&mut self, port: Box<dyn LinkPort + Send>) {
        self.cpu.mem.serial.connect(port);
    }

    /// Select the numbered state slot used by `save_state`/`load_state`.
    pub fn select_state(&mut self, slot: usize) {
        self.state_slot = slot % 10;
    }

    pub fn current_state(&self) -> usize {
        self.state_slot
    }

    fn state_path(&self) -> Option<PathBuf> {
        let base = self.state_base.as_ref()?;
        let mut name = base.file_name()?.to_os_string();
        name.push(format!("_{}.gqs", self.state_slot));
        Some(base.with_file_name(name))
    }

    /// Save the machine into the selected state slot.
    pub fn save_state(&mut self) -> bool {
        match self.state_path() {
            Some(path) => self.save_state_to(path),
            None => false,
        }
    }

    /// Load the machine from the selected state slot.
    pub fn load_state(&mut self) -> bool {
        match self.state_path() {
            Some(path) => self.load_state_from(path),
            None => false,
        }
    }

    pub fn save_state_to<P: AsRef<Path>>(&mut self, path: P) -> bool {
        if !self.loaded() {
            return false;
        }
        self.cpu.save_state(&mut self.state);
        let preview = self.preview_pixels();
        let bytes = statesaver::save_state_to_vec(&self.state, Some(&preview));
        match fs::write(&path, bytes) {
            Ok(()) => {
                info!("state saved to {}", path.as_ref().display());
                true
            }
            Err(err) => {
                warn!("state save failed: {err}");
                false
            }
        }
    }

    /// Live state is untouched unless the whole stream decodes.
    pub fn load_state_from<P: AsRef<Path>>(&mut self, path: P) -> bool {
        if !self.loaded() {
            return false;
        }
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) => {
                warn!("state load failed: {err}");
                return false;
            }
        };
        let mut scratch = self.state.clone();
        if !statesaver::load_state_from_slice(&mut scratch, &data) {
            warn!("state load failed: malformed stream");
            return false;
        }
        self.cpu.load_state(&scratch);
        self.state = scratch;
        true
    }

    fn preview_pixels(&self) -> Vec<u8> {
        use crate::video::{SCREEN_HEIGHT, SCREEN_WIDTH};
        let mut frame = vec![0u32; SCREEN_WIDTH * SCREEN_HEIGHT];
        self.cpu.mem.video.draw_frame(&mut frame, SCREEN_WIDTH);
        let mut out = Vec::with_capacity(frame.len() * 4);
        for px in frame {
            out.extend(px.to_be_bytes());
        }
        out
    }

    pub(crate) fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub(crate) fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x134..0x138].copy_from_slice(b"SLOT");
        rom
    }

    #[test]
    fn run_without_a_rom_returns_the_sentinel() {
        let mut gb = GameBoy::new();
        assert_eq!(gb.run_for(1000), -1);
    }

    #[test]
    fn post_boot_registers_match_the_documented_values() {
        let mut gb = GameBoy::new();
        gb.load_bytes(test_rom());
        let cpu = gb.cpu();
        assert_eq!(cpu.regs.a, 0x01);
        assert_eq!(cpu.regs.pc, 0x0100);
        assert_eq!(cpu.regs.sp, 0xFFFE);
    }

    #[test]
    fn state_slot_paths_are_numbered() {
        let mut gb = GameBoy::new();
        let dir = tempfile::tempdir().unwrap();
        let rom_path = dir.path().join("game.gb");
        fs::write(&rom_path, test_rom()).unwrap();
        gb.load(&rom_path).unwrap();
        assert_eq!(gb.state_path().unwrap(), dir.path().join("game_0.gqs"));
        gb.select_state(3);
        assert_eq!(gb.state_path().unwrap(), dir.path().join("game_3.gqs"));
        gb.select_state(12);
        assert_eq!(gb.current_state(), 2);
    }

    #[test]
    fn state_slot_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let rom_path = dir.path().join("game.gb");
        fs::write(&rom_path, test_rom()).unwrap();
        let mut gb = GameBoy::new();
        gb.load(&rom_path).unwrap();
        gb.run_for(10_000);
        let pc = gb.cpu().regs.pc;
        assert!(gb.save_state());
        gb.run_for(50_000);
        assert!(gb.load_state());
        assert_eq!(gb.cpu().regs.pc, pc);
    }

    #[test]
    fn loading_a_missing_slot_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let rom_path = dir.path().join("game.gb");
        fs::write(&rom_path, test_rom()).unwrap();
        let mut gb = GameBoy::new();
        gb.load(&rom_path).unwrap();
        gb.run_for(5_000);
        let pc = gb.cpu().regs.pc;
        assert!(!gb.load_state());
        assert_eq!(gb.cpu().regs.pc, pc);
    }
}
