use crate::DISABLED_TIME;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

pub const LINE_CYCLES: u64 = 456;
pub const FRAME_LINES: u64 = 154;
pub const FRAME_CYCLES: u64 = FRAME_LINES * LINE_CYCLES;

/// Line position at which mode 3 begins on a visible line.
const M3_START: u64 = 80;
/// Line position at which mode 0 (H-blank) begins on a visible line.
const M0_START: u64 = 252;

const VBLANK_IRQ: u8 = 0x01;
const STAT_IRQ: u8 = 0x02;

/// DMG shades, lightest to darkest, as 0xAARRGGBB.
const SHADES: [u32; 4] = [0xFFFF_FFFF, 0xFFAA_AAAA, 0xFF55_5555, 0xFF00_0000];

/// Video controller.
///
/// Sequencing is reconstructed from `video_cycles`, the position within the
/// 154-line frame at `last_update`. Catch-up walks the elapsed span boundary
/// by boundary (mode 3 start, H-blank start, line start), so every
/// IRQ-raising edge is visited at its exact cycle, and renders each visible
/// line when it enters H-blank. The controller never ticks on its own; the
/// bus catches it up before register access and whenever the clock crosses
/// the next boundary stamp.
pub struct Video {
    pub lcdc: u8,
    /// STAT interrupt-enable bits only (bits 3-6); mode and coincidence are
    /// derived on read.
    pub stat: u8,
    pub scy: u8,
    pub scx: u8,
    pub lyc: u8,
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
    pub wy: u8,
    pub wx: u8,
    /// Position within the frame, `0..FRAME_CYCLES`. Valid at `last_update`.
    pub video_cycles: u64,
    pub last_update: u64,
    /// Next window source line; advances only on lines the window covered.
    pub window_line: u8,
    /// H-blanks entered since the last `take_pending_hblanks`, for HDMA.
    pending_hblanks: u8,
    frame: Vec<u32>,
    frame_done: bool,
}

impl Video {
    pub fn new() -> Self {
        Self {
            lcdc: 0,
            stat: 0,
            scy: 0,
            scx: 0,
            lyc: 0,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            video_cycles: 0,
            last_update: 0,
            window_line: 0,
            pending_hblanks: 0,
            frame: vec![SHADES[0]; SCREEN_WIDTH * SCREEN_HEIGHT],
            frame_done: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    pub fn ly(&self) -> u8 {
        (self.video_cycles / LINE_CYCLES) as u8
    }

    /// Current STAT mode number. Valid after catch-up.
    pub fn mode(&self) -> u8 {
        if !self.enabled() {
            return 0;
        }
        if self.ly() >= SCREEN_HEIGHT as u8 {
            return 1;
        }
        match self.video_cycles % LINE_CYCLES {
            pos if pos < M3_START => 2,
            pos if pos < M0_START => 3,
            _ => 0,
        }
    }

    /// Bring the frame position up to `cc`, visiting every boundary crossed.
    pub fn update(&mut self, cc: u64, vram: &[u8], if_flags: &mut u8) {
        debug_assert!(cc >= self.last_update);
        if !self.enabled() {
            self.last_update = cc;
            return;
        }

        let mut remaining = cc - self.last_update;
        self.last_update = cc;
        while remaining > 0 {
            let line = self.video_cycles / LINE_CYCLES;
            let pos = self.video_cycles % LINE_CYCLES;
            let next = if line >= SCREEN_HEIGHT as u64 {
                LINE_CYCLES
            } else if pos < M3_START {
                M3_START
            } else if pos < M0_START {
                M0_START
            } else {
                LINE_CYCLES
            };

            let step = remaining.min(next - pos);
            self.video_cycles += step;
            remaining -= step;
            if pos + step == next {
                self.boundary_event(next, line, vram, if_flags);
            }
        }
    }

    fn boundary_event(&mut self, boundary: u64, line: u64, vram: &[u8], if_flags: &mut u8) {
        match boundary {
            M3_START => {}
            M0_START => {
                self.render_line(line as usize, vram);
                self.pending_hblanks += 1;
                if self.stat & 0x08 != 0 {
                    *if_flags |= STAT_IRQ;
                }
            }
            _ => {
                // Line boundary.
                if self.video_cycles == FRAME_CYCLES {
                    self.video_cycles = 0;
                    self.window_line = 0;
                }
                let new_line = self.video_cycles / LINE_CYCLES;
                if new_line == SCREEN_HEIGHT as u64 {
                    *if_flags |= VBLANK_IRQ;
                    self.frame_done = true;
                    if self.stat & 0x10 != 0 {
                        *if_flags |= STAT_IRQ;
                    }
                } else if new_line < SCREEN_HEIGHT as u64 && self.stat & 0x20 != 0 {
                    *if_flags |= STAT_IRQ;
                }
                if new_line as u8 == self.lyc && self.stat & 0x40 != 0 {
                    *if_flags |= STAT_IRQ;
                }
            }
        }
    }

    /// Absolute cycle of the next mode/line boundary, or `DISABLED_TIME`
    /// with the LCD off. Every IRQ-raising edge lies on a boundary, so this
    /// bounds the next moment the controller can raise IF bits.
    pub fn next_irq_time(&self) -> u64 {
        if !self.enabled() {
            return DISABLED_TIME;
        }
        let line = self.video_cycles / LINE_CYCLES;
        let pos = self.video_cycles % LINE_CYCLES;
        let next = if line >= SCREEN_HEIGHT as u64 {
            LINE_CYCLES
        } else if pos < M3_START {
            M3_START
        } else if pos < M0_START {
            M0_START
        } else {
            LINE_CYCLES
        };
        self.last_update + (next - pos)
    }

    /// Register read. The caller has already caught the controller up.
    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                let coincidence = if self.enabled() && self.ly() == self.lyc { 0x04 } else { 0 };
                0x80 | self.stat | coincidence | self.mode()
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => {
                if self.enabled() { self.ly() } else { 0 }
            }
            0xFF45 => self.lyc,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            _ => 0xFF,
        }
    }

    /// Register write. The caller has already caught the controller up to
    /// `cc`.
    pub fn write(&mut self, addr: u16, cc: u64, val: u8) {
        match addr {
            0xFF40 => {
                let was_on = self.enabled();
                self.lcdc = val;
                if was_on != self.enabled() {
                    // Enabling or disabling restarts the frame clock from
                    // line 0, position 0.
                    self.video_cycles = 0;
                    self.window_line = 0;
                    self.last_update = cc;
                }
            }
            0xFF41 => self.stat = val & 0x78,
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF45 => self.lyc = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            _ => {}
        }
    }

    /// H-blanks entered since the last call. Drained by the HDMA engine.
    pub fn take_pending_hblanks(&mut self) -> u8 {
        std::mem::take(&mut self.pending_hblanks)
    }

    /// Whether a frame completed since the last call.
    pub fn take_frame_done(&mut self) -> bool {
        std::mem::take(&mut self.frame_done)
    }

    /// Copy the last completed frame into `buf` with `pitch` pixels per row.
    pub fn draw_frame(&self, buf: &mut [u32], pitch: usize) {
        for y in 0..SCREEN_HEIGHT {
            let src = &self.frame[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH];
            buf[y * pitch..y * pitch + SCREEN_WIDTH].copy_from_slice(src);
        }
    }

    fn tile_data_addr(&self, tile: u8) -> usize {
        if self.lcdc & 0x10 != 0 {
            tile as usize * 16
        } else {
            (0x1000_i32 + (tile as i8 as i32) * 16) as usize
        }
    }

    /// Background + window scanline, 2bpp tiles through BGP. Sprites are a
    /// frontend concern and are not drawn here.
    fn render_line(&mut self, y: usize, vram: &[u8]) {
        let mut row = [0u8; SCREEN_WIDTH];

        if self.lcdc & 0x01 != 0 {
            let map = if self.lcdc & 0x08 != 0 { 0x1C00 } else { 0x1800 };
            let bg_y = (y as u8).wrapping_add(self.scy) as usize;
            for (x, out) in row.iter_mut().enumerate() {
                let bg_x = (x as u8).wrapping_add(self.scx) as usize;
                let tile = vram[map + bg_y / 8 * 32 + bg_x / 8];
                let addr = self.tile_data_addr(tile) + bg_y % 8 * 2;
                let bit = 7 - bg_x % 8;
                *out = (vram[addr + 1] >> bit & 1) << 1 | (vram[addr] >> bit & 1);
            }
        }

        if self.lcdc & 0x21 == 0x21 && self.wy as usize <= y && self.wx <= 166 {
            let map = if self.lcdc & 0x40 != 0 { 0x1C00 } else { 0x1800 };
            let win_y = self.window_line as usize;
            let origin = self.wx as i32 - 7;
            let mut covered = false;
            for (x, out) in row.iter_mut().enumerate().skip(origin.max(0) as usize) {
                let win_x = (x as i32 - origin) as usize;
                let tile = vram[map + win_y / 8 * 32 + win_x / 8];
                let addr = self.tile_data_addr(tile) + win_y % 8 * 2;
                let bit = 7 - win_x % 8;
                *out = (vram[addr + 1] >> bit & 1) << 1 | (vram[addr] >> bit & 1);
                covered = true;
            }
            if covered {
                self.window_line += 1;
            }
        }

        for (x, &color) in row.iter().enumerate() {
            let shade = self.bgp >> (color * 2) & 0x03;
            self.frame[y * SCREEN_WIDTH + x] = SHADES[shade as usize];
        }
    }
}

impl Default for Video {
    fn default() -> Self {
        Self::new()
    }
}
