use crate::{
    DISABLED_TIME,
    bootrom::BootRom,
    cartridge::Cartridge,
    rtc::{self, Rtc},
    serial::Serial,
    sound::Sound,
    timer::Timer,
    video::Video,
};

const OAM_DMA_LEN: u16 = 0xA0;
/// Cycles per byte moved by OAM DMA.
const OAM_DMA_BYTE_CYCLES: u64 = 4;
/// Cycles between the FF46 write and the first byte.
const OAM_DMA_STARTUP: u64 = 8;

/// The memory bus.
///
/// Every `read`/`write` carries the current cycle count. The touched
/// peripheral is caught up to that cycle before the access is serviced, and
/// configuration writes reschedule its next-due stamp, so peripherals are
/// exact exactly when observed and otherwise dormant. `next_event_time`
/// gives the CPU loop the earliest stamp at which a dormant peripheral
/// needs a proactive catch-up (to raise an interrupt or feed HDMA).
pub struct Memory {
    pub cart: Option<Cartridge>,
    pub bootrom: BootRom,
    pub boot_mapped: bool,

    pub vram: Vec<u8>,
    pub wram: Vec<u8>,
    /// 0xFE00-0xFFFF: OAM, unusable region, IO registers, HRAM, IE.
    pub ioamhram: [u8; 0x200],
    pub if_flags: u8,

    // Bank registers, decoded generically across controller variants.
    pub rombank: u16,
    pub rambank: u8,
    pub ram_enabled: bool,
    pub bank_mode: u8,
    pub vrambank: u8,
    pub wrambank: u8,

    // OAM DMA engine.
    pub oam_dma_src: u16,
    pub oam_dma_pos: u16,
    pub last_oam_dma_update: u64,

    // CGB HDMA/GDMA engine.
    pub dma_src: u16,
    pub dma_dst: u16,
    pub hdma5: u8,
    pub hdma_active: bool,

    pub key1: u8,
    pub joyp: u8,
    /// Raw button state, 1 = pressed: bits 0-3 right/left/up/down,
    /// 4-7 A/B/Select/Start.
    pub input_state: u8,

    pub timer: Timer,
    pub serial: Serial,
    pub video: Video,
    pub sound: Sound,
    pub rtc: Option<Rtc>,

    /// GDMA stall cycles owed to the CPU, drained once per instruction.
    dma_stall: u64,
    cgb: bool,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            cart: None,
            bootrom: BootRom::None,
            boot_mapped: false,
            vram: vec![0; 0x2000],
            wram: vec![0; 0x2000],
            ioamhram: [0; 0x200],
            if_flags: 0,
            rombank: 1,
            rambank: 0,
            ram_enabled: false,
            bank_mode: 0,
            vrambank: 0,
            wrambank: 1,
            oam_dma_src: 0,
            oam_dma_pos: OAM_DMA_LEN,
            last_oam_dma_update: 0,
            dma_src: 0,
            dma_dst: 0,
            hdma5: 0xFF,
            hdma_active: false,
            key1: 0,
            joyp: 0x30,
            input_state: 0,
            timer: Timer::new(),
            serial: Serial::new(false),
            video: Video::new(),
            sound: Sound::new(),
            rtc: None,
            dma_stall: 0,
            cgb: false,
        }
    }

    pub fn set_cartridge(&mut self, cart: Cartridge) {
        self.cgb = cart.cgb;
        self.vram = vec![0; if cart.cgb { 0x4000 } else { 0x2000 }];
        self.wram = vec![0; if cart.cgb { 0x8000 } else { 0x2000 }];
        self.serial = Serial::new(cart.cgb);
        self.rtc = cart.has_rtc.then(|| Rtc::new(rtc::wall_seconds()));
        self.cart = Some(cart);
    }

    pub fn loaded(&self) -> bool {
        self.cart.is_some()
    }

    pub fn cgb(&self) -> bool {
        self.cgb
    }

    pub fn ie(&self) -> u8 {
        self.ioamhram[0x1FF]
    }

    /// IE & IF, after catching up every IRQ source to `cc`.
    pub fn pending_irqs(&mut self, cc: u64) -> u8 {
        self.update_irqs(cc);
        self.ie() & self.if_flags & 0x1F
    }

    pub fn ack_irq(&mut self, bit: u8) {
        self.if_flags &= !bit;
    }

    pub fn request_irq(&mut self, bit: u8) {
        self.if_flags |= bit;
    }

    /// Earliest cycle at which a dormant peripheral must be caught up.
    pub fn next_event_time(&self) -> u64 {
        let mut next = self.timer.next_irq_time().min(self.serial.next_irq_time());
        next = next.min(self.video.next_irq_time());
        next
    }

    /// Proactive catch-up of every stamp-driven peripheral, raising IF bits
    /// and feeding HDMA for any H-blank lines the clock crossed.
    pub fn update_irqs(&mut self, cc: u64) {
        self.timer.update(cc, &mut self.if_flags);
        self.serial.update(cc, &mut self.if_flags);
        self.video.update(cc, &self.vram, &mut self.if_flags);
        let hblanks = self.video.take_pending_hblanks();
        if self.hdma_active {
            for _ in 0..hblanks {
                self.hdma_copy_block();
                if !self.hdma_active {
                    break;
                }
            }
        }
    }

    /// Stall cycles accumulated by GDMA since the last call.
    pub fn take_dma_stall(&mut self) -> u64 {
        std::mem::take(&mut self.dma_stall)
    }

    fn update_oam_dma(&mut self, cc: u64) {
        if self.oam_dma_pos >= OAM_DMA_LEN || cc < self.last_oam_dma_update {
            return;
        }
        let bytes = (cc - self.last_oam_dma_update) / OAM_DMA_BYTE_CYCLES;
        let n = bytes.min((OAM_DMA_LEN - self.oam_dma_pos) as u64) as u16;
        for _ in 0..n {
            let b = self.dma_read(self.oam_dma_src + self.oam_dma_pos);
            self.ioamhram[self.oam_dma_pos as usize] = b;
            self.oam_dma_pos += 1;
        }
        self.last_oam_dma_update += n as u64 * OAM_DMA_BYTE_CYCLES;
    }

    /// Valid after `update_oam_dma` has run for the current cycle.
    pub fn oam_dma_active(&self) -> bool {
        self.oam_dma_pos < OAM_DMA_LEN
    }

    /// Raw read used by the DMA engines; never blocked, never recursive.
    fn dma_read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.read_rom(addr),
            0x8000..=0x9FFF => self.vram[self.vram_index(addr)],
            0xA000..=0xBFFF => self.read_sram(addr),
            0xC000..=0xFDFF => self.wram[self.wram_index(addr)],
            _ => 0xFF,
        }
    }

    fn hdma_copy_block(&mut self) {
        for _ in 0..16 {
            let b = self.dma_read(self.dma_src);
            let dst = 0x8000 | (self.dma_dst & 0x1FFF);
            let idx = self.vram_index(dst);
            self.vram[idx] = b;
            self.dma_src = self.dma_src.wrapping_add(1);
            self.dma_dst = self.dma_dst.wrapping_add(1);
        }
        self.hdma5 = self.hdma5.wrapping_sub(1);
        if self.hdma5 == 0xFF {
            self.hdma_active = false;
        }
    }

    fn vram_index(&self, addr: u16) -> usize {
        (addr as usize & 0x1FFF) + self.vrambank as usize * 0x2000
    }

    fn wram_index(&self, addr: u16) -> usize {
        let rel = addr as usize & 0x1FFF;
        if rel < 0x1000 || !self.cgb {
            rel
        } else {
            (rel & 0x0FFF) + self.wrambank.max(1) as usize * 0x1000
        }
    }

    fn read_rom(&self, addr: u16) -> u8 {
        if self.boot_mapped && self.bootrom.maps(addr) {
            return self.bootrom.read(addr);
        }
        let Some(cart) = &self.cart else { return 0xFF };
        let index = if addr < 0x4000 {
            addr as usize
        } else {
            (addr as usize & 0x3FFF) + self.rombank as usize * 0x4000
        };
        cart.rom.get(index % cart.rom.len().max(1)).copied().unwrap_or(0xFF)
    }

    fn read_sram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }
        if self.rambank >= 0x08 {
            return match &self.rtc {
                Some(rtc) => rtc.read(self.rambank),
                None => 0xFF,
            };
        }
        let Some(cart) = &self.cart else { return 0xFF };
        let index = (addr as usize & 0x1FFF) + self.rambank as usize * 0x2000;
        cart.ram.get(index).copied().unwrap_or(0xFF)
    }

    fn write_sram(&mut self, addr: u16, val: u8) {
        if !self.ram_enabled {
            return;
        }
        if self.rambank >= 0x08 {
            if let Some(rtc) = &mut self.rtc {
                rtc.write(self.rambank, val, rtc::wall_seconds());
            }
            return;
        }
        let bank = self.rambank as usize;
        if let Some(cart) = &mut self.cart {
            let index = (addr as usize & 0x1FFF) + bank * 0x2000;
            if let Some(slot) = cart.ram.get_mut(index) {
                *slot = val;
            }
        }
    }

    pub fn read(&mut self, addr: u16, cc: u64) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.read_rom(addr),
            0x8000..=0x9FFF => {
                self.video.update(cc, &self.vram, &mut self.if_flags);
                if self.video.mode() == 3 {
                    0xFF
                } else {
                    self.vram[self.vram_index(addr)]
                }
            }
            0xA000..=0xBFFF => self.read_sram(addr),
            0xC000..=0xFDFF => self.wram[self.wram_index(addr)],
            0xFE00..=0xFE9F => {
                self.update_oam_dma(cc);
                self.video.update(cc, &self.vram, &mut self.if_flags);
                if self.oam_dma_active() || self.video.mode() >= 2 {
                    0xFF
                } else {
                    self.ioamhram[(addr & 0x1FF) as usize]
                }
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00..=0xFFFF => self.read_io(addr, cc),
        }
    }

    pub fn write(&mut self, addr: u16, cc: u64, val: u8) {
        match addr {
            // Bank registers, decoded generically: enable, low bank, high
            // bank / RTC select, mode / latch.
            0x0000..=0x1FFF => self.ram_enabled = val & 0x0F == 0x0A,
            0x2000..=0x3FFF => {
                self.rombank = if val == 0 { 1 } else { val as u16 };
            }
            0x4000..=0x5FFF => self.rambank = val & 0x0F,
            0x6000..=0x7FFF => {
                if let Some(rtc) = &mut self.rtc {
                    rtc.latch(val, rtc::wall_seconds());
                } else {
                    self.bank_mode = val & 0x01;
                }
            }
            0x8000..=0x9FFF => {
                self.video.update(cc, &self.vram, &mut self.if_flags);
                if self.video.mode() != 3 {
                    let idx = self.vram_index(addr);
                    self.vram[idx] = val;
                }
            }
            0xA000..=0xBFFF => self.write_sram(addr, val),
            0xC000..=0xFDFF => {
                let idx = self.wram_index(addr);
                self.wram[idx] = val;
            }
            0xFE00..=0xFE9F => {
                self.update_oam_dma(cc);
                self.video.update(cc, &self.vram, &mut self.if_flags);
                if !self.oam_dma_active() && self.video.mode() < 2 {
                    self.ioamhram[(addr & 0x1FF) as usize] = val;
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFFFF => self.write_io(addr, cc, val),
        }
    }

    fn read_io(&mut self, addr: u16, cc: u64) -> u8 {
        match addr {
            0xFF00 => self.read_joyp(),
            0xFF01 | 0xFF02 => self.serial.read(addr, cc, &mut self.if_flags),
            0xFF04..=0xFF07 => self.timer.read(addr, cc, &mut self.if_flags),
            0xFF0F => {
                self.update_irqs(cc);
                0xE0 | self.if_flags
            }
            0xFF10..=0xFF3F => self.sound.read(addr, cc),
            0xFF46 => self.ioamhram[0x146],
            0xFF40..=0xFF4B => {
                self.video.update(cc, &self.vram, &mut self.if_flags);
                self.video.read(addr)
            }
            0xFF4D if self.cgb => 0x7E | self.key1,
            0xFF4F if self.cgb => 0xFE | self.vrambank,
            0xFF51..=0xFF54 if self.cgb => 0xFF,
            0xFF55 if self.cgb => {
                if self.hdma_active {
                    self.hdma5
                } else {
                    0x80 | self.hdma5
                }
            }
            0xFF70 if self.cgb => 0xF8 | self.wrambank,
            _ => self.ioamhram[(addr & 0x1FF) as usize],
        }
    }

    fn write_io(&mut self, addr: u16, cc: u64, val: u8) {
        match addr {
            0xFF00 => self.joyp = val & 0x30,
            0xFF01 | 0xFF02 => self.serial.write(addr, cc, val, &mut self.if_flags),
            0xFF04..=0xFF07 => self.timer.write(addr, cc, val, &mut self.if_flags),
            0xFF0F => {
                self.update_irqs(cc);
                self.if_flags = val & 0x1F;
            }
            0xFF10..=0xFF3F => self.sound.write(addr, cc, val),
            0xFF46 => {
                self.update_oam_dma(cc);
                self.ioamhram[0x146] = val;
                self.oam_dma_src = (val as u16) << 8;
                self.oam_dma_pos = 0;
                self.last_oam_dma_update = cc + OAM_DMA_STARTUP;
            }
            0xFF40..=0xFF4B => {
                self.video.update(cc, &self.vram, &mut self.if_flags);
                self.video.write(addr, cc, val);
            }
            0xFF4D if self.cgb => self.key1 = (self.key1 & 0x80) | (val & 0x01),
            0xFF4F if self.cgb => self.vrambank = val & 0x01,
            0xFF50 => {
                if self.boot_mapped && val & 0x01 != 0 {
                    self.boot_mapped = false;
                }
            }
            0xFF51 if self.cgb => self.dma_src = (self.dma_src & 0x00FF) | ((val as u16) << 8),
            0xFF52 if self.cgb => self.dma_src = (self.dma_src & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 if self.cgb => self.dma_dst = (self.dma_dst & 0x00FF) | ((val & 0x1F) as u16) << 8,
            0xFF54 if self.cgb => self.dma_dst = (self.dma_dst & 0xFF00) | (val & 0xF0) as u16,
            0xFF55 if self.cgb => self.write_hdma5(cc, val),
            0xFF70 if self.cgb => self.wrambank = (val & 0x07).max(1),
            _ => self.ioamhram[(addr & 0x1FF) as usize] = val,
        }
    }

    fn write_hdma5(&mut self, cc: u64, val: u8) {
        if self.hdma_active && val & 0x80 == 0 {
            // Cancel an in-flight H-blank transfer.
            self.hdma_active = false;
            return;
        }
        self.hdma5 = val & 0x7F;
        if val & 0x80 != 0 {
            self.hdma_active = true;
            self.video.update(cc, &self.vram, &mut self.if_flags);
        } else {
            // GDMA: copy everything now, stalling the CPU 8 cycles per
            // 16-byte block.
            let blocks = self.hdma5 as u64 + 1;
            while self.hdma5 != 0xFF {
                self.hdma_copy_block();
            }
            self.hdma_active = false;
            self.dma_stall += blocks * 8;
        }
    }

    fn read_joyp(&self) -> u8 {
        let mut low = 0x0F;
        if self.joyp & 0x10 == 0 {
            low &= !(self.input_state & 0x0F);
        }
        if self.joyp & 0x20 == 0 {
            low &= !(self.input_state >> 4);
        }
        0xC0 | self.joyp | low
    }

}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
