use crate::cpu::{Cpu, EndCondition};

/// Flat aggregate of everything needed to resume the machine bit-exactly.
///
/// Buffers are plain owned vectors, sized to the live engine's regions by
/// [`Cpu::set_state_ptrs`] exactly once per session. Cycle stamps are stored
/// relative to the saved cycle counter (ages for last-update stamps, delays
/// for next-due stamps) so the restored engine can rebase them onto its
/// masked counter; `0xFFFF_FFFF` marks a disabled next-due stamp.
///
/// Flags are stored as `u8` so every scalar field moves through the codec
/// the same way.
#[derive(Clone, Default)]
pub struct SaveState {
    // CPU.
    pub cc: u32,
    pub pc: u16,
    pub sp: u16,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: u8,
    pub h: u8,
    pub l: u8,
    pub ime: u8,
    pub halt: u8,
    pub skip: u8,

    // Memory regions. `ioamhram` doubles as the IO-register snapshot:
    // peripheral-readable registers are overlaid into it on save and
    // redistributed on load.
    pub vram: Vec<u8>,
    pub sram: Vec<u8>,
    pub wram: Vec<u8>,
    pub ioamhram: Vec<u8>,

    // Banking and DMA.
    pub rombank: u16,
    pub rambank: u8,
    pub sramon: u8,
    pub rambmod: u8,
    pub odmasrc: u16,
    pub odmapos: u16,
    /// Signed delay of the OAM DMA byte stamp relative to `cc`, as u32.
    pub lodmaup: u32,
    pub dmasrc: u16,
    pub dmadst: u16,
    pub hdma5: u8,
    pub hdma: u8,

    // Timer phase ages.
    pub ldivup: u32,
    pub ltimaup: u32,

    // Serial completion delay.
    pub serialt: u32,

    // Video position.
    pub vcycles: u32,
    pub winypos: u8,

    // Sound.
    pub spucntr: u32,
    pub sndon: u8,
    pub nr50: u8,
    pub nr51: u8,
    pub c1actv: u8,
    pub c1duty: u8,
    pub c1dutyp: u8,
    pub c1envt: u8,
    pub c1envv: u8,
    pub c1freq: u16,
    pub c1freqt: u32,
    pub c1len: u16,
    pub c1lenon: u8,
    pub c1nr10: u8,
    pub c1nr12: u8,
    pub c1swpen: u8,
    pub c1swpsh: u16,
    pub c1swpt: u8,
    pub c2actv: u8,
    pub c2duty: u8,
    pub c2dutyp: u8,
    pub c2envt: u8,
    pub c2envv: u8,
    pub c2freq: u16,
    pub c2freqt: u32,
    pub c2len: u16,
    pub c2lenon: u8,
    pub c2nr22: u8,
    pub c3actv: u8,
    pub c3dacon: u8,
    pub c3freq: u16,
    pub c3freqt: u32,
    pub c3len: u16,
    pub c3lenon: u8,
    pub c3lrt: u32,
    pub c3pos: u8,
    pub c3smpl: u8,
    pub c3vol: u8,
    pub waveram: Vec<u8>,
    pub c4actv: u8,
    pub c4envt: u8,
    pub c4envv: u8,
    pub c4freqt: u32,
    pub c4len: u16,
    pub c4lenon: u8,
    pub c4lfsr: u16,
    pub c4nr43: u8,

    // Real-time clock.
    pub rtcbase: u32,
    pub rtchalt: u32,
    pub rtcdh: u8,
    pub rtcdl: u8,
    pub rtch: u8,
    pub rtcm: u8,
    pub rtcs: u8,
    pub rtclld: u8,
}

const CC_MASK: u64 = 0x7FFF_FFFF;
const DISABLED_STAMP: u32 = 0xFFFF_FFFF;

fn age(cc: u64, stamp: u64) -> u32 {
    (cc - stamp) as u32
}

fn delay(cc: u64, stamp: u64) -> u32 {
    if stamp == crate::DISABLED_TIME {
        DISABLED_STAMP
    } else {
        (stamp - cc) as u32
    }
}

fn from_delay(cc: u64, delay: u32) -> u64 {
    if delay == DISABLED_STAMP {
        crate::DISABLED_TIME
    } else {
        cc + delay as u64
    }
}

impl Cpu {
    /// Size every snapshot buffer to the live engine's regions. Must run
    /// exactly once per session, before any save or load.
    pub fn set_state_ptrs(&mut self, state: &mut SaveState) {
        debug_assert!(!self.state_bound, "snapshot already bound this session");
        self.state_bound = true;
        state.vram = vec![0; self.mem.vram.len()];
        state.wram = vec![0; self.mem.wram.len()];
        state.ioamhram = vec![0; self.mem.ioamhram.len()];
        state.sram = vec![0; self.mem.cart.as_ref().map_or(0, |c| c.ram.len())];
        state.waveram = vec![0; 0x10];
    }

    /// Copy live state into the snapshot. Every lazy peripheral is caught
    /// up to the current cycle first so the snapshot is self-consistent.
    pub fn save_state(&mut self, state: &mut SaveState) {
        debug_assert!(self.state_bound, "snapshot not bound");
        let cc = self.cycle_counter;
        self.mem.update_irqs(cc);
        self.mem.sound.generate_samples(cc);

        state.cc = (cc & CC_MASK) as u32;
        state.pc = self.regs.pc;
        state.sp = self.regs.sp;
        state.a = self.regs.a;
        state.b = self.regs.b;
        state.c = self.regs.c;
        state.d = self.regs.d;
        state.e = self.regs.e;
        state.f = self.regs.f;
        state.h = self.regs.h;
        state.l = self.regs.l;
        state.ime = self.ime as u8;
        state.halt = self.halted as u8;
        state.skip = self.halt_bug as u8;

        state.vram.copy_from_slice(&self.mem.vram);
        state.wram.copy_from_slice(&self.mem.wram);
        state.ioamhram.copy_from_slice(&self.mem.ioamhram);
        if let Some(cart) = &self.mem.cart {
            state.sram.copy_from_slice(&cart.ram);
        }
        self.overlay_io(state);

        state.rombank = self.mem.rombank;
        state.rambank = self.mem.rambank;
        state.sramon = self.mem.ram_enabled as u8;
        state.rambmod = self.mem.bank_mode;
        state.odmasrc = self.mem.oam_dma_src;
        state.odmapos = self.mem.oam_dma_pos;
        state.lodmaup = (self.mem.last_oam_dma_update as i64 - cc as i64) as u32;
        state.dmasrc = self.mem.dma_src;
        state.dmadst = self.mem.dma_dst;
        state.hdma5 = self.mem.hdma5;
        state.hdma = self.mem.hdma_active as u8;

        state.ldivup = age(cc, self.mem.timer.div_last_update);
        state.ltimaup = age(cc, self.mem.timer.tima_last_update);
        state.serialt = delay(cc, self.mem.serial.next_serial_time);
        state.vcycles = self.mem.video.video_cycles as u32;
        state.winypos = self.mem.video.window_line;

        let snd = &self.mem.sound;
        state.spucntr = age(cc, snd.cycle_counter);
        state.sndon = snd.enabled as u8;
        state.nr50 = snd.nr50;
        state.nr51 = snd.nr51;

        state.c1actv = snd.ch1.active as u8;
        state.c1duty = snd.ch1.duty;
        state.c1dutyp = snd.ch1.duty_pos;
        state.c1envt = snd.ch1.envelope.timer;
        state.c1envv = snd.ch1.envelope.volume;
        state.c1freq = snd.ch1.frequency;
        state.c1freqt = snd.ch1.freq_timer;
        state.c1len = snd.ch1.length;
        state.c1lenon = snd.ch1.length_enable as u8;
        state.c1nr12 = snd.ch1.envelope.nrx2;
        if let Some(sweep) = &snd.ch1.sweep {
            state.c1nr10 = sweep.nr10;
            state.c1swpen = sweep.enabled as u8;
            state.c1swpsh = sweep.shadow;
            state.c1swpt = sweep.timer;
        }

        state.c2actv = snd.ch2.active as u8;
        state.c2duty = snd.ch2.duty;
        state.c2dutyp = snd.ch2.duty_pos;
        state.c2envt = snd.ch2.envelope.timer;
        state.c2envv = snd.ch2.envelope.volume;
        state.c2freq = snd.ch2.frequency;
        state.c2freqt = snd.ch2.freq_timer;
        state.c2len = snd.ch2.length;
        state.c2lenon = snd.ch2.length_enable as u8;
        state.c2nr22 = snd.ch2.envelope.nrx2;

        state.c3actv = snd.ch3.active as u8;
        state.c3dacon = snd.ch3.dac_enabled as u8;
        state.c3freq = snd.ch3.frequency;
        state.c3freqt = snd.ch3.freq_timer;
        state.c3len = snd.ch3.length;
        state.c3lenon = snd.ch3.length_enable as u8;
        state.c3lrt = age(cc, snd.ch3.last_read_time.min(cc));
        state.c3pos = snd.ch3.wave_pos;
        state.c3smpl = snd.ch3.sample_byte;
        state.c3vol = snd.ch3.volume_code;
        state.waveram.copy_from_slice(&snd.ch3.wave_ram);

        state.c4actv = snd.ch4.active as u8;
        state.c4envt = snd.ch4.envelope.timer;
        state.c4envv = snd.ch4.envelope.volume;
        state.c4freqt = snd.ch4.freq_timer;
        state.c4len = snd.ch4.length;
        state.c4lenon = snd.ch4.length_enable as u8;
        state.c4lfsr = snd.ch4.lfsr;
        state.c4nr43 = snd.ch4.nr43;

        if let Some(rtc) = &self.mem.rtc {
            state.rtcbase = rtc.base_time as u32;
            state.rtchalt = rtc.halt_time as u32;
            state.rtcdh = rtc.data_dh;
            state.rtcdl = rtc.data_dl;
            state.rtch = rtc.data_h;
            state.rtcm = rtc.data_m;
            state.rtcs = rtc.data_s;
            state.rtclld = rtc.last_latch as u8;
        }
    }

    /// Peripheral-readable registers folded into the ioamhram snapshot so
    /// the IO page round-trips as one buffer.
    fn overlay_io(&mut self, state: &mut SaveState) {
        let io = &mut state.ioamhram;
        io[0x100] = self.mem.joyp;
        io[0x101] = self.mem.serial.sb;
        io[0x102] = self.mem.serial.sc;
        io[0x104] = self.mem.timer.div;
        io[0x105] = self.mem.timer.tima;
        io[0x106] = self.mem.timer.tma;
        io[0x107] = self.mem.timer.tac;
        io[0x10F] = self.mem.if_flags;
        let v = &self.mem.video;
        io[0x140] = v.lcdc;
        io[0x141] = v.stat;
        io[0x142] = v.scy;
        io[0x143] = v.scx;
        io[0x145] = v.lyc;
        io[0x147] = v.bgp;
        io[0x148] = v.obp0;
        io[0x149] = v.obp1;
        io[0x14A] = v.wy;
        io[0x14B] = v.wx;
        io[0x14D] = self.mem.key1;
        io[0x14F] = self.mem.vrambank;
        io[0x150] = !self.mem.boot_mapped as u8;
        io[0x170] = self.mem.wrambank;
    }

    /// Copy the snapshot into the live engine and re-derive every next-due
    /// stamp from the restored counters.
    pub fn load_state(&mut self, state: &SaveState) {
        debug_assert!(self.state_bound, "snapshot not bound");
        let cc = (state.cc as u64) & CC_MASK;
        self.cycle_counter = cc;
        self.min_int_time = cc;
        self.regs.pc = state.pc;
        self.regs.sp = state.sp;
        self.regs.a = state.a;
        self.regs.b = state.b;
        self.regs.c = state.c;
        self.regs.d = state.d;
        self.regs.e = state.e;
        self.regs.f = state.f & 0xF0;
        self.regs.h = state.h;
        self.regs.l = state.l;
        self.ime = state.ime != 0;
        self.halted = state.halt != 0;
        self.halt_bug = state.skip != 0;
        // Stepping state does not survive a load, but registered
        // breakpoints stay armed.
        self.end_condition = if self.breakpoints.is_empty() {
            EndCondition::Idle
        } else {
            EndCondition::BreakOnAddress
        };

        self.mem.vram.copy_from_slice(&state.vram);
        self.mem.wram.copy_from_slice(&state.wram);
        self.mem.ioamhram.copy_from_slice(&state.ioamhram);
        if let Some(cart) = &mut self.mem.cart {
            cart.ram.copy_from_slice(&state.sram);
        }

        self.mem.rombank = state.rombank.max(1);
        self.mem.rambank = state.rambank;
        self.mem.ram_enabled = state.sramon != 0;
        self.mem.bank_mode = state.rambmod;
        self.mem.oam_dma_src = state.odmasrc;
        self.mem.oam_dma_pos = state.odmapos;
        self.mem.last_oam_dma_update = (cc as i64 + state.lodmaup as i32 as i64).max(0) as u64;
        self.mem.dma_src = state.dmasrc;
        self.mem.dma_dst = state.dmadst;
        self.mem.hdma5 = state.hdma5;
        self.mem.hdma_active = state.hdma != 0;

        self.restore_io(state);

        // Timer phases, then the derived overflow stamp.
        self.mem.timer.div_last_update = cc - state.ldivup as u64;
        self.mem.timer.tima_last_update = cc - state.ltimaup as u64;
        self.mem.timer.reschedule();

        self.mem.serial.next_serial_time = from_delay(cc, state.serialt);

        self.mem.video.video_cycles = state.vcycles as u64 % crate::video::FRAME_CYCLES;
        self.mem.video.window_line = state.winypos;
        self.mem.video.last_update = cc;

        let snd = &mut self.mem.sound;
        snd.cycle_counter = cc.saturating_sub(state.spucntr as u64);
        snd.enabled = state.sndon != 0;
        snd.nr50 = state.nr50;
        snd.nr51 = state.nr51;

        snd.ch1.active = state.c1actv != 0;
        snd.ch1.duty = state.c1duty;
        snd.ch1.duty_pos = state.c1dutyp & 0x07;
        snd.ch1.envelope.timer = state.c1envt;
        snd.ch1.envelope.volume = state.c1envv & 0x0F;
        snd.ch1.frequency = state.c1freq & 0x07FF;
        snd.ch1.freq_timer = state.c1freqt;
        snd.ch1.length = state.c1len;
        snd.ch1.length_enable = state.c1lenon != 0;
        snd.ch1.envelope.nrx2 = state.c1nr12;
        if let Some(sweep) = &mut snd.ch1.sweep {
            sweep.nr10 = state.c1nr10;
            sweep.enabled = state.c1swpen != 0;
            sweep.shadow = state.c1swpsh & 0x07FF;
            sweep.timer = state.c1swpt;
        }

        snd.ch2.active = state.c2actv != 0;
        snd.ch2.duty = state.c2duty;
        snd.ch2.duty_pos = state.c2dutyp & 0x07;
        snd.ch2.envelope.timer = state.c2envt;
        snd.ch2.envelope.volume = state.c2envv & 0x0F;
        snd.ch2.frequency = state.c2freq & 0x07FF;
        snd.ch2.freq_timer = state.c2freqt;
        snd.ch2.length = state.c2len;
        snd.ch2.length_enable = state.c2lenon != 0;
        snd.ch2.envelope.nrx2 = state.c2nr22;

        snd.ch3.active = state.c3actv != 0;
        snd.ch3.dac_enabled = state.c3dacon != 0;
        snd.ch3.frequency = state.c3freq & 0x07FF;
        snd.ch3.freq_timer = state.c3freqt;
        snd.ch3.length = state.c3len;
        snd.ch3.length_enable = state.c3lenon != 0;
        snd.ch3.last_read_time = cc.saturating_sub(state.c3lrt as u64);
        snd.ch3.wave_pos = state.c3pos & 0x1F;
        snd.ch3.sample_byte = state.c3smpl;
        snd.ch3.volume_code = state.c3vol & 0x03;
        snd.ch3.wave_ram.copy_from_slice(&state.waveram);

        snd.ch4.active = state.c4actv != 0;
        snd.ch4.envelope.timer = state.c4envt;
        snd.ch4.envelope.volume = state.c4envv & 0x0F;
        snd.ch4.freq_timer = state.c4freqt;
        snd.ch4.length = state.c4len;
        snd.ch4.length_enable = state.c4lenon != 0;
        snd.ch4.lfsr = state.c4lfsr & 0x7FFF;
        snd.ch4.nr43 = state.c4nr43;

        if let Some(rtc) = &mut self.mem.rtc {
            rtc.base_time = state.rtcbase as i64;
            rtc.halt_time = state.rtchalt as i64;
            rtc.data_dh = state.rtcdh;
            rtc.data_dl = state.rtcdl;
            rtc.data_h = state.rtch;
            rtc.data_m = state.rtcm;
            rtc.data_s = state.rtcs;
            rtc.last_latch = state.rtclld != 0;
        }
    }

    fn restore_io(&mut self, state: &SaveState) {
        let io = &state.ioamhram;
        self.mem.joyp = io[0x100] & 0x30;
        self.mem.serial.sb = io[0x101];
        self.mem.serial.sc = io[0x102];
        self.mem.timer.div = io[0x104];
        self.mem.timer.tima = io[0x105];
        self.mem.timer.tma = io[0x106];
        self.mem.timer.tac = io[0x107] & 0x07;
        self.mem.if_flags = io[0x10F] & 0x1F;
        let v = &mut self.mem.video;
        v.lcdc = io[0x140];
        v.stat = io[0x141] & 0x78;
        v.scy = io[0x142];
        v.scx = io[0x143];
        v.lyc = io[0x145];
        v.bgp = io[0x147];
        v.obp0 = io[0x148];
        v.obp1 = io[0x149];
        v.wy = io[0x14A];
        v.wx = io[0x14B];
        self.mem.key1 = io[0x14D] & 0x81;
        self.mem.vrambank = io[0x14F] & 0x01;
        self.mem.boot_mapped = io[0x150] == 0 && self.mem.bootrom.is_some();
        self.mem.wrambank = (io[0x170] & 0x07).max(1);
    }
}
