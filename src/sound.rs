/// Cycles per generated stereo sample.
pub const CYCLES_PER_SAMPLE: u64 = 2;

const LENGTH_PERIOD: u64 = 16384; // 256 Hz
const SWEEP_PERIOD: u64 = 32768; // 128 Hz
const ENVELOPE_PERIOD: u64 = 65536; // 64 Hz

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5%
    [1, 0, 0, 0, 0, 0, 0, 1], // 25%
    [1, 0, 0, 0, 0, 1, 1, 1], // 50%
    [0, 1, 1, 1, 1, 1, 1, 0], // 75%
];

/// OR masks applied to register reads, NR10 through NR52.
const READ_OR_MASK: [u8; 23] = [
    0x80, 0x3F, 0x00, 0xFF, 0xBF, // NR10-NR14
    0xFF, 0x3F, 0x00, 0xFF, 0xBF, // NR20-NR24
    0x7F, 0xFF, 0x9F, 0xFF, 0xBF, // NR30-NR34
    0xFF, 0xFF, 0x00, 0x00, 0xBF, // NR40-NR44
    0x00, 0x00, 0x70, // NR50-NR52
];

#[derive(Default, Clone, Copy)]
pub struct Envelope {
    pub volume: u8,
    pub timer: u8,
    /// Raw NRx2 value; also gates the DAC (upper 5 bits nonzero).
    pub nrx2: u8,
}

impl Envelope {
    fn clock(&mut self) {
        let period = self.nrx2 & 0x07;
        if period == 0 {
            return;
        }
        if self.timer > 1 {
            self.timer -= 1;
            return;
        }
        self.timer = period;
        if self.nrx2 & 0x08 != 0 {
            if self.volume < 15 {
                self.volume += 1;
            }
        } else if self.volume > 0 {
            self.volume -= 1;
        }
    }

    fn trigger(&mut self) {
        self.volume = self.nrx2 >> 4;
        self.timer = self.nrx2 & 0x07;
    }

    fn dac_enabled(&self) -> bool {
        self.nrx2 & 0xF8 != 0
    }
}

#[derive(Default, Clone, Copy)]
pub struct Sweep {
    /// Raw NR10 value.
    pub nr10: u8,
    pub timer: u8,
    pub shadow: u16,
    pub enabled: bool,
}

impl Sweep {
    fn calculate(&self) -> u16 {
        let delta = self.shadow >> (self.nr10 & 0x07);
        if self.nr10 & 0x08 != 0 {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow + delta
        }
    }

    /// Returns the new frequency, or `None` when the channel must shut off.
    fn clock(&mut self) -> Option<Option<u16>> {
        if !self.enabled {
            return None;
        }
        let period = (self.nr10 >> 4) & 0x07;
        if period == 0 {
            return None;
        }
        if self.timer > 1 {
            self.timer -= 1;
            return None;
        }
        self.timer = period;
        let next = self.calculate();
        if next > 2047 {
            return Some(None);
        }
        if self.nr10 & 0x07 != 0 {
            self.shadow = next;
            // Overflow check also applies to the value after the write-back.
            if self.calculate() > 2047 {
                return Some(None);
            }
            return Some(Some(next));
        }
        Some(Some(self.shadow))
    }

    fn trigger(&mut self, freq: u16) -> bool {
        self.shadow = freq;
        let period = (self.nr10 >> 4) & 0x07;
        self.timer = if period == 0 { 8 } else { period };
        self.enabled = period != 0 || self.nr10 & 0x07 != 0;
        // An overflow on trigger disables the channel immediately.
        self.nr10 & 0x07 != 0 && self.calculate() > 2047
    }
}

/// Square channel (1 and 2). Channel 1 additionally carries the sweep unit.
#[derive(Default)]
pub struct SquareChannel {
    pub active: bool,
    pub length: u16,
    pub length_enable: bool,
    pub duty: u8,
    pub duty_pos: u8,
    pub frequency: u16,
    /// Cycles until the next duty-position step.
    pub freq_timer: u32,
    pub envelope: Envelope,
    pub sweep: Option<Sweep>,
}

impl SquareChannel {
    fn new(with_sweep: bool) -> Self {
        Self {
            sweep: with_sweep.then(Sweep::default),
            ..Default::default()
        }
    }

    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 4
    }

    fn step(&mut self, cycles: u32) {
        if !self.active {
            return;
        }
        let mut cycles = cycles;
        while self.freq_timer <= cycles {
            cycles -= self.freq_timer;
            self.freq_timer = self.period();
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
        self.freq_timer -= cycles;
    }

    fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.active = false;
            }
        }
    }

    fn trigger(&mut self) {
        self.active = self.envelope.dac_enabled();
        if self.length == 0 {
            self.length = 64;
        }
        self.freq_timer = self.period();
        self.envelope.trigger();
        if let Some(sweep) = &mut self.sweep {
            if sweep.trigger(self.frequency) {
                self.active = false;
            }
        }
    }

    fn output(&self) -> u8 {
        if !self.active {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.envelope.volume
    }
}

#[derive(Default)]
pub struct WaveChannel {
    pub active: bool,
    pub dac_enabled: bool,
    pub length: u16,
    pub length_enable: bool,
    /// NR32 volume shift code.
    pub volume_code: u8,
    pub frequency: u16,
    pub freq_timer: u32,
    pub wave_ram: [u8; 0x10],
    /// Current nibble index, 0..32.
    pub wave_pos: u8,
    /// Byte latched by the last wave RAM fetch.
    pub sample_byte: u8,
    /// Cycle stamp of the last wave RAM fetch.
    pub last_read_time: u64,
}

impl WaveChannel {
    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 2
    }

    fn step(&mut self, cycles: u32, cc: u64) {
        if !self.active {
            return;
        }
        let mut cycles = cycles;
        while self.freq_timer <= cycles {
            cycles -= self.freq_timer;
            self.freq_timer = self.period();
            self.wave_pos = (self.wave_pos + 1) & 0x1F;
            self.sample_byte = self.wave_ram[self.wave_pos as usize / 2];
            self.last_read_time = cc;
        }
        self.freq_timer -= cycles;
    }

    fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.active = false;
            }
        }
    }

    fn trigger(&mut self) {
        self.active = self.dac_enabled;
        if self.length == 0 {
            self.length = 256;
        }
        self.freq_timer = self.period();
        self.wave_pos = 0;
    }

    fn output(&self) -> u8 {
        if !self.active {
            return 0;
        }
        let nibble = if self.wave_pos & 1 == 0 {
            self.sample_byte >> 4
        } else {
            self.sample_byte & 0x0F
        };
        match self.volume_code {
            0 => 0,
            1 => nibble,
            2 => nibble >> 1,
            _ => nibble >> 2,
        }
    }
}

#[derive(Default)]
pub struct NoiseChannel {
    pub active: bool,
    pub length: u16,
    pub length_enable: bool,
    /// Raw NR43 value.
    pub nr43: u8,
    pub lfsr: u16,
    pub freq_timer: u32,
    pub envelope: Envelope,
}

impl NoiseChannel {
    fn period(&self) -> u32 {
        let r = (self.nr43 & 0x07) as u32;
        let divisor = if r == 0 { 8 } else { r * 16 };
        divisor << (self.nr43 >> 4)
    }

    fn step(&mut self, cycles: u32) {
        if !self.active {
            return;
        }
        let mut cycles = cycles;
        while self.freq_timer <= cycles {
            cycles -= self.freq_timer;
            self.freq_timer = self.period();
            let bit = (self.lfsr ^ (self.lfsr >> 1)) & 1;
            self.lfsr = (self.lfsr >> 1) | (bit << 14);
            if self.nr43 & 0x08 != 0 {
                self.lfsr = (self.lfsr & !0x40) | (bit << 6);
            }
        }
        self.freq_timer -= cycles;
    }

    fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.active = false;
            }
        }
    }

    fn trigger(&mut self) {
        self.active = self.envelope.dac_enabled();
        if self.length == 0 {
            self.length = 64;
        }
        self.freq_timer = self.period();
        self.lfsr = 0x7FFF;
        self.envelope.trigger();
    }

    fn output(&self) -> u8 {
        if !self.active {
            return 0;
        }
        (!self.lfsr as u8 & 1) * self.envelope.volume
    }
}

/// Audio unit.
///
/// Nothing runs between bus accesses: `generate_samples(cc)` produces every
/// stereo sample from `cycle_counter` up to `cc` in one pass, clocking the
/// length/sweep/envelope dividers off the absolute cycle count rather than a
/// frame-sequencer object. Samples accumulate internally until the caller
/// drains them with `fill_sound_buffer`.
pub struct Sound {
    pub ch1: SquareChannel,
    pub ch2: SquareChannel,
    pub ch3: WaveChannel,
    pub ch4: NoiseChannel,
    pub nr50: u8,
    pub nr51: u8,
    pub enabled: bool,
    /// Cycle up to which samples have been generated.
    pub cycle_counter: u64,
    samples: Vec<u32>,
}

impl Sound {
    pub fn new() -> Self {
        Self {
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::default(),
            ch4: NoiseChannel::default(),
            nr50: 0,
            nr51: 0,
            enabled: false,
            cycle_counter: 0,
            samples: Vec::new(),
        }
    }

    /// Produce all samples up to `cc`.
    pub fn generate_samples(&mut self, cc: u64) {
        debug_assert!(cc >= self.cycle_counter);
        if !self.enabled {
            let n = (cc - self.cycle_counter) / CYCLES_PER_SAMPLE;
            self.samples.extend(std::iter::repeat_n(0u32, n as usize));
            self.cycle_counter += n * CYCLES_PER_SAMPLE;
            return;
        }
        while self.cycle_counter + CYCLES_PER_SAMPLE <= cc {
            let t = self.cycle_counter;
            if t % LENGTH_PERIOD == 0 {
                self.ch1.clock_length();
                self.ch2.clock_length();
                self.ch3.clock_length();
                self.ch4.clock_length();
            }
            if t % SWEEP_PERIOD == 0 {
                if let Some(sweep) = &mut self.ch1.sweep {
                    match sweep.clock() {
                        Some(Some(freq)) => self.ch1.frequency = freq,
                        Some(None) => self.ch1.active = false,
                        None => {}
                    }
                }
            }
            if t % ENVELOPE_PERIOD == 0 {
                self.ch1.envelope.clock();
                self.ch2.envelope.clock();
                self.ch4.envelope.clock();
            }

            self.ch1.step(CYCLES_PER_SAMPLE as u32);
            self.ch2.step(CYCLES_PER_SAMPLE as u32);
            self.ch3.step(CYCLES_PER_SAMPLE as u32, t);
            self.ch4.step(CYCLES_PER_SAMPLE as u32);
            self.cycle_counter += CYCLES_PER_SAMPLE;

            self.samples.push(self.mix());
        }
    }

    /// One stereo sample, left in the high half-word.
    fn mix(&self) -> u32 {
        let outs = [
            self.ch1.output(),
            self.ch2.output(),
            self.ch3.output(),
            self.ch4.output(),
        ];
        let mut right = 0u32;
        let mut left = 0u32;
        for (i, &out) in outs.iter().enumerate() {
            if self.nr51 & (1 << i) != 0 {
                right += out as u32;
            }
            if self.nr51 & (1 << (i + 4)) != 0 {
                left += out as u32;
            }
        }
        left *= (self.nr50 >> 4 & 0x07) as u32 + 1;
        right *= (self.nr50 & 0x07) as u32 + 1;
        left << 16 | right
    }

    /// Drain generated samples into `buf`. Returns the number written.
    pub fn fill_sound_buffer(&mut self, buf: &mut [u32]) -> usize {
        let n = buf.len().min(self.samples.len());
        buf[..n].copy_from_slice(&self.samples[..n]);
        self.samples.drain(..n);
        n
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn read(&mut self, addr: u16, cc: u64) -> u8 {
        self.generate_samples(cc);
        let raw = match addr {
            0xFF10 => self.ch1.sweep.as_ref().map_or(0, |s| s.nr10),
            0xFF11 => self.ch1.duty << 6,
            0xFF12 => self.ch1.envelope.nrx2,
            0xFF14 => (self.ch1.length_enable as u8) << 6,
            0xFF16 => self.ch2.duty << 6,
            0xFF17 => self.ch2.envelope.nrx2,
            0xFF19 => (self.ch2.length_enable as u8) << 6,
            0xFF1A => (self.ch3.dac_enabled as u8) << 7,
            0xFF1C => self.ch3.volume_code << 5,
            0xFF1E => (self.ch3.length_enable as u8) << 6,
            0xFF21 => self.ch4.envelope.nrx2,
            0xFF22 => self.ch4.nr43,
            0xFF23 => (self.ch4.length_enable as u8) << 6,
            0xFF24 => self.nr50,
            0xFF25 => self.nr51,
            0xFF26 => {
                (self.enabled as u8) << 7
                    | (self.ch4.active as u8) << 3
                    | (self.ch3.active as u8) << 2
                    | (self.ch2.active as u8) << 1
                    | self.ch1.active as u8
            }
            0xFF30..=0xFF3F => return self.read_wave_ram(addr),
            _ => 0,
        };
        raw | READ_OR_MASK
            .get((addr - 0xFF10) as usize)
            .copied()
            .unwrap_or(0xFF)
    }

    pub fn write(&mut self, addr: u16, cc: u64, val: u8) {
        self.generate_samples(cc);
        if !self.enabled && addr != 0xFF26 && !(0xFF30..=0xFF3F).contains(&addr) {
            // Powered off: only NR52 and wave RAM are writable.
            return;
        }
        match addr {
            0xFF10 => {
                if let Some(sweep) = &mut self.ch1.sweep {
                    sweep.nr10 = val;
                    if val & 0x70 == 0 {
                        sweep.enabled = sweep.nr10 & 0x07 != 0;
                    }
                }
            }
            0xFF11 => {
                self.ch1.duty = val >> 6;
                self.ch1.length = 64 - (val & 0x3F) as u16;
            }
            0xFF12 => {
                self.ch1.envelope.nrx2 = val;
                if !self.ch1.envelope.dac_enabled() {
                    self.ch1.active = false;
                }
            }
            0xFF13 => self.ch1.frequency = self.ch1.frequency & 0x0700 | val as u16,
            0xFF14 => {
                self.ch1.frequency = self.ch1.frequency & 0x00FF | ((val & 0x07) as u16) << 8;
                self.ch1.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch1.trigger();
                }
            }
            0xFF16 => {
                self.ch2.duty = val >> 6;
                self.ch2.length = 64 - (val & 0x3F) as u16;
            }
            0xFF17 => {
                self.ch2.envelope.nrx2 = val;
                if !self.ch2.envelope.dac_enabled() {
                    self.ch2.active = false;
                }
            }
            0xFF18 => self.ch2.frequency = self.ch2.frequency & 0x0700 | val as u16,
            0xFF19 => {
                self.ch2.frequency = self.ch2.frequency & 0x00FF | ((val & 0x07) as u16) << 8;
                self.ch2.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch2.trigger();
                }
            }
            0xFF1A => {
                self.ch3.dac_enabled = val & 0x80 != 0;
                if !self.ch3.dac_enabled {
                    self.ch3.active = false;
                }
            }
            0xFF1B => self.ch3.length = 256 - val as u16,
            0xFF1C => self.ch3.volume_code = val >> 5 & 0x03,
            0xFF1D => self.ch3.frequency = self.ch3.frequency & 0x0700 | val as u16,
            0xFF1E => {
                self.ch3.frequency = self.ch3.frequency & 0x00FF | ((val & 0x07) as u16) << 8;
                self.ch3.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch3.trigger();
                }
            }
            0xFF20 => self.ch4.length = 64 - (val & 0x3F) as u16,
            0xFF21 => {
                self.ch4.envelope.nrx2 = val;
                if !self.ch4.envelope.dac_enabled() {
                    self.ch4.active = false;
                }
            }
            0xFF22 => self.ch4.nr43 = val,
            0xFF23 => {
                self.ch4.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch4.trigger();
                }
            }
            0xFF24 => self.nr50 = val,
            0xFF25 => self.nr51 = val,
            0xFF26 => {
                let on = val & 0x80 != 0;
                if self.enabled && !on {
                    self.power_off();
                }
                self.enabled = on;
            }
            0xFF30..=0xFF3F => self.write_wave_ram(addr, val),
            _ => {}
        }
    }

    fn read_wave_ram(&self, addr: u16) -> u8 {
        if self.ch3.active {
            // While playing, reads see the byte the channel last fetched.
            self.ch3.sample_byte
        } else {
            self.ch3.wave_ram[(addr & 0x0F) as usize]
        }
    }

    fn write_wave_ram(&mut self, addr: u16, val: u8) {
        if self.ch3.active {
            let pos = self.ch3.wave_pos as usize / 2;
            self.ch3.wave_ram[pos] = val;
        } else {
            self.ch3.wave_ram[(addr & 0x0F) as usize] = val;
        }
    }

    /// Power-off clears every register but preserves wave RAM.
    fn power_off(&mut self) {
        let wave_ram = self.ch3.wave_ram;
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3 = WaveChannel::default();
        self.ch4 = NoiseChannel::default();
        self.ch3.wave_ram = wave_ram;
        self.nr50 = 0;
        self.nr51 = 0;
    }
}

impl Default for Sound {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered() -> Sound {
        let mut s = Sound::new();
        s.write(0xFF26, 0, 0x80);
        s
    }

    #[test]
    fn trigger_activates_a_channel_with_dac_on() {
        let mut s = powered();
        s.write(0xFF12, 0, 0xF0);
        s.write(0xFF14, 0, 0x80);
        assert!(s.ch1.active);
        assert_eq!(s.read(0xFF26, 0) & 0x0F, 0x01);
    }

    #[test]
    fn trigger_with_dac_off_stays_inactive() {
        let mut s = powered();
        s.write(0xFF12, 0, 0x00);
        s.write(0xFF14, 0, 0x80);
        assert!(!s.ch1.active);
    }

    #[test]
    fn length_counter_expires_the_channel() {
        let mut s = powered();
        s.write(0xFF12, 0, 0xF0);
        s.write(0xFF11, 0, 0x3F); // length 1
        s.write(0xFF14, 0, 0xC0); // trigger + length enable
        assert!(s.ch1.active);
        s.generate_samples(LENGTH_PERIOD * 2);
        assert!(!s.ch1.active);
    }

    #[test]
    fn one_sample_per_two_cycles() {
        let mut s = powered();
        s.generate_samples(1000);
        assert_eq!(s.pending_samples(), 500);
        let mut buf = vec![0u32; 200];
        assert_eq!(s.fill_sound_buffer(&mut buf), 200);
        assert_eq!(s.pending_samples(), 300);
    }

    #[test]
    fn power_off_clears_registers_but_keeps_wave_ram() {
        let mut s = powered();
        s.write(0xFF30, 0, 0xAB);
        s.write(0xFF24, 0, 0x77);
        s.write(0xFF26, 0, 0x00);
        assert_eq!(s.ch3.wave_ram[0], 0xAB);
        assert_eq!(s.nr50, 0);
        // Register writes are ignored while powered off.
        s.write(0xFF24, 0, 0x33);
        assert_eq!(s.read(0xFF24, 0), 0x00);
    }

    #[test]
    fn catch_up_is_idempotent() {
        let mut s = powered();
        s.write(0xFF12, 0, 0xF3);
        s.write(0xFF13, 0, 0x00);
        s.write(0xFF14, 0, 0x87);
        s.generate_samples(4096);
        let (pos, timer, n) = (s.ch1.duty_pos, s.ch1.freq_timer, s.pending_samples());
        s.generate_samples(4096);
        assert_eq!((s.ch1.duty_pos, s.ch1.freq_timer, s.pending_samples()), (pos, timer, n));
    }
}
