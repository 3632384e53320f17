use std::time::{SystemTime, UNIX_EPOCH};

const SECONDS_PER_DAY: i64 = 86400;

/// Current wall-clock time in unix seconds.
pub fn wall_seconds() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// MBC3 real-time clock.
///
/// The running time is not counted in cycles: `base_time` anchors the clock
/// to a unix-seconds instant, and the latched registers are derived from the
/// difference to the current wall clock on each latch edge. While halted the
/// clock reads from `halt_time` instead, so wall time stops mattering until
/// the halt flag is cleared (which shifts `base_time` forward by the paused
/// span).
pub struct Rtc {
    /// Unix-seconds instant representing zero elapsed time.
    pub base_time: i64,
    /// Wall instant at which the clock was halted; meaningful while halted.
    pub halt_time: i64,
    pub data_dh: u8,
    pub data_dl: u8,
    pub data_h: u8,
    pub data_m: u8,
    pub data_s: u8,
    /// Previous byte written to the latch port, for edge detection.
    pub last_latch: bool,
}

impl Rtc {
    pub fn new(now: i64) -> Self {
        Self {
            base_time: now,
            halt_time: now,
            data_dh: 0,
            data_dl: 0,
            data_h: 0,
            data_m: 0,
            data_s: 0,
            last_latch: false,
        }
    }

    fn halted(&self) -> bool {
        self.data_dh & 0x40 != 0
    }

    /// The instant the derived registers are computed against.
    fn active_time(&self, now: i64) -> i64 {
        if self.halted() { self.halt_time } else { now }
    }

    /// Latch-port write. A 0-to-1 edge copies the derived time into the
    /// readable registers.
    pub fn latch(&mut self, data: u8, now: i64) {
        if !self.last_latch && data == 1 {
            self.do_latch(now);
        }
        self.last_latch = data == 1;
    }

    fn do_latch(&mut self, now: i64) {
        let mut diff = self.active_time(now) - self.base_time;
        if diff < 0 {
            diff = 0;
        }
        while diff >= 0x200 * SECONDS_PER_DAY {
            // Day counter wrapped: set the sticky carry and rebase.
            diff -= 0x200 * SECONDS_PER_DAY;
            self.base_time += 0x200 * SECONDS_PER_DAY;
            self.data_dh |= 0x80;
        }
        self.data_s = (diff % 60) as u8;
        self.data_m = (diff / 60 % 60) as u8;
        self.data_h = (diff / 3600 % 24) as u8;
        let days = diff / SECONDS_PER_DAY;
        self.data_dl = days as u8;
        self.data_dh = (self.data_dh & 0xFE) | ((days >> 8) as u8 & 0x01);
    }

    /// Read one of the latched registers, selected by MBC3 bank index
    /// 0x08..=0x0C.
    pub fn read(&self, index: u8) -> u8 {
        match index {
            0x08 => self.data_s,
            0x09 => self.data_m,
            0x0A => self.data_h,
            0x0B => self.data_dl,
            0x0C => self.data_dh,
            _ => 0xFF,
        }
    }

    /// Write one of the clock registers. Each write rebases `base_time` so
    /// the derived field reads back as the written value.
    pub fn write(&mut self, index: u8, val: u8, now: i64) {
        let t = self.active_time(now);
        match index {
            0x08 => {
                self.base_time += (t - self.base_time) % 60;
                self.base_time -= (val % 60) as i64;
                self.data_s = val & 0x3F;
            }
            0x09 => {
                self.base_time += (t - self.base_time) % 3600 - ((t - self.base_time) % 60);
                self.base_time -= (val % 60) as i64 * 60;
                self.data_m = val & 0x3F;
            }
            0x0A => {
                self.base_time +=
                    (t - self.base_time) % SECONDS_PER_DAY - ((t - self.base_time) % 3600);
                self.base_time -= (val % 24) as i64 * 3600;
                self.data_h = val & 0x1F;
            }
            0x0B => {
                self.base_time += (t - self.base_time) / SECONDS_PER_DAY % 0x100 * SECONDS_PER_DAY;
                self.base_time -= val as i64 * SECONDS_PER_DAY;
                self.data_dl = val;
            }
            0x0C => {
                self.base_time += (t - self.base_time) / SECONDS_PER_DAY / 0x100 % 2
                    * 0x100
                    * SECONDS_PER_DAY;
                self.base_time -= ((val & 0x01) as i64) * 0x100 * SECONDS_PER_DAY;
                if (self.data_dh ^ val) & 0x40 != 0 {
                    if val & 0x40 != 0 {
                        self.halt_time = now;
                    } else {
                        self.base_time += now - self.halt_time;
                    }
                }
                self.data_dh = val & 0xC1;
            }
            _ => {}
        }
    }
}
