use crate::DISABLED_TIME;

const TIMER_IRQ: u8 = 0x04;

/// Divider/timer unit.
///
/// Nothing here ticks per cycle: DIV and TIMA are reconstructed from the
/// cycle stamps of their last synchronization whenever the unit is touched,
/// and `tima_time` holds the scheduled cycle of the next TIMA overflow so
/// the bus can catch the unit up proactively when that stamp is crossed.
pub struct Timer {
    pub div: u8,
    pub tima: u8,
    pub tma: u8,
    pub tac: u8,
    /// Cycle of the last DIV increment boundary.
    pub div_last_update: u64,
    /// Cycle of the last TIMA increment boundary.
    pub tima_last_update: u64,
    /// Cycle at which TIMA next overflows, or `DISABLED_TIME`.
    pub tima_time: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            div_last_update: 0,
            tima_last_update: 0,
            tima_time: DISABLED_TIME,
        }
    }

    fn enabled(&self) -> bool {
        self.tac & 0x04 != 0
    }

    /// TIMA period in cycles for the current TAC input select.
    fn period(&self) -> u64 {
        match self.tac & 0x03 {
            0x00 => 1024,
            0x01 => 16,
            0x02 => 64,
            _ => 256,
        }
    }

    /// Bring DIV and TIMA up to `cc`, applying any overflow reload that was
    /// scheduled at or before `cc` (the event takes effect before whatever
    /// access triggered this catch-up is serviced).
    pub fn update(&mut self, cc: u64, if_flags: &mut u8) {
        debug_assert!(cc >= self.div_last_update);

        let div_ticks = (cc - self.div_last_update) >> 8;
        self.div = self.div.wrapping_add(div_ticks as u8);
        self.div_last_update += div_ticks << 8;

        if !self.enabled() {
            return;
        }

        let period = self.period();
        if cc < self.tima_time {
            let ticks = (cc - self.tima_last_update) / period;
            self.tima = self.tima.wrapping_add(ticks as u8);
            self.tima_last_update += ticks * period;
        } else {
            *if_flags |= TIMER_IRQ;
            let wrap_len = (0x100 - self.tma as u64) * period;
            let past = (cc - self.tima_time) % wrap_len;
            self.tima = self.tma.wrapping_add((past / period) as u8);
            self.tima_last_update = cc - (past % period);
            self.tima_time = self.tima_last_update + (0x100 - self.tima as u64) * period;
        }
    }

    pub fn read(&mut self, addr: u16, cc: u64, if_flags: &mut u8) -> u8 {
        self.update(cc, if_flags);
        match addr {
            0xFF04 => self.div,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, cc: u64, val: u8, if_flags: &mut u8) {
        self.update(cc, if_flags);
        match addr {
            0xFF04 => {
                // Any write clears the divider and resets the TIMA phase.
                self.div = 0;
                self.div_last_update = cc;
                self.tima_last_update = cc;
                self.reschedule();
            }
            0xFF05 => {
                self.tima = val;
                self.reschedule();
            }
            0xFF06 => {
                self.tma = val;
            }
            0xFF07 => {
                self.tac = val & 0x07;
                self.tima_last_update = cc;
                self.reschedule();
            }
            _ => {}
        }
    }

    /// Recompute the next-overflow stamp from the current counters.
    pub fn reschedule(&mut self) {
        self.tima_time = if self.enabled() {
            self.tima_last_update + (0x100 - self.tima as u64) * self.period()
        } else {
            DISABLED_TIME
        };
    }

    /// Cycle of the next timer interrupt, or `DISABLED_TIME`.
    pub fn next_irq_time(&self) -> u64 {
        if self.enabled() { self.tima_time } else { DISABLED_TIME }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
