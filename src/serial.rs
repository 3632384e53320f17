use crate::DISABLED_TIME;

const SERIAL_IRQ: u8 = 0x08;

/// Cycles for a full 8-bit transfer on the internal 8192 Hz clock.
const TRANSFER_CYCLES: u64 = 4096;
/// Cycles for a full transfer with the CGB fast-clock bit set.
const TRANSFER_CYCLES_FAST: u64 = 128;

pub trait LinkPort: Send {
    /// Exchange a byte over the link. Returns the byte received from the
    /// partner. Implementations may perform the transfer immediately.
    fn transfer(&mut self, byte: u8) -> u8;
}

/// A stub link port used when no cable is attached: incoming bits are all
/// ones, so any transfer receives 0xFF. With `loopback` set the sent byte is
/// echoed back instead.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

/// Serial transfer unit.
///
/// A transfer does not shift bit-by-bit: starting one records the cycle at
/// which the whole exchange completes (`next_serial_time`), and catching the
/// unit up past that stamp applies the completed exchange in one step.
pub struct Serial {
    pub sb: u8,
    pub sc: u8,
    /// Cycle at which the active transfer completes, or `DISABLED_TIME`.
    pub next_serial_time: u64,
    port: Box<dyn LinkPort + Send>,
    cgb: bool,
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            sb: 0,
            sc: 0,
            next_serial_time: DISABLED_TIME,
            port: Box::new(NullLinkPort::default()),
            cgb,
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort + Send>) {
        self.port = port;
    }

    /// Complete any transfer scheduled at or before `cc`.
    pub fn update(&mut self, cc: u64, if_flags: &mut u8) {
        if cc >= self.next_serial_time {
            self.sb = self.port.transfer(self.sb);
            self.sc &= 0x7F;
            self.next_serial_time = DISABLED_TIME;
            *if_flags |= SERIAL_IRQ;
        }
    }

    pub fn read(&mut self, addr: u16, cc: u64, if_flags: &mut u8) -> u8 {
        self.update(cc, if_flags);
        match addr {
            0xFF01 => self.sb,
            0xFF02 => {
                if self.cgb {
                    self.sc | 0x7C
                } else {
                    self.sc | 0x7E
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, cc: u64, val: u8, if_flags: &mut u8) {
        self.update(cc, if_flags);
        match addr {
            0xFF01 => self.sb = val,
            0xFF02 => {
                self.sc = val & if self.cgb { 0x83 } else { 0x81 };
                self.reschedule(cc);
            }
            _ => {}
        }
    }

    /// Recompute the completion stamp from the current SB/SC configuration.
    /// With the external clock selected nothing completes on its own.
    pub fn reschedule(&mut self, cc: u64) {
        self.next_serial_time = if self.sc & 0x80 != 0 && self.sc & 0x01 != 0 {
            let len = if self.cgb && self.sc & 0x02 != 0 {
                TRANSFER_CYCLES_FAST
            } else {
                TRANSFER_CYCLES
            };
            cc + len
        } else {
            DISABLED_TIME
        };
    }

    pub fn next_irq_time(&self) -> u64 {
        self.next_serial_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_transfer_shifts_in_ones() {
        let mut s = Serial::new(false);
        let mut if_flags = 0;
        s.write(0xFF01, 0, 0x42, &mut if_flags);
        s.write(0xFF02, 0, 0x81, &mut if_flags);
        assert_eq!(s.next_serial_time, TRANSFER_CYCLES);

        s.update(TRANSFER_CYCLES - 1, &mut if_flags);
        assert_eq!(s.read(0xFF01, TRANSFER_CYCLES - 1, &mut if_flags), 0x42);
        assert_eq!(if_flags, 0);

        s.update(TRANSFER_CYCLES, &mut if_flags);
        assert_eq!(s.sb, 0xFF);
        assert_eq!(s.sc & 0x80, 0);
        assert_eq!(if_flags, SERIAL_IRQ);
        assert_eq!(s.next_serial_time, DISABLED_TIME);
    }

    #[test]
    fn external_clock_never_completes() {
        let mut s = Serial::new(false);
        let mut if_flags = 0;
        s.write(0xFF02, 0, 0x80, &mut if_flags);
        assert_eq!(s.next_serial_time, DISABLED_TIME);
    }

    #[test]
    fn loopback_port_echoes_the_sent_byte() {
        let mut s = Serial::new(true);
        s.connect(Box::new(NullLinkPort::new(true)));
        let mut if_flags = 0;
        s.write(0xFF01, 0, 0xA5, &mut if_flags);
        s.write(0xFF02, 0, 0x83, &mut if_flags);
        s.update(TRANSFER_CYCLES_FAST, &mut if_flags);
        assert_eq!(s.sb, 0xA5);
    }
}
