use std::{fs, io, path::Path};

use log::info;

const HEADER_TITLE: usize = 0x134;
const HEADER_CGB: usize = 0x143;
const HEADER_CART_TYPE: usize = 0x147;
const HEADER_RAM_SIZE: usize = 0x149;

/// A loaded program image.
///
/// The cartridge is a narrow collaborator: it owns the ROM and external RAM
/// buffers plus the header metadata the engine needs (title, RAM size, RTC
/// and battery flags). Bank-register decoding lives on the memory bus.
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub title: String,
    pub cgb: bool,
    pub has_rtc: bool,
    pub has_battery: bool,
}

impl Cartridge {
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Cartridge> {
        let data = fs::read(path)?;
        Ok(Self::from_bytes(data))
    }

    pub fn from_bytes(data: Vec<u8>) -> Cartridge {
        let byte = |i: usize| data.get(i).copied().unwrap_or(0);

        let mut title = String::new();
        for i in HEADER_TITLE..HEADER_TITLE + 0x10 {
            let b = byte(i);
            if b == 0 || b >= 0x80 {
                break;
            }
            title.push(b as char);
        }

        let cart_type = byte(HEADER_CART_TYPE);
        let has_rtc = matches!(cart_type, 0x0F | 0x10);
        let has_battery = matches!(cart_type, 0x03 | 0x06 | 0x09 | 0x0D | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E);
        let ram_size = match byte(HEADER_RAM_SIZE) {
            0x01 => 0x0800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            _ => 0,
        };
        let cgb = byte(HEADER_CGB) & 0x80 != 0;

        info!(
            "loaded ROM: {:?} ({} bytes, ram {} bytes, cgb {})",
            title,
            data.len(),
            ram_size,
            cgb
        );

        Cartridge {
            rom: data,
            ram: vec![0; ram_size],
            title,
            cgb,
            has_rtc,
            has_battery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_header(cart_type: u8, ram_size: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[HEADER_TITLE..HEADER_TITLE + 4].copy_from_slice(b"TEST");
        rom[HEADER_CART_TYPE] = cart_type;
        rom[HEADER_RAM_SIZE] = ram_size;
        rom
    }

    #[test]
    fn parses_title_and_ram_size() {
        let cart = Cartridge::from_bytes(rom_with_header(0x03, 0x02));
        assert_eq!(cart.title, "TEST");
        assert_eq!(cart.ram.len(), 0x2000);
        assert!(cart.has_battery);
        assert!(!cart.has_rtc);
    }

    #[test]
    fn mbc3_rtc_variants_advertise_a_clock() {
        let cart = Cartridge::from_bytes(rom_with_header(0x0F, 0x00));
        assert!(cart.has_rtc);
        assert!(cart.ram.is_empty());
    }
}
