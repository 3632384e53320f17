use std::{fs, io, path::Path};

const DMG_BOOT_SIZE: usize = 0x100;
const CGB_BOOT_SIZE: usize = 0x900;

/// Optional boot image executed before the cartridge.
///
/// The DMG image covers 0x0000-0x00FF. The CGB image covers 0x0000-0x08FF
/// but leaves the cartridge header window at 0x0100-0x01FF visible.
#[derive(Debug)]
pub enum BootRom {
    None,
    Dmg(Box<[u8]>),
    Cgb(Box<[u8]>),
}

impl BootRom {
    pub fn load_dmg<P: AsRef<Path>>(path: P) -> io::Result<BootRom> {
        Ok(BootRom::Dmg(read_exact_len(path, DMG_BOOT_SIZE)?))
    }

    pub fn load_cgb<P: AsRef<Path>>(path: P) -> io::Result<BootRom> {
        Ok(BootRom::Cgb(read_exact_len(path, CGB_BOOT_SIZE)?))
    }

    pub fn is_some(&self) -> bool {
        !matches!(self, BootRom::None)
    }

    /// Whether `addr` is masked by this image while it is mapped.
    pub fn maps(&self, addr: u16) -> bool {
        match self {
            BootRom::None => false,
            BootRom::Dmg(_) => (addr as usize) < DMG_BOOT_SIZE,
            BootRom::Cgb(_) => {
                let p = addr as usize;
                p < CGB_BOOT_SIZE && !(0x100..0x200).contains(&p)
            }
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match self {
            BootRom::None => 0xFF,
            BootRom::Dmg(data) | BootRom::Cgb(data) => data[addr as usize],
        }
    }
}

fn read_exact_len<P: AsRef<Path>>(path: P, expected: usize) -> io::Result<Box<[u8]>> {
    let data = fs::read(path)?;
    if data.len() < expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "boot image is too small",
        ));
    }
    Ok(data[..expected].to_vec().into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgb_image_leaves_header_window_unmapped() {
        let boot = BootRom::Cgb(vec![0; 0x900].into_boxed_slice());
        assert!(boot.maps(0x00FF));
        assert!(!boot.maps(0x0100));
        assert!(!boot.maps(0x01FF));
        assert!(boot.maps(0x0200));
        assert!(boot.maps(0x08FF));
        assert!(!boot.maps(0x0900));
    }

    #[test]
    fn missing_image_is_a_hard_error() {
        assert!(BootRom::load_dmg("/nonexistent/dmg_boot.bin").is_err());
    }

    #[test]
    fn short_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        fs::write(&path, [0u8; 0x80]).unwrap();
        let err = BootRom::load_dmg(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
