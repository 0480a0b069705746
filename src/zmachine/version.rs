use super::result::{Result, ZErr};

// Only version 3 stories execute here. The enum stays so that every piece
// of version-dependent arithmetic names the version it assumes instead of
// burying a magic multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZVersion {
    V3 = 3,
}

impl ZVersion {
    pub fn new(byte: u8) -> Result<ZVersion> {
        match byte {
            3 => Ok(ZVersion::V3),
            _ => Err(ZErr::UnknownVersionNumber(byte)),
        }
    }

    // Packed addresses scale by this before use as byte offsets.
    pub fn packed_multiplier(self) -> usize {
        match self {
            ZVersion::V3 => 2,
        }
    }

    // The header stores the file length divided by a version-dependent
    // factor.
    pub fn convert_file_length(self, raw_length: u16) -> usize {
        match self {
            ZVersion::V3 => 2 * raw_length as usize,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new() {
        assert_eq!(ZVersion::V3, ZVersion::new(3).unwrap());
        for bad in &[0u8, 1, 2, 4, 5, 6, 7, 8, 0x80] {
            match ZVersion::new(*bad) {
                Err(ZErr::UnknownVersionNumber(v)) => assert_eq!(*bad, v),
                _ => panic!("version {} should not load", bad),
            }
        }
    }

    #[test]
    fn test_file_length() {
        assert_eq!(0x24, ZVersion::V3.convert_file_length(0x12));
    }
}
