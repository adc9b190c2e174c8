use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::str::FromStr;

pub const VTOC_TRACK: u8 = 17;
pub const VTOC_SECTOR: u8 = 0;
pub const CAT_ENTRY_OFFSET: usize = 0x0b;
pub const CAT_ENTRY_LEN: usize = 0x23;
pub const ENTRIES_PER_SECTOR: usize = 7;
pub const MAX_TS_PAIRS: usize = 122;
pub const SECTOR_SIZE: usize = 256;
pub const MIN_TRACKS: usize = 17;
pub const MAX_TRACKS: usize = 50;
pub const DEFAULT_VOLUME_NUM: u8 = 254;
pub const MAX_CATALOG_SECTORS: usize = 64;
pub const MAX_TSLIST_REPS: usize = 1000;
/// only bother probing disks this small
pub const MAX_INTERESTING_TRACKS: usize = 50;

/// Enumerates DOS errors.  The `Display` trait will print the equivalent
/// DOS message, such as `FILE NOT FOUND`.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("RANGE ERROR")]
    Range,
    #[error("END OF DATA")]
    EndOfData,
    #[error("FILE NOT FOUND")]
    FileNotFound,
    #[error("I/O ERROR")]
    IOError,
    #[error("DISK FULL")]
    DiskFull,
    #[error("FILE LOCKED")]
    FileLocked,
    #[error("FILE TYPE MISMATCH")]
    FileTypeMismatch,
    #[error("WRITE PROTECTED")]
    WriteProtected,
    #[error("SYNTAX ERROR")]
    SyntaxError
}

/// Enumerates the DOS file types by their bit in the catalog type byte
/// (0x80 is the lock flag and is not a type).  Conversions:
/// * FileType to u8: `as u8`
/// * u8 to FileType: `FileType::from_u8` (use FromPrimitive trait)
/// * &str to FileType: `FileType::from_str`, str can be a number or mnemonic
#[derive(FromPrimitive,Clone,Copy,PartialEq,Eq,Debug)]
pub enum FileType {
    Text = 0x00,
    Integer = 0x01,
    Applesoft = 0x02,
    Binary = 0x04,
    S = 0x08,
    Reloc = 0x10,
    A2 = 0x20,
    B2 = 0x40
}

impl FromStr for FileType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        // string can be the number itself
        if let Ok(num) = u8::from_str(s) {
            return match FileType::from_u8(num) {
                Some(typ) => Ok(typ),
                _ => Err(Error::FileTypeMismatch)
            };
        }
        // or a mnemonic
        match s {
            "txt" | "T" => Ok(Self::Text),
            "itok" | "I" => Ok(Self::Integer),
            "atok" | "A" => Ok(Self::Applesoft),
            "bin" | "B" => Ok(Self::Binary),
            "S" => Ok(Self::S),
            "rel" | "R" => Ok(Self::Reloc),
            "A2" => Ok(Self::A2),
            "B2" => Ok(Self::B2),
            _ => Err(Error::FileTypeMismatch)
        }
    }
}

impl FileType {
    /// the single-letter tag DOS prints in a catalog
    pub fn letter(&self) -> &'static str {
        match self {
            Self::Text => "T",
            Self::Integer => "I",
            Self::Applesoft => "A",
            Self::Binary => "B",
            Self::S => "S",
            Self::Reloc => "R",
            Self::A2 => "A2",
            Self::B2 => "B2"
        }
    }
    /// equivalent ProDOS file type
    pub fn prodos_type(&self) -> u8 {
        match self {
            Self::Text => 0x04,        // TXT
            Self::Integer => 0xfa,     // INT
            Self::Applesoft => 0xfc,   // BAS
            Self::Binary => 0x06,      // BIN
            Self::Reloc => 0xfe,       // REL
            Self::S => 0xf2,
            Self::A2 => 0xf3,
            Self::B2 => 0xf4
        }
    }
    /// decode the catalog type byte, ignoring the lock bit; mixed bit
    /// patterns resolve to the lowest set bit the way DOS displays them
    pub fn from_type_byte(byte: u8) -> Self {
        let typ = byte & 0x7f;
        for cand in [Self::Integer,Self::Applesoft,Self::Binary,Self::S,Self::Reloc,Self::A2,Self::B2] {
            if typ & (cand as u8) > 0 {
                return cand;
            }
        }
        Self::Text
    }
    pub fn from_prodos_type(prodos_type: u8) -> Option<Self> {
        match prodos_type {
            0x04 | 0xb0 => Some(Self::Text),    // TXT, SRC
            0xfa => Some(Self::Integer),
            0xfc => Some(Self::Applesoft),
            0x06 | 0x00 | 0xf2..=0xf4 | 0xff => Some(Self::Binary),
            0xfe => Some(Self::Reloc),
            _ => None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_byte_decoding() {
        assert_eq!(FileType::from_type_byte(0x00),FileType::Text);
        assert_eq!(FileType::from_type_byte(0x80),FileType::Text);
        assert_eq!(FileType::from_type_byte(0x84),FileType::Binary);
        assert_eq!(FileType::from_type_byte(0x02),FileType::Applesoft);
    }

    #[test]
    fn mnemonics() {
        assert!(matches!(FileType::from_str("bin"),Ok(FileType::Binary)));
        assert!(matches!(FileType::from_str("4"),Ok(FileType::Binary)));
        assert!(FileType::from_str("nope").is_err());
    }
}
