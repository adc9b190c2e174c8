use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::str::FromStr;

pub const BLOCK_SIZE: usize = 512;
pub const VOL_HEADER_BLOCK: usize = 2;
/// the volume directory is this many blocks, starting at block 2
pub const DIR_BLOCKS: usize = 4;
pub const ENTRY_SIZE: usize = 26;
pub const MAX_VOLUME_NAME: usize = 7;
pub const MAX_FILE_NAME: usize = 15;
pub const INVALID_CHARS: &str = "$=?,[#:";
/// sanity cap while walking an allegedly huge directory
pub const HUGE_DIR: usize = 32;

/// Enumerates Pascal errors.  The `Display` trait will print the long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("illegal filename")]
    BadTitle,
    #[error("insufficient space")]
    NoRoom,
    #[error("no file")]
    NoFile,
    #[error("duplicate file")]
    DuplicateFilename,
    #[error("disk is write protected")]
    WriteProtected,
    #[error("failed to complete read or write")]
    DevErr
}

/// Enumerates the Pascal file types, available conversions are:
/// * Type to u16: `as u16`
/// * u16 to Type: `FromPrimitive::from_u16`
/// * &str to Type: `Type::from_str`, str can be a number or mnemonic
#[derive(FromPrimitive,Clone,Copy,PartialEq,Eq,Debug)]
pub enum FileType {
    Untyped = 0x00,
    Bad = 0x01,
    Code = 0x02,
    Text = 0x03,
    Info = 0x04,
    Data = 0x05,
    Graf = 0x06,
    Foto = 0x07,
    SecureDir = 0x08
}

impl FromStr for FileType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        // string can be the number itself
        if let Ok(num) = u16::from_str(s) {
            return match FromPrimitive::from_u16(num) {
                Some(typ) => Ok(typ),
                _ => Err(Error::BadTitle)
            };
        }
        // or a mnemonic
        match s {
            "pcode" | "CODE" => Ok(Self::Code),
            "txt" | "TEXT" => Ok(Self::Text),
            "bin" | "DATA" => Ok(Self::Data),
            "INFO" => Ok(Self::Info),
            "GRAF" => Ok(Self::Graf),
            "FOTO" => Ok(Self::Foto),
            _ => Err(Error::BadTitle)
        }
    }
}

impl FileType {
    /// tag printed by the LIST command
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Untyped => "NONE",
            Self::Bad => "BAD",
            Self::Code => "CODE",
            Self::Text => "TEXT",
            Self::Info => "INFO",
            Self::Data => "DATA",
            Self::Graf => "GRAF",
            Self::Foto => "FOTO",
            Self::SecureDir => "SECURE"
        }
    }
    /// equivalent ProDOS file type
    pub fn prodos_type(&self) -> u8 {
        match self {
            Self::Untyped | Self::SecureDir => 0x00,    // NON
            Self::Bad => 0x01,                          // BAD
            Self::Code => 0x02,                         // PCD
            Self::Text => 0x03,                         // PTX
            Self::Info => 0xf9,
            Self::Data => 0x05,                         // PDA
            Self::Graf | Self::Foto => 0x08             // FOT
        }
    }
    pub fn from_prodos_type(prodos_type: u8) -> Self {
        match prodos_type {
            0x01 => Self::Bad,
            0x02 => Self::Code,
            0x03 | 0x04 | 0xb0 => Self::Text,
            0x05 => Self::Data,
            0x08 => Self::Foto,
            0xf9 => Self::Info,
            _ => Self::Data
        }
    }
}

/// Pack a date into the Pascal 16-bit form: month in the low 4 bits, day in
/// the next 5, year mod 100 in the top 7.
pub fn pack_date(time: Option<chrono::NaiveDateTime>) -> [u8;2] {
    use chrono::Datelike;
    let now = match time {
        Some(t) => t,
        _ => chrono::Local::now().naive_local()
    };
    let (_is_ce,year) = now.year_ce();
    let packed = (now.month() + (now.day() << 4) + ((year%100) << 9)) as u16;
    u16::to_le_bytes(packed)
}

/// Unpack a Pascal date.  Month 0 means "no date"; year 100 is the
/// documented filer marker for a file in progress, not a real date, so both
/// come back as `None`.
pub fn unpack_date(pascal_date: [u8;2]) -> Option<chrono::NaiveDateTime> {
    let date = u16::from_le_bytes(pascal_date);
    let month = date & 15;
    let day = (date >> 4) & 31;
    let stored_year = date >> 9;
    if month == 0 || stored_year == 100 {
        return None;
    }
    let year = match stored_year < 40 {
        true => 2000 + stored_year,
        false => 1900 + stored_year
    };
    match chrono::NaiveDate::from_ymd_opt(year as i32,month as u32,day as u32) {
        Some(d) => d.and_hms_opt(0,0,0),
        None => None
    }
}

/// length caps, character whitelist, no ambiguity with wildcard syntax
pub fn is_valid_file_name(name: &str) -> bool {
    if name.len() < 1 || name.len() > MAX_FILE_NAME {
        return false;
    }
    for ch in name.chars() {
        if (ch as u32) <= 0x20 || (ch as u32) >= 0x7f || INVALID_CHARS.contains(ch) {
            return false;
        }
    }
    true
}

pub fn is_valid_volume_name(name: &str) -> bool {
    name.len() >= 1 && name.len() <= MAX_VOLUME_NAME && is_valid_file_name(name)
}

/// Turn an arbitrary host name into something the filer will take: upper
/// case, offending characters become underscores, at most 15 characters.
pub fn normalize_name(name: &str) -> String {
    let mut ans = String::new();
    for ch in name.chars().take(MAX_FILE_NAME) {
        if (ch as u32) <= 0x20 || (ch as u32) >= 0x7f || INVALID_CHARS.contains(ch) {
            ans.push('_');
        } else {
            ans.push(ch.to_ascii_uppercase());
        }
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_round_trip() {
        let date = chrono::NaiveDate::from_ymd_opt(1983,6,15).unwrap().and_hms_opt(0,0,0).unwrap();
        let packed = pack_date(Some(date));
        assert_eq!(unpack_date(packed),Some(date));
    }

    #[test]
    fn no_date_and_in_progress() {
        assert_eq!(unpack_date([0,0]),None);
        // year 100 with a valid month/day is the "in progress" marker
        let marker = (3u16 + (1 << 4) + (100 << 9)).to_le_bytes();
        assert_eq!(unpack_date(marker),None);
    }

    #[test]
    fn name_rules() {
        assert!(is_valid_file_name("SYSTEM.PASCAL"));
        assert!(!is_valid_file_name("BAD NAME"));
        assert!(!is_valid_file_name("WHAT?"));
        assert!(!is_valid_file_name("WAYTOOLONGFILENAME"));
        assert!(is_valid_volume_name("MYDISK"));
        assert!(!is_valid_volume_name("TOOLONGVOL"));
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_name("my file?.txt"),"MY_FILE_.TXT");
        assert_eq!(normalize_name("averylongpascalname"),"AVERYLONGPASCAL");
        assert!(is_valid_file_name(&normalize_name("what [now]")));
    }
}
