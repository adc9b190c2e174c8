use a2kit_macro::{DiskStruct,DiskStructError};
use a2kit_macro_derive::DiskStruct;

/// ProDOS block where the directory starts (track 3 sector 0)
pub const VOL_DIR_BLOCK: usize = 24;
pub const VOL_DIR_COUNT: usize = 4;
pub const FULL_DIR_SIZE: usize = VOL_DIR_COUNT*512;
pub const DIR_ENTRY_LEN: usize = 32;
pub const NUM_DIR_ENTRIES: usize = FULL_DIR_SIZE/DIR_ENTRY_LEN;
/// an erased entry starts with this byte
pub const NO_DATA_BYTE: u8 = 0xe5;
/// 0-15 on some systems, 0-31 on others
pub const MAX_USER_NUMBER: u8 = 31;
/// 0x20 and 0x21 mark volume labels and date stamps
pub const MAX_SPECIAL_USER_NUMBER: u8 = 0x21;
pub const MAX_EXTENT: u8 = 31;
/// extent counter wraps into the S2 byte every 32
pub const EXTENTS_IN_LOW_BYTE: usize = 32;
/// blocks named by one extent
pub const DIR_ENTRY_BLOCK_COUNT: usize = 16;
/// a CP/M allocation block is 1K, i.e. two consecutive ProDOS blocks
pub const CPM_BLOCK_SIZE: usize = 1024;
pub const RECORD_SIZE: usize = 128;
pub const MAX_FILE_NAME: usize = 12;    // 8 + '.' + 3

/// One 32-byte directory entry; a file larger than 16K spans several of
/// these, distinguished by the extent counter.
#[derive(DiskStruct,Clone)]
pub struct DirEntry {
    pub user_number: u8,
    /// high bits are attribute flags
    pub name: [u8;8],
    /// high bits: read-only, system, changed
    pub ext: [u8;3],
    pub extent_low: u8,
    pub s1: u8,
    pub s2: u8,
    pub records: u8,
    pub blocks: [u8;16]
}

impl DirEntry {
    pub fn extent(&self) -> usize {
        self.extent_low as usize + self.s2 as usize * EXTENTS_IN_LOW_BYTE
    }
    pub fn read_only(&self) -> bool {
        self.ext[0] & 0x80 > 0
    }
    pub fn system(&self) -> bool {
        self.ext[1] & 0x80 > 0
    }
    /// name with high bits stripped, still space padded
    pub fn raw_name(&self) -> ([u8;8],[u8;3]) {
        let mut name = [0u8;8];
        let mut ext = [0u8;3];
        for i in 0..8 {
            name[i] = self.name[i] & 0x7f;
        }
        for i in 0..3 {
            ext[i] = self.ext[i] & 0x7f;
        }
        (name,ext)
    }
}

/// Reformat from 11 chars with spaces into clean `xxxxx.yyy` form.
pub fn format_name(entry: &DirEntry) -> String {
    let (name,ext) = entry.raw_name();
    let base: String = name.iter()
        .take_while(|c| **c != b' ' && **c != 0)
        .map(|c| match *c { b':' => 'X', c => c as char })
        .collect();
    let tail: String = ext.iter()
        .take_while(|c| **c != b' ' && **c != 0)
        .map(|c| match *c { b':' => 'X', c => c as char })
        .collect();
    match tail.len() {
        0 => format!("{}.",base),
        _ => format!("{}.{}",base,tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a2kit_macro::DiskStruct;

    #[test]
    fn entry_layout() {
        let entry = DirEntry::new();
        assert_eq!(entry.len(),DIR_ENTRY_LEN);
    }

    #[test]
    fn name_formatting() {
        let mut entry = DirEntry::new();
        entry.name = *b"PIP     ";
        entry.ext = *b"COM";
        assert_eq!(format_name(&entry),"PIP.COM");
        entry.ext = *b"   ";
        assert_eq!(format_name(&entry),"PIP.");
    }

    #[test]
    fn extent_counter() {
        let mut entry = DirEntry::new();
        entry.extent_low = 5;
        entry.s2 = 2;
        assert_eq!(entry.extent(),69);
    }
}
