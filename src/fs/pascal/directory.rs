//! ### Pascal directory structures
//! These are fixed length structures, with the DiskStruct trait.

// a2kit_macro automatically derives `new`, `to_bytes`, `from_bytes`, and `len` from a DiskStruct.
use a2kit_macro::{DiskStruct,DiskStructError};
use a2kit_macro_derive::DiskStruct;

/// Entry 0 of the volume directory.  `next_block` is the first block past
/// the directory, which doubles as the directory length.
#[derive(DiskStruct)]
pub struct VolHeader {
    pub start_block: [u8;2],
    pub next_block: [u8;2],
    pub ftype: [u8;2],
    pub name_len: u8,
    pub name: [u8;7],
    pub total_blocks: [u8;2],
    pub num_files: [u8;2],
    pub last_access: [u8;2],
    pub last_date_set: [u8;2],
    pub pad: [u8;4]
}

/// Entries 1..num_files.  Files are contiguous block runs; the length is
/// `(next_block - start_block - 1)*512 + bytes_remaining`.
#[derive(DiskStruct)]
pub struct FileEntry {
    pub start_block: [u8;2],
    pub next_block: [u8;2],
    pub ftype: [u8;2],
    pub name_len: u8,
    pub name: [u8;15],
    pub bytes_remaining: [u8;2],
    pub mod_date: [u8;2]
}

impl FileEntry {
    pub fn start(&self) -> usize {
        u16::from_le_bytes(self.start_block) as usize
    }
    pub fn next(&self) -> usize {
        u16::from_le_bytes(self.next_block) as usize
    }
    pub fn name_str(&self) -> String {
        let len = usize::min((self.name_len & 0x0f) as usize,15);
        String::from_utf8_lossy(&self.name[0..len]).to_string()
    }
    pub fn set_name(&mut self,name: &str) {
        let up = name.to_uppercase();
        let bytes = up.as_bytes();
        let len = usize::min(bytes.len(),15);
        self.name = [0;15];
        self.name[0..len].copy_from_slice(&bytes[0..len]);
        self.name_len = len as u8;
    }
}
