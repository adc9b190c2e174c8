//! # FAT identification module
//!
//! MS-DOS volumes turn up on Apple hardware via CFFA cards and the like.
//! We identify them so the user knows what they have, but do not interpret
//! the file system: block 0 is probed for either a master boot record or a
//! BIOS parameter block, and a single descriptive pseudo-file is exposed.

use log::{debug,trace};
use super::{FileInfo,FilePayload,Handle,OpenFiles};
use super::usage::VolumeUsage;
use crate::img::{DiskImg,FsFormat,SectorOrder};
use crate::{DYNERR,STDRESULT};

const BOOT_BLOCK: usize = 0;
const OPCODE_BRANCH: u8 = 0xeb;
const OPCODE_SET_INT: u8 = 0xfa;
const OPCODE_MUMBLE: u8 = 0x33;     // seen on a WinImage-generated FAT32 volume
const SIGNATURE: u16 = 0xaa55;
/// ignore anything smaller; the filesystems we actually support get
/// the first chance at little disks
const MIN_INTERESTING_BLOCKS: usize = 2048;

struct PartitionEntry {
    drive_num: u8,
    start_lba: u32,
    size: u32
}

/// Probe for a master boot record: a plausible opcode, the 0xAA55 trailer,
/// and four partition entries with sane drive-active markers.
fn unpack_mbr(buf: &[u8]) -> Option<Vec<PartitionEntry>> {
    if buf[0] != OPCODE_BRANCH && buf[0] != OPCODE_SET_INT && buf[0] != OPCODE_MUMBLE {
        return None;
    }
    let mut parts = Vec::new();
    for i in 0..4 {
        let ptr = &buf[0x1be + i*16..0x1be + (i+1)*16];
        // must be 0x00 or 0x80; CFFA cards don't seem to set "active"
        if ptr[0] != 0x00 && ptr[0] != 0x80 {
            return None;
        }
        parts.push(PartitionEntry {
            drive_num: ptr[0],
            start_lba: u32::from_le_bytes([ptr[8],ptr[9],ptr[10],ptr[11]]),
            size: u32::from_le_bytes([ptr[12],ptr[13],ptr[14],ptr[15]])
        });
    }
    Some(parts)
}

struct BootSector {
    sect_per_cluster: u8,
    num_sectors: u32,
    volume_label: [u8;11]
}

/// Probe for a BIOS parameter block: a jump opcode and 512-byte sectors.
fn unpack_boot_sector(buf: &[u8]) -> Option<BootSector> {
    if buf[0] != OPCODE_BRANCH && buf[0] != OPCODE_SET_INT {
        return None;
    }
    if u16::from_le_bytes([buf[0x0b],buf[0x0c]]) != 512 {
        return None;
    }
    let num_sectors = match u16::from_le_bytes([buf[0x13],buf[0x14]]) {
        0 => u32::from_le_bytes([buf[0x20],buf[0x21],buf[0x22],buf[0x23]]),
        n => n as u32
    };
    let mut volume_label = [0u8;11];
    volume_label.copy_from_slice(&buf[0x2b..0x36]);
    Some(BootSector {
        sect_per_cluster: buf[0x0d],
        num_sectors,
        volume_label
    })
}

/// The identified-but-unsupported FAT volume.
pub struct Disk {
    img: DiskImg,
    usage: VolumeUsage,
    files: Vec<FileInfo>,
    open_files: OpenFiles,
    volume_name: String
}

impl Disk {
    pub fn test(img: &mut DiskImg) -> bool {
        if img.num_blocks() < MIN_INTERESTING_BLOCKS {
            debug!("FAT ignoring small image ({} blocks)",img.num_blocks());
            return false;
        }
        let buf = match img.read_block_swapped(BOOT_BLOCK,SectorOrder::ProDos,SectorOrder::ProDos) {
            Ok(buf) => buf,
            Err(_) => return false
        };
        if u16::from_le_bytes([buf[0x1fe],buf[0x1ff]]) != SIGNATURE {
            return false;
        }
        if unpack_mbr(&buf).is_some() {
            trace!("FAT found master boot record");
            return true;
        }
        if unpack_boot_sector(&buf).is_some() {
            trace!("FAT found BIOS parameter block");
            return true;
        }
        false
    }

    pub fn mount(mut img: DiskImg) -> Result<Self,DYNERR> {
        let buf = img.read_block(BOOT_BLOCK)?;
        let mut volume_name = "FAT volume".to_string();
        let mut detail = String::new();
        if let Some(parts) = unpack_mbr(&buf) {
            let active = parts.iter().filter(|p| p.drive_num == 0x80).count();
            let total: u64 = parts.iter().map(|p| p.size as u64).sum();
            detail = format!("partitioned MS-DOS volume, {} active, {} sectors at LBA {}",
                active,total,parts[0].start_lba);
        } else if let Some(bs) = unpack_boot_sector(&buf) {
            volume_name = String::from_utf8_lossy(&bs.volume_label).trim_end().to_string();
            if volume_name.is_empty() {
                volume_name = "FAT volume".to_string();
            }
            detail = format!("MS-DOS volume, {} sectors, {} per cluster",bs.num_sectors,bs.sect_per_cluster);
        }
        let usage = VolumeUsage::new_blocks(img.num_blocks());
        // a single "unsupported, described" pseudo-file
        let mut finfo = FileInfo::new(detail,FilePayload::Opaque);
        finfo.locked = true;
        Ok(Self {
            img,
            usage,
            files: vec![finfo],
            open_files: OpenFiles::new(),
            volume_name
        })
    }
}

impl super::DiskFS for Disk {
    fn fs_format(&self) -> FsFormat {
        FsFormat::Fat
    }
    fn volume_id(&self) -> String {
        self.volume_name.clone()
    }
    fn is_good(&self) -> bool {
        // readable, never writable
        true
    }
    fn list_files(&self) -> &Vec<FileInfo> {
        &self.files
    }
    fn usage(&self) -> &VolumeUsage {
        &self.usage
    }
    fn open(&mut self,_name: &str) -> Result<Handle,DYNERR> {
        Err(Box::new(super::Error::NotSupported))
    }
    fn close(&mut self,handle: Handle) -> STDRESULT {
        self.open_files.close(handle.slot)
    }
    fn get_img(&mut self) -> &mut DiskImg {
        &mut self.img
    }
}
