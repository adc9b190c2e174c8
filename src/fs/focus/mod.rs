//! # FocusDrive partition container
//!
//! The Parsons Engineering FocusDrive keeps its partition map in block 0:
//! an ASCII signature, an 8-bit partition count, and thirty 16-byte entries
//! starting at offset 0x20 with little-endian start and length.  Partition
//! names live in blocks 1 and 2, 32 characters apiece starting 32 bytes in.
//! The format was reverse-engineered from real drives.
//!
//! Each partition is opened as a sub-image and probed recursively, just
//! like the Macintosh map.

use log::{debug,info};
use super::{FileInfo,Handle,OpenFiles,SubVolume,SubVolumeScan};
use super::usage::{ChunkPurpose,VolumeUsage};
use crate::img::{DiskImg,FsFormat,NoteKind,SectorOrder};
use crate::{DYNERR,STDRESULT};

const PART_MAP_BLOCK: usize = 0;
const MAX_PARTITIONS: usize = 30;
/// partition names start here (2 blocks)
const PART_NAME_START: usize = 1;
const PART_NAME_LEN: usize = 32;
const SIGNATURE: &[u8;14] = b"Parsons Engin.";
const MIN_INTERESTING_BLOCKS: usize = 2048;

struct MapEntry {
    start: usize,
    count: usize,
    name: String
}

/// The container: owns the parent image and the recursively mounted
/// partitions.
pub struct Disk {
    img: DiskImg,
    usage: VolumeUsage,
    files: Vec<FileInfo>,
    open_files: OpenFiles,
    subs: Vec<SubVolume>
}

impl Disk {
    pub fn test(img: &mut DiskImg) -> bool {
        if img.num_blocks() < MIN_INTERESTING_BLOCKS {
            return false;
        }
        let buf = match img.read_block_swapped(PART_MAP_BLOCK,SectorOrder::ProDos,SectorOrder::ProDos) {
            Ok(buf) => buf,
            Err(_) => return false
        };
        if &buf[0..SIGNATURE.len()] != SIGNATURE {
            debug!("FocusDrive partition signature not found in first part block");
            return false;
        }
        let part_count = buf[0x0f] as usize;
        if part_count == 0 || part_count > MAX_PARTITIONS {
            debug!("FocusDrive partition count looks bad ({})",part_count);
            return false;
        }
        debug!("looks like FocusDrive with {} partitions",part_count);
        true
    }

    pub fn mount(mut img: DiskImg,scan: SubVolumeScan) -> Result<Self,DYNERR> {
        let map_buf = img.read_block(PART_MAP_BLOCK)?;
        let mut name_buf = img.read_block(PART_NAME_START)?;
        name_buf.append(&mut img.read_block(PART_NAME_START+1)?);
        let part_count = usize::min(map_buf[0x0f] as usize,MAX_PARTITIONS);
        let mut entries: Vec<MapEntry> = Vec::new();
        for i in 0..part_count {
            let ptr = &map_buf[0x20 + i*16..0x20 + (i+1)*16];
            // not sure what the first 32 bytes of the name area are
            let name_ptr = &name_buf[PART_NAME_LEN + i*PART_NAME_LEN..PART_NAME_LEN + (i+1)*PART_NAME_LEN];
            let end = name_ptr.iter().position(|b| *b == 0).unwrap_or(PART_NAME_LEN);
            entries.push(MapEntry {
                start: u32::from_le_bytes([ptr[0],ptr[1],ptr[2],ptr[3]]) as usize,
                count: u32::from_le_bytes([ptr[4],ptr[5],ptr[6],ptr[7]]) as usize,
                name: String::from_utf8_lossy(&name_ptr[0..end]).to_string()
            });
        }
        let mut usage = VolumeUsage::new_blocks(img.num_blocks());
        for b in 0..=PART_NAME_START+1 {
            usage.claim_block(b,ChunkPurpose::System)?;
        }
        let mut disk = Self {
            img,
            usage,
            files: Vec::new(),
            open_files: OpenFiles::new(),
            subs: Vec::new()
        };
        for entry in entries {
            disk.open_sub_volume(entry,scan)?;
        }
        Ok(disk)
    }

    fn open_sub_volume(&mut self,entry: MapEntry,scan: SubVolumeScan) -> STDRESULT {
        let total = self.img.num_blocks();
        let mut count = entry.count;
        info!("adding '{}' {} +{}",entry.name,entry.start,count);
        if entry.start > total || count == 0 {
            self.img.add_note(NoteKind::Warning,format!("partition '{}' lies out of range",entry.name));
            return Ok(());
        }
        if entry.start + count > total {
            self.img.add_note(NoteKind::Info,format!("reduced partition '{}' from {} blocks to {}",
                entry.name,count,total-entry.start));
            count = total - entry.start;
        }
        for b in entry.start..entry.start+count {
            self.usage.claim_block(b,ChunkPurpose::Embedded)?;
        }
        let sub_img = self.img.sub_image(entry.start,count)?;
        let fs = match scan {
            SubVolumeScan::Disabled => None,
            _ => match super::mount_sub_image(sub_img,scan) {
                Ok(fs) => Some(fs),
                Err(e) => {
                    // keep the partition visible even when unidentified
                    debug!("sub-volume '{}' not identified: {}",entry.name,e);
                    None
                }
            }
        };
        self.subs.push(SubVolume {
            name: entry.name,
            kind: "FocusDrive partition".to_string(),
            start_block: entry.start,
            num_blocks: count,
            fs
        });
        Ok(())
    }
}

impl super::DiskFS for Disk {
    fn fs_format(&self) -> FsFormat {
        FsFormat::FocusDrive
    }
    fn volume_id(&self) -> String {
        format!("FocusDrive ({} partitions)",self.subs.len())
    }
    fn is_good(&self) -> bool {
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
    fn sub_volumes(&self) -> &[SubVolume] {
        &self.subs
    }
    fn get_img(&mut self) -> &mut DiskImg {
        &mut self.img
    }
}
