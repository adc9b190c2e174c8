//! # Macintosh partition container
//!
//! Mac-style media begin with a Driver Descriptor Record (`ER` signature) in
//! block 0 and a chain of big-endian partition map entries (`PM` signature)
//! from block 1; the first entry's map count says how many follow.  Each
//! partition becomes a sub-image spanning its block range, which gets the
//! full analysis recursively.  A partition whose contents cannot be
//! identified still shows up, as a placeholder without a mounted file
//! system.
//!
//! These can nest (an Apple II hard image inside a Mac partition inside a
//! CD image), so the sub-image depth limit does real work here.

use log::{debug,info,trace};
use super::{FileInfo,Handle,OpenFiles,SubVolume,SubVolumeScan};
use super::usage::{ChunkPurpose,VolumeUsage};
use crate::img::{DiskImg,FsFormat,NoteKind,SectorOrder};
use crate::{DYNERR,STDRESULT};

const DDR_BLOCK: usize = 0;
const PART_MAP_START: usize = 1;
/// 'ER' big-endian
const DDR_SIGNATURE: u16 = 0x4552;
/// 'PM' big-endian
const PARTITION_SIGNATURE: u16 = 0x504d;
const BLOCK_SIZE: usize = 512;
const MAX_MAP_BLOCKS: u32 = 256;
/// don't probe tiny images, a floppy can't hold a partition map worth having
const MIN_INTERESTING_BLOCKS: usize = 2048;

struct MapEntry {
    start: usize,
    count: usize,
    name: String,
    kind: String
}

fn get_u16_be(buf: &[u8],offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset],buf[offset+1]])
}

fn get_u32_be(buf: &[u8],offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset],buf[offset+1],buf[offset+2],buf[offset+3]])
}

fn c_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[0..end]).to_string()
}

fn unpack_map_entry(buf: &[u8]) -> Option<MapEntry> {
    if get_u16_be(buf,0x00) != PARTITION_SIGNATURE {
        return None;
    }
    Some(MapEntry {
        start: get_u32_be(buf,0x08) as usize,
        count: get_u32_be(buf,0x0c) as usize,
        name: c_string(&buf[0x10..0x30]),
        kind: c_string(&buf[0x30..0x50])
    })
}

/// The container: owns the parent image and the recursively mounted
/// partitions.  No files of its own.
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
        let ddr = match img.read_block_swapped(DDR_BLOCK,SectorOrder::ProDos,SectorOrder::ProDos) {
            Ok(buf) => buf,
            Err(_) => return false
        };
        if get_u16_be(&ddr,0x00) != DDR_SIGNATURE {
            return false;
        }
        let blk_size = get_u16_be(&ddr,0x02);
        let blk_count = get_u32_be(&ddr,0x04);
        if blk_size != BLOCK_SIZE as u16 || blk_count == 0 {
            if blk_size == 0 && blk_count == 0 {
                // zeroed-out DDRs turn up on floptical images, keep going
                debug!("found zeroed-out DDR, continuing anyway");
            } else if blk_size == BLOCK_SIZE as u16 && blk_count == 0 {
                debug!("found partially-zeroed-out DDR, continuing");
            } else {
                debug!("found 'ER' signature but blkSize={} blkCount={}",blk_size,blk_count);
                return false;
            }
        }
        // make sure block 1 really is a partition map
        let map = match img.read_block_swapped(PART_MAP_START,SectorOrder::ProDos,SectorOrder::ProDos) {
            Ok(buf) => buf,
            Err(_) => return false
        };
        if get_u16_be(&map,0x00) != PARTITION_SIGNATURE {
            debug!("MacPart partition signature not found in first part block");
            return false;
        }
        let map_blk_cnt = get_u32_be(&map,0x04);
        if map_blk_cnt == 0 || map_blk_cnt > MAX_MAP_BLOCKS {
            debug!("MacPart unreasonable pmMapBlkCnt value {}",map_blk_cnt);
            return false;
        }
        trace!("MacPart partition map block count = {}",map_blk_cnt);
        true
    }

    pub fn mount(mut img: DiskImg,scan: SubVolumeScan) -> Result<Self,DYNERR> {
        let first = img.read_block(PART_MAP_START)?;
        let map_blk_cnt = get_u32_be(&first,0x04) as usize;
        let mut entries: Vec<MapEntry> = Vec::new();
        for i in 0..map_blk_cnt {
            let buf = img.read_block(PART_MAP_START + i)?;
            match unpack_map_entry(&buf) {
                Some(entry) => entries.push(entry),
                None => {
                    img.add_note(NoteKind::Warning,format!("partition map entry {} is malformed",i));
                    break;
                }
            }
        }
        let mut usage = VolumeUsage::new_blocks(img.num_blocks());
        for b in 0..=map_blk_cnt.min(img.num_blocks()-1) {
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
        info!("adding '{}' ({}) {} +{}",entry.name,entry.kind,entry.start,count);
        if entry.start > total {
            self.img.add_note(NoteKind::Warning,format!("partition '{}' starts out of range",entry.name));
            return Ok(());
        }
        if entry.start + count > total {
            self.img.add_note(NoteKind::Info,format!("reduced partition '{}' ({}) from {} blocks to {}",
                entry.name,entry.kind,count,total-entry.start));
            count = total - entry.start;
        }
        if count == 0 {
            return Ok(());
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
                    // still create a placeholder so the partition is visible
                    debug!("sub-volume '{}' not identified: {}",entry.name,e);
                    None
                }
            }
        };
        self.subs.push(SubVolume {
            name: entry.name,
            kind: entry.kind,
            start_block: entry.start,
            num_blocks: count,
            fs
        });
        Ok(())
    }
}

impl super::DiskFS for Disk {
    fn fs_format(&self) -> FsFormat {
        FsFormat::MacPart
    }
    fn volume_id(&self) -> String {
        format!("Macintosh partition map ({} partitions)",self.subs.len())
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
