//! # CP/M file system module
//!
//! Apple II CP/M keeps a 2K directory at ProDOS block 24 (track 3 under the
//! CP/M skew).  Sixteen-byte halves of the story: each 32-byte entry names
//! up to 16 one-kilobyte allocation blocks, and a file bigger than that
//! continues in further entries ("extents") under the same name and user
//! number.  The length comes from the last extent: full extents are billed
//! at 16K, the last one by its 128-byte record count.
//!
//! Limitations follow the original implementation: read-only, user numbers
//! are mostly ignored, special entries (volume label, date stamps,
//! passwords) are skipped, and rumor-only sparse files are not handled.

pub mod types;

use log::{debug,trace};
use a2kit_macro::DiskStruct;
use types::*;
use super::{Chunk,FileInfo,FilePayload,Handle,OpenFiles,Quality};
use super::usage::{ChunkPurpose,VolumeUsage};
use crate::img::{DiskImg,FsFormat,SectorOrder};
use crate::{DYNERR,STDRESULT};

/// The primary interface for CP/M disk operations.
pub struct Disk {
    img: DiskImg,
    dir: Vec<DirEntry>,
    usage: VolumeUsage,
    files: Vec<FileInfo>,
    open_files: OpenFiles,
    disk_is_good: bool
}

fn read_dir_raw(img: &mut DiskImg,order: SectorOrder) -> Result<Vec<u8>,DYNERR> {
    let mut ans = Vec::with_capacity(FULL_DIR_SIZE);
    for i in 0..VOL_DIR_COUNT {
        ans.append(&mut img.read_block_swapped(VOL_DIR_BLOCK+i,order,SectorOrder::Cpm)?);
    }
    Ok(ans)
}

fn test_image(img: &mut DiskImg,order: SectorOrder) -> bool {
    let dir = match read_dir_raw(img,order) {
        Ok(dir) => dir,
        Err(_) => return false
    };
    for i in 0..NUM_DIR_ENTRIES {
        let dptr = &dir[i*DIR_ENTRY_LEN..(i+1)*DIR_ENTRY_LEN];
        if dptr[0] == NO_DATA_BYTE {
            continue;
        }
        // usually user number is 0, but 0x20/0x21 mark special entries
        if dptr[0] > MAX_SPECIAL_USER_NUMBER {
            return false;
        }
        if dptr[12] > MAX_EXTENT {
            return false;
        }
        // check for a valid first filename char; high bit may be set
        if dptr[1] & 0x7f < 0x20 {
            return false;
        }
    }
    trace!("CPM found clean directory, imageOrder={}",order);
    true
}

impl Disk {
    /// Test for a CP/M volume by scanning the directory for nonsense.
    /// Returns the matching sector order, if any.
    pub fn test(img: &mut DiskImg) -> Option<SectorOrder> {
        // CP/M disks use 1K blocks, so ignore anything with an odd count
        if img.num_blocks() == 0 || img.num_blocks()%2 != 0 {
            debug!("CPM rejecting image with numBlocks={}",img.num_blocks());
            return None;
        }
        for order in SectorOrder::candidates(img.order) {
            if test_image(img,order) {
                return Some(order);
            }
        }
        None
    }

    pub fn mount(mut img: DiskImg) -> Result<Self,DYNERR> {
        let order = img.order;
        let raw = read_dir_raw(&mut img,order)?;
        let mut dir = Vec::with_capacity(NUM_DIR_ENTRIES);
        for i in 0..NUM_DIR_ENTRIES {
            dir.push(DirEntry::from_bytes(&raw[i*DIR_ENTRY_LEN..(i+1)*DIR_ENTRY_LEN])?);
        }
        let usage = VolumeUsage::new_blocks(img.num_blocks());
        let mut disk = Self {
            img,
            dir,
            usage,
            files: Vec::new(),
            open_files: OpenFiles::new(),
            disk_is_good: false
        };
        disk.read_catalog();
        disk.scan_file_usage()?;
        disk.disk_is_good = true;
        let (damaged,_suspicious) = super::scan_for_damaged_files(&disk.files);
        if damaged {
            disk.disk_is_good = false;
        }
        disk.usage.dump();
        Ok(disk)
    }

    fn max_cpm_block(&self) -> usize {
        (self.img.num_blocks() - VOL_DIR_BLOCK)/2
    }

    /// Build one file per extent-zero entry, merging the other extents.
    fn read_catalog(&mut self) {
        let max_block = self.max_cpm_block();
        for i in 0..self.dir.len() {
            if self.dir[i].user_number == NO_DATA_BYTE || self.dir[i].extent() != 0 {
                continue;
            }
            if self.dir[i].user_number > MAX_USER_NUMBER {
                // skip over volume label, date stamps, etc
                debug!("skipping entry with userNumber={:#04x}",self.dir[i].user_number);
                continue;
            }
            let name = format_name(&self.dir[i]);
            // gather every extent of the file, in extent order
            let mut extents: Vec<usize> = Vec::new();
            for j in 0..self.dir.len() {
                if self.dir[j].user_number == self.dir[i].user_number &&
                    self.dir[j].raw_name() == self.dir[i].raw_name() {
                    extents.push(j);
                }
            }
            extents.sort_by_key(|j| self.dir[*j].extent());
            let mut quality = Quality::Good;
            for j in &extents {
                if self.dir[*j].blocks.iter().any(|b| *b as usize >= max_block) {
                    debug!("invalid block in file '{}'",name);
                    quality = Quality::Damaged;
                }
            }
            let max_extent = self.dir[extents[extents.len()-1]].extent();
            let last = &self.dir[extents[extents.len()-1]];
            let length = DIR_ENTRY_BLOCK_COUNT*CPM_BLOCK_SIZE*max_extent + last.records as usize*RECORD_SIZE;
            let mut finfo = FileInfo::new(name,FilePayload::Cpm { extents: extents.clone() });
            finfo.length = length;
            finfo.sparse_length = length;
            finfo.locked = self.dir[i].read_only();
            finfo.quality = quality;
            finfo.sectors = extents.iter()
                .map(|j| self.dir[*j].blocks.iter().filter(|b| **b != 0).count()*2)
                .sum();
            self.files.push(finfo);
        }
    }

    fn scan_file_usage(&mut self) -> STDRESULT {
        // boot area and the directory's own CP/M blocks
        for b in 0..VOL_DIR_BLOCK.min(self.img.num_blocks()) {
            self.usage.claim_block(b,ChunkPurpose::System)?;
        }
        for b in 0..VOL_DIR_COUNT {
            self.usage.claim_block(VOL_DIR_BLOCK+b,ChunkPurpose::VolumeDir)?;
        }
        for f in self.files.clone() {
            if let FilePayload::Cpm { extents } = &f.payload {
                for j in extents {
                    for cpm_block in self.dir[*j].blocks {
                        if cpm_block == 0 {
                            continue;
                        }
                        for half in 0..2 {
                            let pblock = VOL_DIR_BLOCK + cpm_block as usize*2 + half;
                            if pblock < self.img.num_blocks() {
                                self.usage.claim_block(pblock,ChunkPurpose::UserData)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn find_file(&self,name: &str) -> Option<usize> {
        let want = name.to_uppercase();
        self.files.iter().position(|f| f.name.to_uppercase() == want)
    }
}

impl super::DiskFS for Disk {
    fn fs_format(&self) -> FsFormat {
        FsFormat::Cpm
    }
    fn volume_id(&self) -> String {
        // CP/M has no volume name
        "CP/M".to_string()
    }
    fn is_good(&self) -> bool {
        self.disk_is_good
    }
    fn list_files(&self) -> &Vec<FileInfo> {
        &self.files
    }
    fn usage(&self) -> &VolumeUsage {
        &self.usage
    }
    fn open(&mut self,name: &str) -> Result<Handle,DYNERR> {
        let idx = match self.find_file(name) {
            Some(idx) => idx,
            None => return Err(Box::new(super::Error::FileNotFound))
        };
        if self.files[idx].quality == Quality::Damaged {
            return Err(Box::new(super::Error::BadDiskImage))
        }
        let extents = match &self.files[idx].payload {
            FilePayload::Cpm { extents } => extents.clone(),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let (slot,_gen) = self.open_files.open(&self.files[idx].name)?;
        let mut handle = Handle::new(slot,self.files[idx].name.clone(),crate::img::BLOCK_SIZE);
        handle.eof = self.files[idx].length;
        // unassigned block numbers inside an extent read back as zeroes
        for j in extents {
            for cpm_block in self.dir[j].blocks {
                for half in 0..2 {
                    match cpm_block {
                        0 => handle.chunks.push(Chunk::Sparse),
                        b => handle.chunks.push(Chunk::Block((VOL_DIR_BLOCK + b as usize*2 + half) as u32))
                    }
                }
            }
        }
        Ok(handle)
    }
    fn close(&mut self,handle: Handle) -> STDRESULT {
        self.open_files.close(handle.slot)
    }
    fn get_img(&mut self) -> &mut DiskImg {
        &mut self.img
    }
}
