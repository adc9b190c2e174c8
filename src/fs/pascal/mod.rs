//! # Pascal file system module
//!
//! UCSD Pascal volumes keep a flat directory in blocks 2-5 and store every
//! file as one contiguous run of blocks.  Entries are kept sorted by start
//! block, and the free space is whatever gaps remain between runs.  Creating
//! a file therefore means finding the largest gap, and writing means the
//! whole file goes down in one shot; there is no grow-in-place.
//!
//! The 16-bit packed dates have a documented oddity: the filer uses year 100
//! to mark a file it is still working on, which is not a real date and is
//! not interpreted as one.

pub mod types;
mod directory;

use std::collections::HashMap;
use log::{debug,trace};
use a2kit_macro::DiskStruct;
use types::*;
use directory::*;
use super::{Capabilities,Chunk,FileInfo,FilePayload,Handle,OpenFiles,ProgressFn,Quality};
use super::usage::{ChunkPurpose,VolumeUsage};
use crate::img::{DiskImg,FsFormat,NoteKind,SectorOrder};
use crate::{DYNERR,STDRESULT};

/// catalog metadata flushed when a written file is closed
struct PendingClose {
    dir_index: usize,
    next_block: u16,
    bytes_remaining: u16
}

/// The primary interface for Pascal disk operations.
pub struct Disk {
    img: DiskImg,
    header: VolHeader,
    entries: Vec<FileEntry>,
    usage: VolumeUsage,
    files: Vec<FileInfo>,
    open_files: OpenFiles,
    disk_is_good: bool,
    pending: HashMap<usize,PendingClose>
}

impl Disk {
    /// Test a few fields of the volume directory for validity.  Returns the
    /// matching sector order, if any.
    pub fn test(img: &mut DiskImg) -> Option<SectorOrder> {
        if !img.has_blocks() {
            return None;
        }
        for order in SectorOrder::candidates(img.order) {
            let blk = match img.read_block_swapped(VOL_HEADER_BLOCK,order,SectorOrder::ProDos) {
                Ok(blk) => blk,
                Err(_) => continue
            };
            if blk[0x00] != 0 || blk[0x01] != 0 || blk[0x04] != 0 || blk[0x05] != 0 {
                continue;
            }
            let name_len = blk[0x06] as usize;
            if name_len < 1 || name_len > MAX_VOLUME_NAME {
                continue;
            }
            // this may be overly restrictive, but it is probably good to be
            let name = String::from_utf8_lossy(&blk[0x07..0x07+name_len]).to_string();
            if !is_valid_volume_name(&name) {
                continue;
            }
            return Some(order);
        }
        None
    }

    pub fn mount(mut img: DiskImg) -> Result<Self,DYNERR> {
        let dir = Self::load_catalog_raw(&mut img)?;
        let header = VolHeader::from_bytes(&dir)?;
        let num_files = u16::from_le_bytes(header.num_files) as usize;
        let next_block = u16::from_le_bytes(header.next_block) as usize;
        let max_files = (next_block.saturating_sub(VOL_HEADER_BLOCK))*BLOCK_SIZE/ENTRY_SIZE;
        let mut entries: Vec<FileEntry> = Vec::new();
        for i in 1..usize::min(num_files+1,max_files) {
            entries.push(FileEntry::from_bytes(&dir[i*ENTRY_SIZE..(i+1)*ENTRY_SIZE])?);
        }
        let usage = VolumeUsage::new_blocks(img.num_blocks());
        let mut disk = Self {
            img,
            header,
            entries,
            usage,
            files: Vec::new(),
            open_files: OpenFiles::new(),
            disk_is_good: false,
            pending: HashMap::new()
        };
        disk.process_catalog();
        disk.scan_file_usage()?;
        disk.disk_is_good = disk.check_disk_is_good();
        disk.usage.dump();
        Ok(disk)
    }

    fn dir_len_blocks(header: &VolHeader) -> usize {
        let next = u16::from_le_bytes(header.next_block) as usize;
        usize::min(next.saturating_sub(VOL_HEADER_BLOCK),HUGE_DIR)
    }

    fn load_catalog_raw(img: &mut DiskImg) -> Result<Vec<u8>,DYNERR> {
        // read the header block first to learn the directory length
        let first = img.read_block(VOL_HEADER_BLOCK)?;
        let header = VolHeader::from_bytes(&first)?;
        let mut dir_blocks = Self::dir_len_blocks(&header);
        if dir_blocks == 0 {
            dir_blocks = DIR_BLOCKS;
        }
        let mut ans = Vec::with_capacity(dir_blocks*BLOCK_SIZE);
        for b in 0..dir_blocks {
            ans.append(&mut img.read_block(VOL_HEADER_BLOCK+b)?);
        }
        Ok(ans)
    }

    fn save_catalog(&mut self) -> STDRESULT {
        let dir_blocks = match Self::dir_len_blocks(&self.header) {
            0 => DIR_BLOCKS,
            n => n
        };
        let mut buf = self.header.to_bytes();
        for entry in &self.entries {
            buf.append(&mut entry.to_bytes());
        }
        buf.resize(dir_blocks*BLOCK_SIZE,0);
        for b in 0..dir_blocks {
            self.img.write_block(VOL_HEADER_BLOCK+b,&buf[b*BLOCK_SIZE..(b+1)*BLOCK_SIZE])?;
        }
        Ok(())
    }

    fn total_blocks(&self) -> usize {
        usize::min(u16::from_le_bytes(self.header.total_blocks) as usize,self.img.num_blocks())
    }

    /// derive the `FileInfo` view from the raw entries
    fn process_catalog(&mut self) {
        self.files.clear();
        let total = self.total_blocks();
        for (idx,entry) in self.entries.iter().enumerate() {
            let typ: FileType = match num_traits::FromPrimitive::from_u16(u16::from_le_bytes(entry.ftype) & 0x0f) {
                Some(t) => t,
                None => FileType::Untyped
            };
            let start = entry.start();
            let next = entry.next();
            let bytes_rem = u16::from_le_bytes(entry.bytes_remaining) as usize;
            let mut finfo = FileInfo::new(entry.name_str(),FilePayload::Pascal {
                start_block: start as u16,
                next_block: next as u16,
                bytes_rem: bytes_rem as u16,
                dir_index: idx
            });
            finfo.fs_type = (u16::from_le_bytes(entry.ftype) & 0x0f) as u8;
            finfo.prodos_type = typ.prodos_type();
            finfo.mod_date = unpack_date(entry.mod_date);
            if start >= next || next > total || bytes_rem > BLOCK_SIZE {
                debug!("bad extent {}..{} for '{}'",start,next,finfo.name);
                finfo.quality = Quality::Damaged;
                finfo.length = 0;
            } else {
                finfo.length = (next-start-1)*BLOCK_SIZE + bytes_rem;
                finfo.sparse_length = finfo.length;
                finfo.sectors = next-start;
            }
            self.files.push(finfo);
        }
    }

    fn scan_file_usage(&mut self) -> STDRESULT {
        // boot loader and directory
        for b in 0..VOL_HEADER_BLOCK {
            self.usage.claim_block(b,ChunkPurpose::System)?;
        }
        let dir_end = VOL_HEADER_BLOCK + Self::dir_len_blocks(&self.header).max(DIR_BLOCKS);
        for b in VOL_HEADER_BLOCK..usize::min(dir_end,self.img.num_blocks()) {
            self.usage.claim_block(b,ChunkPurpose::VolumeDir)?;
        }
        for f in self.files.clone() {
            if f.quality == Quality::Damaged {
                continue;
            }
            if let FilePayload::Pascal { start_block, next_block, .. } = f.payload {
                for b in start_block as usize..next_block as usize {
                    if b < self.img.num_blocks() {
                        self.usage.claim_block(b,ChunkPurpose::UserData)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// entries must be sorted by start block and stay inside the volume
    fn check_disk_is_good(&mut self) -> bool {
        let mut result = true;
        let total = self.total_blocks();
        let mut prev_next = u16::from_le_bytes(self.header.next_block) as usize;
        for entry in &self.entries {
            if entry.start() < prev_next {
                self.img.add_note(NoteKind::Warning,format!("entry '{}' overlaps or is out of order",entry.name_str()));
                result = false;
            }
            if entry.next() > total {
                self.img.add_note(NoteKind::Warning,format!("entry '{}' extends past the volume",entry.name_str()));
                result = false;
            }
            prev_next = entry.next();
        }
        let (_not_marked,_extra,conflicts) = self.usage.tallies();
        if conflicts > 0 {
            self.img.add_note(NoteKind::Warning,format!("{} blocks are used by more than one file",conflicts));
            result = false;
        }
        let (damaged,suspicious) = super::scan_for_damaged_files(&self.files);
        if damaged || suspicious {
            self.img.add_note(NoteKind::Warning,"one or more files are damaged or suspicious".to_string());
            result = false;
        }
        result
    }

    fn find_file(&self,name: &str) -> Option<usize> {
        let want = name.to_uppercase();
        self.files.iter().position(|f| f.name.to_uppercase() == want)
    }

    fn write_protect_check(&self) -> STDRESULT {
        if self.img.is_read_only() {
            return Err(Box::new(super::Error::ReadOnly));
        }
        if !self.disk_is_good {
            return Err(Box::new(super::Error::BadDiskImage));
        }
        Ok(())
    }

    /// Find the largest free gap.  Returns the index of the entry the gap
    /// follows (`None` when the gap starts right after the directory), or
    /// an error when the disk is completely packed.
    fn find_largest_free_area(&self) -> Result<(Option<usize>,usize),DYNERR> {
        let mut prev_next = u16::from_le_bytes(self.header.next_block) as usize;
        let mut max_gap = 0;
        let mut max_index: Option<Option<usize>> = None;
        for (idx,entry) in self.entries.iter().enumerate() {
            let gap = entry.start().saturating_sub(prev_next);
            if gap > max_gap {
                max_gap = gap;
                max_index = Some(match idx {
                    0 => None,
                    i => Some(i-1)
                });
            }
            prev_next = entry.next();
        }
        let gap = self.total_blocks().saturating_sub(prev_next);
        if gap > max_gap {
            max_gap = gap;
            max_index = Some(match self.entries.len() {
                0 => None,
                n => Some(n-1)
            });
        }
        match max_index {
            Some(prev) => {
                trace!("largest gap is {} blocks",max_gap);
                Ok((prev,max_gap))
            },
            None => Err(Box::new(Error::NoRoom))
        }
    }

    /// Put a Pascal file system on the image, with zeroed boot blocks.
    pub fn format(img: &mut DiskImg,vol_name: &str,time: Option<chrono::NaiveDateTime>) -> STDRESULT {
        if !is_valid_volume_name(vol_name) {
            return Err(Box::new(Error::BadTitle));
        }
        if !img.has_blocks() {
            return Err(Box::new(crate::img::Error::InvalidArg));
        }
        img.set_fs(FsFormat::Pascal,img.order,None);
        let zero = vec![0;BLOCK_SIZE];
        for b in 0..VOL_HEADER_BLOCK+DIR_BLOCKS {
            img.write_block(b,&zero)?;
        }
        let mut header = VolHeader::new();
        header.next_block = u16::to_le_bytes((VOL_HEADER_BLOCK+DIR_BLOCKS) as u16);
        let up = vol_name.to_uppercase();
        header.name_len = up.len() as u8;
        header.name[0..up.len()].copy_from_slice(up.as_bytes());
        header.total_blocks = u16::to_le_bytes(img.num_blocks() as u16);
        header.num_files = [0,0];
        header.last_date_set = pack_date(time);
        let mut buf = header.to_bytes();
        buf.resize(BLOCK_SIZE,0);
        img.write_block(VOL_HEADER_BLOCK,&buf)?;
        Ok(())
    }
}

impl super::DiskFS for Disk {
    fn fs_format(&self) -> FsFormat {
        FsFormat::Pascal
    }
    fn volume_id(&self) -> String {
        let len = usize::min(self.header.name_len as usize,MAX_VOLUME_NAME);
        format!("{}:",String::from_utf8_lossy(&self.header.name[0..len]))
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            create: true,
            write: true,
            delete: true,
            rename: true,
            set_info: true,
            rename_volume: true
        }
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
            None => return Err(Box::new(Error::NoFile))
        };
        if self.files[idx].quality == Quality::Damaged {
            return Err(Box::new(super::Error::BadDiskImage));
        }
        let (start,next) = match &self.files[idx].payload {
            FilePayload::Pascal { start_block, next_block, .. } => (*start_block,*next_block),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let (slot,_gen) = self.open_files.open(&self.files[idx].name)?;
        let mut handle = Handle::new(slot,self.files[idx].name.clone(),BLOCK_SIZE);
        handle.eof = self.files[idx].length;
        handle.chunks = (start..next).map(|b| Chunk::Block(b as u32)).collect();
        handle.writable = self.files[idx].length == 0 && !self.img.is_read_only() && self.disk_is_good;
        Ok(handle)
    }
    fn close(&mut self,handle: Handle) -> STDRESULT {
        if let Some(pending) = self.pending.remove(&handle.slot) {
            let entry = &mut self.entries[pending.dir_index];
            entry.next_block = u16::to_le_bytes(pending.next_block);
            entry.bytes_remaining = u16::to_le_bytes(pending.bytes_remaining);
            entry.mod_date = pack_date(None);
            self.header.last_access = pack_date(None);
            self.save_catalog()?;
            self.process_catalog();
        }
        self.open_files.close(handle.slot)
    }
    fn write(&mut self,handle: &mut Handle,buf: &[u8],mut progress: Option<&mut ProgressFn>) -> Result<usize,DYNERR> {
        self.write_protect_check()?;
        if !handle.writable || handle.mark != 0 || handle.eof != 0 {
            return Err(Box::new(super::Error::InvalidArg));
        }
        if buf.len() == 0 {
            return Ok(0);
        }
        let idx = match self.find_file(&handle.name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::NoFile))
        };
        let (start,dir_index) = match &self.files[idx].payload {
            FilePayload::Pascal { start_block, dir_index, .. } => (*start_block as usize,*dir_index),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        // the file may grow up to the next entry's start block; the
        // contiguous extent is claimed in full before any data goes down
        let limit = match self.entries.get(dir_index+1) {
            Some(succ) => succ.start(),
            None => self.total_blocks()
        };
        let blocks_needed = (buf.len() + BLOCK_SIZE - 1)/BLOCK_SIZE;
        if start + blocks_needed > limit {
            debug!("need {} blocks, gap has {}",blocks_needed,limit-start);
            return Err(Box::new(Error::NoRoom));
        }
        let mut mark = 0;
        for b in 0..blocks_needed {
            let mut blk = vec![0;BLOCK_SIZE];
            let n = usize::min(BLOCK_SIZE,buf.len()-mark);
            blk[0..n].copy_from_slice(&buf[mark..mark+n]);
            self.img.write_block(start+b,&blk)?;
            mark += n;
            if let Some(f) = progress.as_mut() {
                if !f(mark as u64) {
                    return Err(Box::new(super::Error::Cancelled));
                }
            }
        }
        handle.eof = buf.len();
        handle.mark = buf.len();
        handle.chunks = (start..start+blocks_needed).map(|b| Chunk::Block(b as u32)).collect();
        self.pending.insert(handle.slot,PendingClose {
            dir_index,
            next_block: (start + blocks_needed) as u16,
            bytes_remaining: (buf.len() - (blocks_needed-1)*BLOCK_SIZE) as u16
        });
        Ok(buf.len())
    }
    fn create(&mut self,name: &str,prodos_type: u8,_aux: u16) -> STDRESULT {
        self.write_protect_check()?;
        if !is_valid_file_name(name) {
            return Err(Box::new(Error::BadTitle));
        }
        if self.find_file(name).is_some() {
            return Err(Box::new(Error::DuplicateFilename));
        }
        // the header entry counts against the directory capacity
        let dir_blocks = match Self::dir_len_blocks(&self.header) {
            0 => DIR_BLOCKS,
            n => n
        };
        let max_files = dir_blocks*BLOCK_SIZE/ENTRY_SIZE;
        if self.entries.len() >= max_files-1 {
            debug!("volume directory full ({} entries)",self.entries.len());
            return Err(Box::new(super::Error::VolumeDirFull));
        }
        let (prev,_gap) = self.find_largest_free_area()?;
        let start = match prev {
            Some(i) => self.entries[i].next(),
            None => u16::from_le_bytes(self.header.next_block) as usize
        };
        let mut entry = FileEntry::new();
        entry.start_block = u16::to_le_bytes(start as u16);
        entry.next_block = u16::to_le_bytes((start+1) as u16);
        entry.ftype = u16::to_le_bytes(FileType::from_prodos_type(prodos_type) as u16);
        entry.set_name(name);
        entry.bytes_remaining = [0,0];
        entry.mod_date = pack_date(None);
        let insert_at = match prev {
            Some(i) => i+1,
            None => 0
        };
        self.entries.insert(insert_at,entry);
        let num_files = u16::from_le_bytes(self.header.num_files) + 1;
        self.header.num_files = u16::to_le_bytes(num_files);
        self.save_catalog()?;
        self.process_catalog();
        Ok(())
    }
    fn delete(&mut self,name: &str) -> STDRESULT {
        self.write_protect_check()?;
        let idx = match self.find_file(name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::NoFile))
        };
        if self.open_files.is_open(&self.files[idx].name) {
            return Err(Box::new(super::Error::AlreadyOpen));
        }
        let dir_index = match &self.files[idx].payload {
            FilePayload::Pascal { dir_index, .. } => *dir_index,
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        // no allocation map to update, just crunch the entry out
        self.entries.remove(dir_index);
        let num_files = u16::from_le_bytes(self.header.num_files).saturating_sub(1);
        self.header.num_files = u16::to_le_bytes(num_files);
        self.save_catalog()?;
        self.process_catalog();
        Ok(())
    }
    fn rename(&mut self,old_name: &str,new_name: &str) -> STDRESULT {
        self.write_protect_check()?;
        if !is_valid_file_name(new_name) {
            return Err(Box::new(Error::BadTitle));
        }
        if self.find_file(new_name).is_some() {
            return Err(Box::new(Error::DuplicateFilename));
        }
        let idx = match self.find_file(old_name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::NoFile))
        };
        let dir_index = match &self.files[idx].payload {
            FilePayload::Pascal { dir_index, .. } => *dir_index,
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        self.entries[dir_index].set_name(new_name);
        self.save_catalog()?;
        self.process_catalog();
        Ok(())
    }
    fn set_info(&mut self,name: &str,prodos_type: Option<u8>,_aux: Option<u16>,_locked: Option<bool>) -> STDRESULT {
        self.write_protect_check()?;
        let idx = match self.find_file(name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::NoFile))
        };
        let dir_index = match &self.files[idx].payload {
            FilePayload::Pascal { dir_index, .. } => *dir_index,
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        if let Some(ptype) = prodos_type {
            self.entries[dir_index].ftype = u16::to_le_bytes(FileType::from_prodos_type(ptype) as u16);
            self.save_catalog()?;
            self.process_catalog();
        }
        Ok(())
    }
    fn rename_volume(&mut self,new_name: &str) -> STDRESULT {
        self.write_protect_check()?;
        if !is_valid_volume_name(new_name) {
            return Err(Box::new(Error::BadTitle));
        }
        let up = new_name.to_uppercase();
        self.header.name = [0;7];
        self.header.name[0..up.len()].copy_from_slice(up.as_bytes());
        self.header.name_len = up.len() as u8;
        self.save_catalog()
    }
    fn get_img(&mut self) -> &mut DiskImg {
        &mut self.img
    }
}
