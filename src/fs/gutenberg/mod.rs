//! # Gutenberg file system module
//!
//! The Gutenberg word processor embeds its file structure in the sectors
//! themselves: the first six bytes of every sector are `(prev T,S, cur T,S,
//! next T,S)` links, with high bits marking the start and end of the chain.
//! The catalog is itself such a file, starting at track 17 sector 7, named
//! `DIR` on the disk.
//!
//! Directory entries are 16 bytes, 15 per sector, each ending with a 0x8D
//! so the raw sector reads as high-ASCII text, one entry per line.
//! Read-only.

use log::{debug,trace};
use super::{Chunk,FileInfo,FilePayload,Handle,OpenFiles,Quality};
use super::usage::{ChunkPurpose,VolumeUsage};
use crate::img::{DiskImg,FsFormat,Leniency,NoteKind,SectorOrder,SECTOR_SIZE};
use crate::{DYNERR,STDRESULT};

const CAT_TRACK: usize = 17;
const CAT_SECTOR: usize = 7;
const CAT_ENTRY_OFFSET: usize = 0x10;
const CAT_ENTRY_SIZE: usize = 16;
const CAT_ENTRIES_PER_SECTOR: usize = 15;
/// marks a deleted entry, in the sector byte (or sometimes the track byte)
const ENTRY_DELETED: u8 = 0x40;
const MAX_VOL_NAME: usize = 9;
const MAX_FILE_NAME: usize = 12;
const MAX_CATALOG_SECTORS: usize = 64;
const MAX_TS_ITERATIONS: usize = 1000;
/// link bytes at the head of every sector
const SECTOR_HEADER: usize = 6;
pub const DATA_PER_SECTOR: usize = SECTOR_SIZE - SECTOR_HEADER;

/// Walk the catalog chain under a candidate order, scoring sectors whose
/// self-link matches and whose entries end in 0x8D.
fn test_image(img: &mut DiskImg,order: SectorOrder) -> Result<usize,DYNERR> {
    let mut cat_track = CAT_TRACK;
    let mut cat_sect = CAT_SECTOR;
    let mut found_good = 0;
    let mut iterations = 0;
    while iterations < MAX_CATALOG_SECTORS {
        let buf = match img.read_track_sector_swapped(cat_track,cat_sect,order,SectorOrder::Dos) {
            Ok(buf) => buf,
            Err(_) => break     // allow it if earlier stuff was okay
        };
        if cat_track == (buf[2] & 0x7f) as usize && cat_sect == (buf[3] & 0x7f) as usize {
            found_good += 1;
            if (0..10).all(|i| buf[0x0f + i*0x10] == 0x8d) {
                found_good += 1;
            }
        }
        cat_track = buf[4] as usize;
        cat_sect = buf[5] as usize;
        if cat_track & 0x80 != 0 {
            // full circle
            break;
        }
        iterations += 1;
    }
    if iterations >= MAX_CATALOG_SECTORS {
        debug!("Gutenberg directory links cause a loop (order={})",order);
        return Err(Box::new(super::Error::DirectoryLoop));
    }
    trace!("Gutenberg foundGood={} order={}",found_good,order);
    Ok(found_good)
}

/// The primary interface for Gutenberg disk operations.
pub struct Disk {
    img: DiskImg,
    usage: VolumeUsage,
    files: Vec<FileInfo>,
    open_files: OpenFiles,
    volume_name: String,
    disk_is_good: bool
}

impl Disk {
    /// Test for a Gutenberg data disk.  Returns the best-scoring order.
    pub fn test(img: &mut DiskImg,leniency: Leniency) -> Option<SectorOrder> {
        if !img.has_sectors() || img.num_tracks() > 50 || img.sectors_per_track() != 16 {
            return None;
        }
        let mut best_order = SectorOrder::Unknown;
        let mut best_count = 0;
        for order in SectorOrder::candidates(img.order) {
            if let Ok(good) = test_image(img,order) {
                if good > best_count {
                    best_count = good;
                    best_order = order;
                }
            }
        }
        let threshold = match leniency {
            Leniency::Very => 1,
            Leniency::Not => 2
        };
        if best_count >= threshold {
            trace!("Gutenberg test: bestCount={} for order={}",best_count,best_order);
            return Some(best_order);
        }
        None
    }

    pub fn mount(img: DiskImg) -> Result<Self,DYNERR> {
        let usage = VolumeUsage::new_sectors(img.num_tracks(),img.sectors_per_track());
        let mut disk = Self {
            img,
            usage,
            files: Vec::new(),
            open_files: OpenFiles::new(),
            volume_name: String::new(),
            disk_is_good: true
        };
        disk.read_catalog()?;
        disk.get_file_lengths()?;
        disk.usage.dump();
        Ok(disk)
    }

    fn read_catalog(&mut self) -> STDRESULT {
        let mut cat_track = CAT_TRACK;
        let mut cat_sect = CAT_SECTOR;
        let mut iterations = 0;
        while cat_track < self.img.num_tracks() && cat_sect < self.img.sectors_per_track() &&
            iterations < MAX_CATALOG_SECTORS {
            trace!("reading catalog sector T={} S={}",cat_track,cat_sect);
            let buf = self.img.read_track_sector(cat_track,cat_sect)?;
            // the volume name should be the same on every catalog sector
            let mut vol_buf: Vec<u8> = buf[6..6+MAX_VOL_NAME].to_vec();
            super::lower_ascii(&mut vol_buf);
            self.volume_name = String::from_utf8_lossy(&vol_buf).trim_end().to_string();
            self.usage.claim_sector(cat_track,cat_sect,ChunkPurpose::VolumeDir)?;
            self.process_catalog_sector(&buf);
            cat_track = buf[4] as usize;
            cat_sect = buf[5] as usize;
            if cat_track & 0x80 != 0 {
                break;
            }
            iterations += 1;
        }
        if iterations >= MAX_CATALOG_SECTORS {
            return Err(Box::new(super::Error::DirectoryLoop));
        }
        Ok(())
    }

    fn process_catalog_sector(&mut self,buf: &[u8]) {
        for i in 0..CAT_ENTRIES_PER_SECTOR {
            let entry = &buf[CAT_ENTRY_OFFSET + i*CAT_ENTRY_SIZE..CAT_ENTRY_OFFSET + (i+1)*CAT_ENTRY_SIZE];
            // 0x40 in the track or sector byte means deleted; some
            // Gutenberg Jr. disks use the track byte
            if entry[0x0c] == ENTRY_DELETED || entry[0x0d] == ENTRY_DELETED ||
                entry[0x00] == 0xa0 || entry[0x00] == 0x00 {
                continue;
            }
            let mut name_buf: Vec<u8> = entry[0..MAX_FILE_NAME].to_vec();
            super::lower_ascii(&mut name_buf);
            let name = String::from_utf8_lossy(&name_buf).trim_end().to_string();
            let mut finfo = FileInfo::new(name,FilePayload::Gutenberg {
                start: [entry[0x0c],entry[0x0d]]
            });
            finfo.fs_type = entry[0x0e];
            finfo.prodos_type = 0x04;   // TXT
            finfo.locked = true;
            self.files.push(finfo);
        }
    }

    /// Follow each file's sector links to find its length, marking usage
    /// along the way.  The payload is 250 bytes per sector.
    fn get_file_lengths(&mut self) -> STDRESULT {
        for idx in 0..self.files.len() {
            let start = match &self.files[idx].payload {
                FilePayload::Gutenberg { start } => *start,
                _ => continue
            };
            let mut count = 0;
            let mut track = start[0] as usize;
            let mut sector = start[1] as usize;
            let mut chain_ok = true;
            while track < 0x80 {
                if count >= MAX_TS_ITERATIONS ||
                    (track & 0x7f) >= self.img.num_tracks() || sector >= self.img.sectors_per_track() {
                    self.img.add_note(NoteKind::Warning,format!("sector chain runs wild in '{}'",self.files[idx].name));
                    self.files[idx].quality = Quality::Damaged;
                    self.disk_is_good = false;
                    chain_ok = false;
                    break;
                }
                let buf = match self.img.read_track_sector(track,sector) {
                    Ok(buf) => buf,
                    Err(_) => {
                        debug!("failed loading track/sector for '{}'",self.files[idx].name);
                        self.files[idx].quality = Quality::Damaged;
                        self.disk_is_good = false;
                        chain_ok = false;
                        break;
                    }
                };
                count += 1;
                let mut state = self.usage.get_sector(track,sector)?;
                if !state.is_used {
                    state.is_used = true;
                    state.is_marked_used = true;
                    state.purpose = ChunkPurpose::UserData;
                    self.usage.set_sector(track,sector,state)?;
                }
                track = buf[4] as usize;
                sector = buf[5] as usize;
            }
            if chain_ok {
                self.files[idx].sectors = count;
                // first six bytes of each sector are t/s pointers
                self.files[idx].length = count * DATA_PER_SECTOR;
                self.files[idx].sparse_length = self.files[idx].length;
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
        FsFormat::Gutenberg
    }
    fn volume_id(&self) -> String {
        format!("Gutenberg: {}",self.volume_name)
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
            return Err(Box::new(super::Error::BadDiskImage));
        }
        let start = match &self.files[idx].payload {
            FilePayload::Gutenberg { start } => *start,
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        // resolve the chain up front
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut track = start[0] as usize;
        let mut sector = start[1] as usize;
        while track < 0x80 && chunks.len() < MAX_TS_ITERATIONS {
            chunks.push(Chunk::Sector(track as u8,sector as u8));
            let buf = self.img.read_track_sector(track,sector)?;
            track = buf[4] as usize;
            sector = buf[5] as usize;
        }
        let (slot,_gen) = self.open_files.open(&self.files[idx].name)?;
        let mut handle = Handle::new(slot,self.files[idx].name.clone(),SECTOR_SIZE);
        handle.eof = self.files[idx].length;
        handle.skip_per_chunk = SECTOR_HEADER;
        handle.chunks = chunks;
        Ok(handle)
    }
    fn close(&mut self,handle: Handle) -> STDRESULT {
        self.open_files.close(handle.slot)
    }
    fn get_img(&mut self) -> &mut DiskImg {
        &mut self.img
    }
}
