//! # DOS 3.x file system module
//!
//! This handles disk images containing one standard bootable or non-bootable
//! DOS 3.2/3.3 volume.  Wide latitude is allowed for track counts, while
//! sector counts are restricted to 13, 16, or 32.
//!
//! The VTOC at (17,0) carries the free-sector bitmap and the pointer to the
//! catalog chain.  Each file's storage is named by a chain of track/sector
//! list sectors; a `(0,0)` pair inside the list is a sparse sector, which is
//! only legal for text files.
//!
//! File lengths are not stored in the catalog.  They are recovered from the
//! data itself: the first bytes of A/I/B files carry a header, text files
//! are scanned for their first NUL, and everything else is billed by sector
//! count.  Random-access text files with binary holes can therefore be
//! mis-sized; DOS itself had the same blind spot and we keep the behavior.

pub mod types;
mod directory;

use std::collections::HashMap;
use log::{debug,info,trace,warn};
use a2kit_macro::DiskStruct;
use types::*;
use directory::*;
use super::{Capabilities,Chunk,FileInfo,FilePayload,Handle,InitMode,OpenFiles,ProgressFn,Quality};
use super::usage::{ChunkPurpose,VolumeUsage};
use crate::img::{DiskImg,FsFormat,Leniency,NoteKind,SectorOrder};
use crate::{DYNERR,STDRESULT};

fn file_name_to_string(fname: [u8;30]) -> String {
    // fname is negative ASCII padded to the end with spaces
    // non-ASCII will go as hex escapes
    String::from(crate::escaped_ascii_from_bytes(&fname,true,true).trim_end())
}

fn string_to_file_name(s: &str) -> [u8;30] {
    let mut ans: [u8;30] = [0xa0;30]; // fill with negative spaces
    let unescaped = crate::escaped_ascii_to_bytes(s,true);
    for i in 0..30 {
        if i < unescaped.len() {
            ans[i] = unescaped[i];
        }
    }
    ans
}

/// Names can contain almost anything; we ban commas, control characters,
/// high ASCII, blank names, and trailing spaces.
pub fn is_valid_file_name(name: &str) -> bool {
    let mut non_space = false;
    let mut len = 0;
    for ch in name.chars() {
        if (ch as u32) < 0x20 || (ch as u32) >= 0x7f || ch == ',' {
            return false;
        }
        if ch != ' ' {
            non_space = true;
        }
        len += 1;
    }
    len > 0 && len <= 30 && non_space && !name.ends_with(' ')
}

/// DOS volumes are named by number, 1-254.
pub fn is_valid_volume_name(name: &str) -> bool {
    match name.parse::<i64>() {
        Ok(val) => val >= 1 && val <= 254,
        Err(_) => false
    }
}

/// Turn an arbitrary host name into something DOS will take: upper case,
/// offending characters become underscores, at most 30 characters.
pub fn normalize_name(name: &str) -> String {
    let mut ans = String::new();
    for ch in name.chars().take(30) {
        if (ch as u32) < 0x20 || (ch as u32) >= 0x7f || ch == ',' {
            ans.push('_');
        } else {
            ans.push(ch.to_ascii_uppercase());
        }
    }
    String::from(ans.trim_end())
}

/// catalog metadata patched in when a written file is closed
struct PendingClose {
    file_idx: usize,
    eof: usize,
    sectors_used: usize,
    first_ts: [u8;2]
}

/// The primary interface for DOS 3.x disk operations.
pub struct Disk {
    img: DiskImg,
    vtoc: VTOC,
    usage: VolumeUsage,
    files: Vec<FileInfo>,
    open_files: OpenFiles,
    cat_sectors: Vec<[u8;2]>,
    disk_is_good: bool,
    pending: HashMap<usize,PendingClose>
}

/// Walk the catalog under a candidate order and count the evidence that
/// this really is DOS.  A valid-looking VTOC scores one, each properly
/// descending catalog link scores another.
fn test_image(img: &mut DiskImg,order: SectorOrder) -> Option<usize> {
    let vtoc_buf = match img.read_track_sector_swapped(VTOC_TRACK as usize,VTOC_SECTOR as usize,order,SectorOrder::Dos) {
        Ok(buf) => buf,
        Err(_) => return None
    };
    let mut cat_track = vtoc_buf[0x01] as usize;
    let mut cat_sect = vtoc_buf[0x02] as usize;
    let num_tracks = vtoc_buf[0x34] as usize;
    let num_sectors = vtoc_buf[0x35] as usize;
    if vtoc_buf[0x27] != MAX_TS_PAIRS as u8 ||
        num_tracks > MAX_TRACKS ||
        !(num_sectors == 13 || num_sectors == 16 || num_sectors == 32) ||
        cat_track >= num_tracks || cat_sect >= num_sectors {
        trace!("DOS header test failed (order={})",order);
        return None;
    }
    let mut found_good = 1;     // score one for a valid-looking VTOC
    let mut iterations = 0;
    while cat_track != 0 && cat_sect != 0 && iterations < MAX_CATALOG_SECTORS {
        let buf = match img.read_track_sector_swapped(cat_track,cat_sect,order,SectorOrder::Dos) {
            Ok(buf) => buf,
            Err(_) => break     // allow it if earlier stuff was okay
        };
        if cat_track == buf[1] as usize && cat_sect == buf[2] as usize + 1 {
            found_good += 1;
        } else if cat_track == buf[1] as usize && cat_sect == buf[2] as usize {
            trace!("DOS detected self-reference on cat ({},{})",cat_track,cat_sect);
            break;
        }
        cat_track = buf[1] as usize;
        cat_sect = buf[2] as usize;
        iterations += 1;
    }
    if iterations >= MAX_CATALOG_SECTORS {
        // possible cause: LF->CR conversion screws up the link to sector $0a
        debug!("DOS directory links cause a loop (order={})",order);
        return None;
    }
    trace!("DOS foundGood={} order={}",found_good,order);
    Some(found_good)
}

impl Disk {
    /// Test an image for DOS 3.2/3.3, trying each candidate sector order and
    /// keeping the best score.  Returns `(order,format,volume)` on a match.
    pub fn test(img: &mut DiskImg,leniency: Leniency) -> Option<(SectorOrder,FsFormat,Option<u8>)> {
        if img.num_tracks() > MAX_INTERESTING_TRACKS || !img.has_sectors() {
            return None;
        }
        let mut best_order = SectorOrder::Unknown;
        let mut best_count = 0;
        for order in SectorOrder::candidates(img.order) {
            if let Some(good) = test_image(img,order) {
                if good > best_count {
                    best_count = good;
                    best_order = order;
                }
            }
        }
        let threshold = match leniency {
            Leniency::Very => 2,
            Leniency::Not => 4
        };
        if best_count >= threshold {
            trace!("DOS test: bestCount={} for order={}",best_count,best_order);
            let vtoc_buf = img.read_track_sector_swapped(VTOC_TRACK as usize,VTOC_SECTOR as usize,best_order,SectorOrder::Dos).ok()?;
            let format = match vtoc_buf[0x35] {
                13 => FsFormat::Dos32,
                _ => FsFormat::Dos33
            };
            let vol = match vtoc_buf[0x06] {
                v if v >= 1 && v <= 254 => Some(v),
                _ => None
            };
            return Some((best_order,format,vol));
        }
        debug!("didn't find valid DOS 3.2 or DOS 3.3");
        None
    }

    /// Bind the file system to the image and load the catalog.  Errors from
    /// here on are handled by marking files damaged rather than failing.
    pub fn mount(mut img: DiskImg,init: InitMode) -> Result<Self,DYNERR> {
        let vtoc_buf = img.read_track_sector(VTOC_TRACK as usize,VTOC_SECTOR as usize)?;
        let vtoc = VTOC::from_bytes(&vtoc_buf)?;
        let usage = VolumeUsage::new_sectors(img.num_tracks(),img.sectors_per_track());
        if img.dos_volume.is_none() && vtoc.vol >= 1 {
            img.dos_volume = Some(vtoc.vol);
        }
        let mut disk = Self {
            img,
            vtoc,
            usage,
            files: Vec::new(),
            open_files: OpenFiles::new(),
            cat_sectors: Vec::new(),
            disk_is_good: false,
            pending: HashMap::new()
        };
        disk.scan_vol_bitmap()?;
        if init == InitMode::HeaderOnly {
            debug!("headerOnly set, skipping file load");
            return Ok(disk);
        }
        disk.read_catalog()?;
        disk.get_file_lengths()?;
        disk.fix_volume_usage_map();
        disk.disk_is_good = disk.check_disk_is_good();
        disk.usage.dump();
        Ok(disk)
    }

    fn num_tracks(&self) -> usize {
        usize::min(self.vtoc.tracks as usize,self.img.num_tracks())
    }
    fn num_sectors(&self) -> usize {
        self.img.sectors_per_track()
    }
    fn ts_ok(&self,track: usize,sector: usize) -> bool {
        track < self.num_tracks() && sector < self.num_sectors()
    }

    fn get_track_map(&self,track: usize) -> u32 {
        let bm = &self.vtoc.bitmap;
        let i = track*4;
        u32::from_be_bytes([bm[i],bm[i+1],bm[i+2],bm[i+3]])
    }
    fn save_track_map(&mut self,track: usize,map: u32) {
        let i = track*4;
        self.vtoc.bitmap[i..i+4].copy_from_slice(&u32::to_be_bytes(map));
    }
    fn is_sector_free(&self,track: usize,sector: usize) -> bool {
        let map = self.get_track_map(track);
        let eff_sec = sector + 32 - self.num_sectors();
        map & (1 << eff_sec) > 0
    }
    fn set_sector_used(&mut self,track: usize,sector: usize,used: bool) {
        let mut map = self.get_track_map(track);
        let eff_sec = sector + 32 - self.num_sectors();
        match used {
            true => map &= (1u32 << eff_sec) ^ u32::MAX,
            false => map |= 1 << eff_sec
        };
        self.save_track_map(track,map);
    }
    /// write the in-memory VTOC (including the free map) back to the disk
    fn save_vtoc(&mut self) -> STDRESULT {
        self.img.write_track_sector(VTOC_TRACK as usize,VTOC_SECTOR as usize,&self.vtoc.to_bytes())
    }
    fn num_free_sectors(&self) -> usize {
        let mut ans = 0;
        for track in 0..self.num_tracks() {
            for sector in 0..self.num_sectors() {
                if self.is_sector_free(track,sector) {
                    ans += 1;
                }
            }
        }
        ans
    }
    /// Allocate one sector: search from the VTOC track downward toward
    /// track 0, then upward from VTOC+1, taking the highest free sector of
    /// the first track with space.  The last-allocated bytes in the VTOC are
    /// updated the way DOS would.
    fn alloc_sector(&mut self) -> Result<[u8;2],DYNERR> {
        let vtoc_track = VTOC_TRACK as usize;
        let has_free = |disk: &Self,track: usize| (0..disk.num_sectors()).any(|s| disk.is_sector_free(track,s));
        // track 0 is never allocated
        let mut found: Option<usize> = None;
        for track in (1..=vtoc_track).rev() {
            if has_free(self,track) {
                found = Some(track);
                break;
            }
        }
        if found.is_none() {
            for track in vtoc_track+1..self.num_tracks() {
                if has_free(self,track) {
                    found = Some(track);
                    break;
                }
            }
        }
        let track = match found {
            Some(t) => t,
            None => {
                debug!("AllocSector unable to find empty sector");
                return Err(Box::new(Error::DiskFull));
            }
        };
        for sector in (0..self.num_sectors()).rev() {
            if self.is_sector_free(track,sector) {
                self.set_sector_used(track,sector,true);
                self.vtoc.last_track = track as u8;
                self.vtoc.last_direction = match track < vtoc_track {
                    true => 0xff,   // descending
                    false => 0x01   // ascending
                };
                return Ok([track as u8,sector as u8]);
            }
        }
        Err(Box::new(Error::DiskFull))
    }

    /// mark chunks the volume bitmap claims are in use
    fn scan_vol_bitmap(&mut self) -> STDRESULT {
        for track in 0..self.num_tracks() {
            for sector in 0..self.num_sectors() {
                if !self.is_sector_free(track,sector) {
                    let mut state = self.usage.get_sector(track,sector)?;
                    state.is_marked_used = true;
                    self.usage.set_sector(track,sector,state)?;
                }
            }
        }
        // the VTOC itself
        self.usage.claim_sector(VTOC_TRACK as usize,VTOC_SECTOR as usize,ChunkPurpose::System)?;
        Ok(())
    }

    fn read_catalog(&mut self) -> STDRESULT {
        let mut ts = [self.vtoc.track1,self.vtoc.sector1];
        for _try in 0..MAX_CATALOG_SECTORS {
            if !self.ts_ok(ts[0] as usize,ts[1] as usize) {
                self.img.add_note(NoteKind::Warning,format!("catalog link ({},{}) out of bounds",ts[0],ts[1]));
                return Ok(());
            }
            let buf = self.img.read_track_sector(ts[0] as usize,ts[1] as usize)?;
            let cat = CatalogSector::from_bytes(&buf)?;
            self.cat_sectors.push(ts);
            self.usage.claim_sector(ts[0] as usize,ts[1] as usize,ChunkPurpose::VolumeDir)?;
            for (slot,entry) in cat.entries.iter().enumerate() {
                if entry.tsl_track == 0 || entry.tsl_track == 255 {
                    // never used, or deleted
                    continue;
                }
                let name = file_name_to_string(entry.name);
                let typ = FileType::from_type_byte(entry.file_type);
                let mut finfo = FileInfo::new(name,FilePayload::Dos {
                    tslist: [entry.tsl_track,entry.tsl_sector],
                    cat_ts: ts,
                    cat_slot: slot,
                    data_offset: 0
                });
                finfo.fs_type = entry.file_type;
                finfo.prodos_type = typ.prodos_type();
                finfo.locked = entry.file_type & 0x80 > 0;
                finfo.sectors = u16::from_le_bytes(entry.sectors) as usize;
                self.files.push(finfo);
            }
            ts = [cat.next_track,cat.next_sector];
            if ts == [0,0] {
                return Ok(());
            }
        }
        self.img.add_note(NoteKind::Warning,"catalog links cause a loop".to_string());
        Err(Box::new(super::Error::DirectoryLoop))
    }

    /// Follow a file's T/S list chain.  Returns `(ts_list,index_list)`, with
    /// sparse sectors kept as `(0,0)` pairs and trailing zeroes trimmed off
    /// the final list sector.  Marks the file when the structure is sick.
    fn load_ts_list(&mut self,tslist: [u8;2],quality: &mut Quality) -> Result<(Vec<[u8;2]>,Vec<[u8;2]>),DYNERR> {
        let mut ts_list: Vec<[u8;2]> = Vec::new();
        let mut index_list: Vec<[u8;2]> = Vec::new();
        let mut track = tslist[0] as usize;
        let mut sector = tslist[1] as usize;
        if !self.ts_ok(track,sector) {
            debug!("invalid initial T/S {},{}",track,sector);
            return Err(Box::new(Error::IOError));
        }
        let mut iterations = 0;
        loop {
            index_list.push([track as u8,sector as u8]);
            let buf = self.img.read_track_sector(track,sector)?;
            let tsl = TrackSectorList::from_bytes(&buf)?;
            track = tsl.next_track as usize;
            sector = tsl.next_sector as usize;
            // if the link is bogus, the whole sector is probably bad
            if !self.ts_ok(track,sector) && (track != 0 || sector != 0) {
                debug!("invalid T/S link {},{}",track,sector);
                return Err(Box::new(Error::IOError));
            }
            let sector_offset = u16::from_le_bytes(tsl.sector_base);
            if sector_offset as usize % MAX_TS_PAIRS != 0 {
                debug!("invalid T/S header sector offset {}",sector_offset);
                // not fatal, just weird
            }
            let mut pairs: Vec<[u8;2]> = Vec::new();
            let mut last_non_zero: isize = -1;
            let mut structure_err = false;
            for p in 0..MAX_TS_PAIRS {
                let dt = tsl.pairs[p*2] as usize;
                let ds = tsl.pairs[p*2+1] as usize;
                if !structure_err && ((dt != 0 || ds != 0) && !self.ts_ok(dt,ds) || (dt == 0 && ds != 0)) {
                    debug!("invalid T/S {},{} in list",dt,ds);
                    if p > 0 && pairs[p-1] == [0,0] {
                        // list looks partially valid, accept what we have
                        *quality = Quality::Suspicious;
                        break;
                    }
                    structure_err = true;
                }
                if dt != 0 || ds != 0 {
                    last_non_zero = p as isize;
                }
                pairs.push([tsl.pairs[p*2],tsl.pairs[p*2+1]]);
            }
            if structure_err {
                return Err(Box::new(Error::IOError));
            }
            pairs.resize(MAX_TS_PAIRS,[0,0]);
            if track != 0 || sector != 0 {
                // more T/S lists to come, so we keep all entries
                ts_list.append(&mut pairs);
            } else {
                // this was the last one; a freshly created file has none
                pairs.truncate((last_non_zero+1) as usize);
                ts_list.append(&mut pairs);
                return Ok((ts_list,index_list));
            }
            iterations += 1;
            if iterations >= MAX_TSLIST_REPS {
                return Err(Box::new(super::Error::DirectoryLoop));
            }
        }
    }

    /// Read the last non-sparse sector of a text file and stop the length at
    /// the first NUL.
    fn trim_last_sector_up(&mut self,length: usize,last_ts: [u8;2]) -> Result<usize,DYNERR> {
        if last_ts[0] == 0 {
            // happens on files with lots of sparse space at the end
            return Ok(length);
        }
        let buf = self.img.read_track_sector(last_ts[0] as usize,last_ts[1] as usize)?;
        let mut ans = length - SECTOR_SIZE;
        for i in 0..SECTOR_SIZE {
            if buf[i] == 0x00 {
                break;
            }
            ans += 1;
        }
        Ok(ans)
    }

    fn get_file_lengths(&mut self) -> STDRESULT {
        for idx in 0..self.files.len() {
            let (tslist,declared_sectors) = match &self.files[idx].payload {
                FilePayload::Dos { tslist, .. } => (*tslist,self.files[idx].sectors),
                _ => continue
            };
            let mut quality = Quality::Good;
            let lists = self.load_ts_list(tslist,&mut quality);
            let (ts_list,index_list) = match lists {
                Ok(pair) => pair,
                Err(e) => {
                    debug!("failed loading TS list for '{}': {}",self.files[idx].name,e);
                    self.files[idx].quality = Quality::Damaged;
                    continue;
                }
            };
            // bill the usage map
            for ts in &ts_list {
                if *ts != [0,0] {
                    self.usage.claim_sector(ts[0] as usize,ts[1] as usize,ChunkPurpose::UserData)?;
                }
            }
            for ts in &index_list {
                self.usage.claim_sector(ts[0] as usize,ts[1] as usize,ChunkPurpose::FileStruct)?;
            }
            if declared_sectors != ts_list.len() + index_list.len() {
                // expected on sparse random-access text files
                trace!("file '{}' has len-in-sect={} but actual={}",self.files[idx].name,declared_sectors,ts_list.len()+index_list.len());
            }
            if let Err(e) = self.compute_length(idx,&ts_list,&mut quality) {
                debug!("unable to get length for '{}': {}",self.files[idx].name,e);
                quality = Quality::Damaged;
            }
            if quality != Quality::Good {
                self.files[idx].quality = quality;
            }
        }
        Ok(())
    }

    /// Compute length and data offset.  A/I files carry a 2-byte length,
    /// B files a 4-byte address+length, text files scan for NUL, everything
    /// else is billed by sector count.  DDD archives stored as B files with
    /// a zeroed header and `<...>` in the name get special treatment.
    fn compute_length(&mut self,idx: usize,ts_list: &Vec<[u8;2]>,quality: &mut Quality) -> STDRESULT {
        let ts_count = ts_list.len();
        let typ = FileType::from_type_byte(self.files[idx].fs_type);
        let name = self.files[idx].name.clone();
        let mut data_offset = 0;
        let mut aux: u16 = match typ {
            FileType::Applesoft => 0x0801,
            _ => 0
        };
        let mut length: usize;
        if ts_count == 0 {
            length = 0;
        } else if typ == FileType::Applesoft || typ == FileType::Integer || typ == FileType::Binary {
            let buf = self.img.read_track_sector(ts_list[0][0] as usize,ts_list[0][1] as usize)?;
            if typ == FileType::Binary {
                aux = u16::from_le_bytes([buf[0],buf[1]]);
                length = u16::from_le_bytes([buf[2],buf[3]]) as usize;
                data_offset = 4;
            } else {
                length = u16::from_le_bytes([buf[0],buf[1]]) as usize;
                data_offset = 2;
            }
            if typ == FileType::Binary && length == 0 && aux == 0 && ts_count >= 8 &&
                name.contains('<') && name.contains('>') {
                // probable DDD archive; the smallest compression of a
                // 35-track disk is a couple of KB, so 8 sectors is a floor
                info!("found probable DDD archive, tweaking '{}'",name);
                length = ts_count * SECTOR_SIZE;
                data_offset = 0;
            }
            // catch bogus lengths in damaged A/I/B files
            if length > ts_count * SECTOR_SIZE {
                debug!("capping max len from {} to {} in '{}'",length,ts_count*SECTOR_SIZE,name);
                length = ts_count * SECTOR_SIZE - data_offset;
                *quality = Quality::Suspicious;
            }
        } else if typ == FileType::Text {
            length = ts_count * SECTOR_SIZE;
            length = self.trim_last_sector_up(length,ts_list[ts_count-1])?;
            trace!("scanned text file '{}' down to {}",name,length);
        } else {
            length = ts_count * SECTOR_SIZE;
        }
        let sparse_count = ts_list.iter().filter(|ts| **ts == [0,0]).count();
        let sparse_length = match length.checked_sub(sparse_count*SECTOR_SIZE + data_offset) {
            // a completely sparse file would otherwise go negative
            Some(v) => v + data_offset,
            None => 0
        };
        let finfo = &mut self.files[idx];
        finfo.length = length;
        finfo.sparse_length = sparse_length;
        finfo.aux = aux;
        if let FilePayload::Dos { data_offset: off, .. } = &mut finfo.payload {
            *off = data_offset;
        }
        Ok(())
    }

    /// mark the boot tracks appropriately now that files have been counted
    fn fix_volume_usage_map(&mut self) {
        for track in 0..usize::min(3,self.num_tracks()) {
            for sector in 0..self.num_sectors() {
                if let Ok(mut state) = self.usage.get_sector(track,sector) {
                    if state.is_marked_used && !state.is_used {
                        state.is_used = true;
                        state.purpose = ChunkPurpose::System;
                        self.usage.set_sector(track,sector,state).ok();
                    }
                }
            }
        }
    }

    /// Consistency scan.  A disk that fails is readable but not writable.
    fn check_disk_is_good(&mut self) -> bool {
        let mut result = true;
        if self.is_sector_free(VTOC_TRACK as usize,VTOC_SECTOR as usize) {
            self.img.add_note(NoteKind::Warning,"VTOC sector marked as free".to_string());
            result = false;
        }
        for ts in self.cat_sectors.clone() {
            if self.is_sector_free(ts[0] as usize,ts[1] as usize) {
                self.img.add_note(NoteKind::Warning,format!("catalog sector {},{} is marked as free",ts[0],ts[1]));
                result = false;
            }
        }
        let (not_marked,extra_used,conflicts) = self.usage.tallies();
        if extra_used > 0 {
            // not a problem, really
            self.img.add_note(NoteKind::Info,format!("{} sectors are marked used but not part of any file",extra_used));
        }
        if not_marked > 0 {
            self.img.add_note(NoteKind::Warning,format!("{} sectors are used by files but not marked used",not_marked));
            result = false;
        }
        if conflicts > 0 {
            self.img.add_note(NoteKind::Warning,format!("{} sectors are used by more than one file",conflicts));
            result = false;
        }
        let (damaged,suspicious) = super::scan_for_damaged_files(&self.files);
        if damaged {
            self.img.add_note(NoteKind::Warning,"one or more files are damaged".to_string());
            result = false;
        } else if suspicious {
            self.img.add_note(NoteKind::Warning,"one or more files look suspicious".to_string());
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

    /// Find the first free catalog slot, returning `(cat_ts,slot)`.
    fn get_free_catalog_entry(&mut self) -> Result<([u8;2],usize),DYNERR> {
        let mut ts = [self.vtoc.track1,self.vtoc.sector1];
        for _try in 0..MAX_CATALOG_SECTORS {
            if !self.ts_ok(ts[0] as usize,ts[1] as usize) {
                return Err(Box::new(Error::IOError));
            }
            let buf = self.img.read_track_sector(ts[0] as usize,ts[1] as usize)?;
            let cat = CatalogSector::from_bytes(&buf)?;
            for slot in 0..ENTRIES_PER_SECTOR {
                let t = cat.entries[slot].tsl_track;
                if t == 0 || t == 255 {
                    return Ok((ts,slot));
                }
            }
            ts = [cat.next_track,cat.next_sector];
            if ts == [0,0] {
                return Err(Box::new(super::Error::VolumeDirFull));
            }
        }
        Err(Box::new(super::Error::DirectoryLoop))
    }

    /// Put a DOS file system on the image.  When `reserve_dos_tracks` is set
    /// the first three tracks are marked in use the way `INIT` leaves them
    /// for a bootable disk.
    pub fn format(img: &mut DiskImg,volume_num: u8,reserve_dos_tracks: bool) -> STDRESULT {
        let tracks = img.num_tracks();
        let sectors = img.sectors_per_track();
        if tracks < MIN_TRACKS || tracks > MAX_TRACKS {
            return Err(Box::new(crate::img::Error::InvalidArg));
        }
        if sectors != 13 && sectors != 16 && sectors != 32 {
            return Err(Box::new(crate::img::Error::InvalidArg));
        }
        if volume_num < 1 || volume_num == 255 {
            return Err(Box::new(crate::img::Error::InvalidArg));
        }
        let format = match sectors {
            13 => FsFormat::Dos32,
            _ => FsFormat::Dos33
        };
        img.set_fs(format,img.order,Some(volume_num));
        let mut vtoc = VTOC::new();
        vtoc.pad1 = match sectors {
            13 => 0x02,
            _ => 0x04
        };
        vtoc.track1 = VTOC_TRACK;
        vtoc.sector1 = sectors as u8 - 1;
        vtoc.version = match sectors {
            13 => 2,
            _ => 3
        };
        vtoc.vol = volume_num;
        vtoc.max_pairs = MAX_TS_PAIRS as u8;
        vtoc.last_track = VTOC_TRACK+1;
        vtoc.last_direction = 1;
        vtoc.tracks = tracks as u8;
        vtoc.sectors = sectors as u8;
        vtoc.bytes = [0,1];
        // all free except the boot area and the catalog track
        let max_track = match reserve_dos_tracks {
            true => 3,
            false => 1
        };
        let all_free: u32 = match sectors {
            13 => 0xfff80000,
            16 => 0xffff0000,
            _ => 0xffffffff
        };
        for track in 0..tracks {
            let map = match track < max_track || track == VTOC_TRACK as usize {
                true => 0,
                false => all_free
            };
            vtoc.bitmap[track*4..track*4+4].copy_from_slice(&u32::to_be_bytes(map));
        }
        img.write_track_sector(VTOC_TRACK as usize,VTOC_SECTOR as usize,&vtoc.to_bytes())?;
        // chain the catalog sectors downward from the top of the track
        let mut cat = CatalogSector::new();
        for sect in (2..=sectors-1).rev() {
            cat.next_track = VTOC_TRACK;
            cat.next_sector = sect as u8 - 1;
            img.write_track_sector(VTOC_TRACK as usize,sect,&cat.to_bytes())?;
        }
        let mut last = CatalogSector::new();
        last.next_track = 0;
        last.next_sector = 0;
        img.write_track_sector(VTOC_TRACK as usize,1,&last.to_bytes())?;
        info!("formatted {} volume {}",format,volume_num);
        Ok(())
    }
}

impl super::DiskFS for Disk {
    fn fs_format(&self) -> FsFormat {
        self.img.fs_format
    }
    fn volume_id(&self) -> String {
        format!("{} Volume {}",self.img.fs_format,self.vtoc.vol)
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
            None => return Err(Box::new(Error::FileNotFound))
        };
        let (tslist,data_offset) = match &self.files[idx].payload {
            FilePayload::Dos { tslist, data_offset, .. } => (*tslist,*data_offset),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let length = self.files[idx].length;
        let mut quality = Quality::Good;
        let (ts_list,_index_list) = self.load_ts_list(tslist,&mut quality)?;
        let (slot,_gen) = self.open_files.open(&self.files[idx].name)?;
        let mut handle = Handle::new(slot,self.files[idx].name.clone(),SECTOR_SIZE);
        handle.eof = length;
        handle.data_offset = data_offset;
        handle.chunks = ts_list.iter().map(|ts| match *ts {
            [0,0] => Chunk::Sparse,
            [t,s] => Chunk::Sector(t,s)
        }).collect();
        handle.writable = self.files[idx].length == 0 && !self.img.is_read_only() && self.disk_is_good;
        Ok(handle)
    }
    fn close(&mut self,handle: Handle) -> STDRESULT {
        if let Some(pending) = self.pending.remove(&handle.slot) {
            // back-patch the first sector header for A/I/B, then fix up the
            // catalog entry's sector count
            let finfo = &self.files[pending.file_idx];
            let typ = FileType::from_type_byte(finfo.fs_type);
            let aux = finfo.aux;
            let mut eof = pending.eof;
            if typ == FileType::Applesoft || typ == FileType::Integer || typ == FileType::Binary {
                if eof > 65535 {
                    warn!("trimming A/I/B file from {} to 65535",eof);
                    eof = 65535;
                }
                let mut buf = self.img.read_track_sector(pending.first_ts[0] as usize,pending.first_ts[1] as usize)?;
                if typ == FileType::Binary {
                    buf[0..2].copy_from_slice(&u16::to_le_bytes(aux));
                    buf[2..4].copy_from_slice(&u16::to_le_bytes(eof as u16));
                } else {
                    buf[0..2].copy_from_slice(&u16::to_le_bytes(eof as u16));
                }
                self.img.write_track_sector(pending.first_ts[0] as usize,pending.first_ts[1] as usize,&buf)?;
            }
            let (cat_ts,cat_slot) = match &self.files[pending.file_idx].payload {
                FilePayload::Dos { cat_ts, cat_slot, .. } => (*cat_ts,*cat_slot),
                _ => return Err(Box::new(super::Error::InvalidArg))
            };
            let buf = self.img.read_track_sector(cat_ts[0] as usize,cat_ts[1] as usize)?;
            let mut cat = CatalogSector::from_bytes(&buf)?;
            cat.entries[cat_slot].sectors = u16::to_le_bytes(pending.sectors_used as u16);
            self.img.write_track_sector(cat_ts[0] as usize,cat_ts[1] as usize,&cat.to_bytes())?;
            let finfo = &mut self.files[pending.file_idx];
            finfo.length = pending.eof;
            finfo.sparse_length = pending.eof;
            finfo.sectors = pending.sectors_used;
        }
        self.open_files.close(handle.slot)
    }
    fn write(&mut self,handle: &mut Handle,buf: &[u8],mut progress: Option<&mut ProgressFn>) -> Result<usize,DYNERR> {
        self.write_protect_check()?;
        if !handle.writable || handle.mark != 0 || handle.eof != 0 {
            // one-shot write from the start of a fresh file
            return Err(Box::new(super::Error::InvalidArg));
        }
        if buf.len() >= 0x1000000 {
            return Err(Box::new(super::Error::InvalidArg));
        }
        let idx = match self.find_file(&handle.name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::FileNotFound))
        };
        let first_index = match &self.files[idx].payload {
            FilePayload::Dos { tslist, .. } => *tslist,
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let actual_len = buf.len() + handle.data_offset;
        if actual_len == 0 {
            return Ok(0);
        }
        let num_sectors = (actual_len + SECTOR_SIZE - 1)/SECTOR_SIZE;
        let index_count = (num_sectors + MAX_TS_PAIRS - 1)/MAX_TS_PAIRS;
        if num_sectors + index_count - 1 > self.num_free_sectors() {
            return Err(Box::new(Error::DiskFull));
        }
        // the T/S sector from create() is index zero, allocate the rest
        let mut index_list: Vec<[u8;2]> = vec![first_index];
        for _i in 1..index_count {
            index_list.push(self.alloc_sector()?);
        }
        let mut ts_list: Vec<[u8;2]> = Vec::with_capacity(num_sectors);
        for _i in 0..num_sectors {
            ts_list.push(self.alloc_sector()?);
        }
        // write the data, header space zeroed in the first sector
        let mut cancelled = false;
        let mut src_mark = 0;
        for (i,ts) in ts_list.iter().enumerate() {
            let mut sct = [0u8;SECTOR_SIZE];
            let dst_start = match i {
                0 => handle.data_offset,
                _ => 0
            };
            let n = usize::min(SECTOR_SIZE-dst_start,buf.len()-src_mark);
            sct[dst_start..dst_start+n].copy_from_slice(&buf[src_mark..src_mark+n]);
            src_mark += n;
            self.img.write_track_sector(ts[0] as usize,ts[1] as usize,&sct)?;
            if let Some(f) = progress.as_mut() {
                if !f(src_mark as u64) {
                    cancelled = true;
                    break;
                }
            }
        }
        if cancelled {
            // roll the allocations back; the catalog entry from create()
            // stays, naming an empty file
            for ts in &ts_list {
                self.set_sector_used(ts[0] as usize,ts[1] as usize,false);
            }
            for ts in index_list.iter().skip(1) {
                self.set_sector_used(ts[0] as usize,ts[1] as usize,false);
            }
            self.save_vtoc()?;
            return Err(Box::new(super::Error::Cancelled));
        }
        // fill out the T/S list sectors; write the last one first so a
        // failure can't leave a partially-linked list
        for i in (0..index_count).rev() {
            let mut tsl = TrackSectorList::new();
            if i != index_count-1 {
                tsl.next_track = index_list[i+1][0];
                tsl.next_sector = index_list[i+1][1];
            }
            tsl.sector_base = u16::to_le_bytes((MAX_TS_PAIRS*i) as u16);
            for j in 0..MAX_TS_PAIRS {
                let ent = i*MAX_TS_PAIRS + j;
                if ent == num_sectors {
                    break;
                }
                tsl.pairs[j*2] = ts_list[ent][0];
                tsl.pairs[j*2+1] = ts_list[ent][1];
            }
            self.img.write_track_sector(index_list[i][0] as usize,index_list[i][1] as usize,&tsl.to_bytes())?;
        }
        self.save_vtoc()?;
        handle.eof = buf.len();
        handle.mark = buf.len();
        handle.chunks = ts_list.iter().map(|ts| Chunk::Sector(ts[0],ts[1])).collect();
        self.pending.insert(handle.slot,PendingClose {
            file_idx: idx,
            eof: buf.len(),
            sectors_used: num_sectors + index_count,
            first_ts: ts_list[0]
        });
        Ok(buf.len())
    }
    fn create(&mut self,name: &str,prodos_type: u8,aux: u16) -> STDRESULT {
        self.write_protect_check()?;
        if !is_valid_file_name(name) {
            return Err(Box::new(super::Error::InvalidName));
        }
        if self.find_file(name).is_some() {
            return Err(Box::new(super::Error::FileExists));
        }
        let typ = match FileType::from_prodos_type(prodos_type) {
            Some(t) => t,
            None => return Err(Box::new(Error::FileTypeMismatch))
        };
        // allocate the T/S list sector before touching the catalog
        let tslist = self.alloc_sector()?;
        self.img.write_track_sector(tslist[0] as usize,tslist[1] as usize,&TrackSectorList::new().to_bytes())?;
        let (cat_ts,cat_slot) = match self.get_free_catalog_entry() {
            Ok(pair) => pair,
            Err(e) => {
                self.set_sector_used(tslist[0] as usize,tslist[1] as usize,false);
                return Err(e);
            }
        };
        let buf = self.img.read_track_sector(cat_ts[0] as usize,cat_ts[1] as usize)?;
        let mut cat = CatalogSector::from_bytes(&buf)?;
        let entry = &mut cat.entries[cat_slot];
        entry.tsl_track = tslist[0];
        entry.tsl_sector = tslist[1];
        entry.file_type = typ as u8;
        entry.name = string_to_file_name(&name.to_uppercase());
        entry.sectors = u16::to_le_bytes(1);
        self.img.write_track_sector(cat_ts[0] as usize,cat_ts[1] as usize,&cat.to_bytes())?;
        self.save_vtoc()?;
        let mut finfo = FileInfo::new(name.to_uppercase(),FilePayload::Dos {
            tslist,
            cat_ts,
            cat_slot,
            data_offset: match typ {
                FileType::Binary => 4,
                FileType::Applesoft | FileType::Integer => 2,
                _ => 0
            }
        });
        finfo.fs_type = typ as u8;
        finfo.prodos_type = typ.prodos_type();
        finfo.aux = aux;
        finfo.sectors = 1;
        self.files.push(finfo);
        Ok(())
    }
    fn delete(&mut self,name: &str) -> STDRESULT {
        self.write_protect_check()?;
        let idx = match self.find_file(name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::FileNotFound))
        };
        if self.files[idx].locked {
            return Err(Box::new(Error::FileLocked));
        }
        if self.open_files.is_open(&self.files[idx].name) {
            return Err(Box::new(super::Error::AlreadyOpen));
        }
        let (tslist,cat_ts,cat_slot) = match &self.files[idx].payload {
            FilePayload::Dos { tslist, cat_ts, cat_slot, .. } => (*tslist,*cat_ts,*cat_slot),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let mut quality = Quality::Good;
        let (ts_list,index_list) = self.load_ts_list(tslist,&mut quality)?;
        for ts in ts_list {
            if ts != [0,0] {
                self.set_sector_used(ts[0] as usize,ts[1] as usize,false);
            }
        }
        for ts in index_list {
            self.set_sector_used(ts[0] as usize,ts[1] as usize,false);
        }
        // the T/S track byte moves to the end of the name, the way DOS
        // remembers deleted files
        let buf = self.img.read_track_sector(cat_ts[0] as usize,cat_ts[1] as usize)?;
        let mut cat = CatalogSector::from_bytes(&buf)?;
        let entry = &mut cat.entries[cat_slot];
        entry.name[29] = entry.tsl_track;
        entry.tsl_track = 0xff;
        self.img.write_track_sector(cat_ts[0] as usize,cat_ts[1] as usize,&cat.to_bytes())?;
        self.save_vtoc()?;
        self.files.remove(idx);
        Ok(())
    }
    fn rename(&mut self,old_name: &str,new_name: &str) -> STDRESULT {
        self.write_protect_check()?;
        if !is_valid_file_name(new_name) {
            return Err(Box::new(super::Error::InvalidName));
        }
        if self.find_file(new_name).is_some() {
            return Err(Box::new(super::Error::FileExists));
        }
        let idx = match self.find_file(old_name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::FileNotFound))
        };
        if self.files[idx].locked {
            return Err(Box::new(Error::FileLocked));
        }
        let (cat_ts,cat_slot) = match &self.files[idx].payload {
            FilePayload::Dos { cat_ts, cat_slot, .. } => (*cat_ts,*cat_slot),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let buf = self.img.read_track_sector(cat_ts[0] as usize,cat_ts[1] as usize)?;
        let mut cat = CatalogSector::from_bytes(&buf)?;
        cat.entries[cat_slot].name = string_to_file_name(&new_name.to_uppercase());
        self.img.write_track_sector(cat_ts[0] as usize,cat_ts[1] as usize,&cat.to_bytes())?;
        self.files[idx].name = new_name.to_uppercase();
        Ok(())
    }
    fn set_info(&mut self,name: &str,prodos_type: Option<u8>,aux: Option<u16>,locked: Option<bool>) -> STDRESULT {
        self.write_protect_check()?;
        let idx = match self.find_file(name) {
            Some(idx) => idx,
            None => return Err(Box::new(Error::FileNotFound))
        };
        let (cat_ts,cat_slot) = match &self.files[idx].payload {
            FilePayload::Dos { cat_ts, cat_slot, .. } => (*cat_ts,*cat_slot),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let buf = self.img.read_track_sector(cat_ts[0] as usize,cat_ts[1] as usize)?;
        let mut cat = CatalogSector::from_bytes(&buf)?;
        let entry = &mut cat.entries[cat_slot];
        if let Some(ptype) = prodos_type {
            if entry.file_type & 0x80 > 0 && locked != Some(false) {
                return Err(Box::new(Error::FileLocked));
            }
            match FileType::from_prodos_type(ptype) {
                Some(typ) => entry.file_type = (entry.file_type & 0x80) | typ as u8,
                None => return Err(Box::new(Error::FileTypeMismatch))
            };
        }
        if let Some(lock) = locked {
            entry.file_type = match lock {
                true => entry.file_type | 0x80,
                false => entry.file_type & 0x7f
            };
        }
        self.img.write_track_sector(cat_ts[0] as usize,cat_ts[1] as usize,&cat.to_bytes())?;
        let typ = FileType::from_type_byte(cat.entries[cat_slot].file_type);
        let finfo = &mut self.files[idx];
        finfo.fs_type = cat.entries[cat_slot].file_type;
        finfo.prodos_type = typ.prodos_type();
        finfo.locked = finfo.fs_type & 0x80 > 0;
        if let Some(a) = aux {
            finfo.aux = a;
        }
        Ok(())
    }
    fn rename_volume(&mut self,new_name: &str) -> STDRESULT {
        self.write_protect_check()?;
        if !is_valid_volume_name(new_name) {
            return Err(Box::new(super::Error::InvalidName));
        }
        self.vtoc.vol = new_name.parse::<u8>()?;
        self.img.dos_volume = Some(self.vtoc.vol);
        self.save_vtoc()
    }
    fn get_img(&mut self) -> &mut DiskImg {
        &mut self.img
    }
}
