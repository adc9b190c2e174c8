//! # RDOS file system module
//!
//! RDOS shipped on SSI game disks in three variants:
//! * RDOS 3.2: 13-sector disk, physical order, signature `RDOS 2`
//! * RDOS 3.3: 16-sector disk, ProDOS order, signature `RDOS 3`
//! * RDOS 3: a 13-sector layout cracked onto a 16-sector disk, physical
//!   order, signature `RDOS 2`
//!
//! The catalog is flat: track 1 sectors 0 through 10, 32-byte entries, and
//! every file is one contiguous run of 256-byte sectors.  Read-only.

use log::{debug,trace};
use super::{Chunk,FileInfo,FilePayload,Handle,OpenFiles,Quality};
use super::usage::{ChunkPurpose,VolumeUsage};
use crate::img::{DiskImg,FsFormat,SectorOrder,SECTOR_SIZE};
use crate::{DYNERR,STDRESULT};

const CAT_TRACK: usize = 1;
const NUM_CAT_SECTORS: usize = 11;      // 0 through 10
const DIR_ENTRY_LEN: usize = 32;
const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE/DIR_ENTRY_LEN;
const MAX_FILE_NAME: usize = 24;

#[derive(Clone,Copy,PartialEq,Eq)]
enum FileType {
    Applesoft,
    Binary,
    Text,
    Unknown
}

impl FileType {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0xc1 => Self::Applesoft,    // 'A'
            0xc2 => Self::Binary,       // 'B'
            0xd4 => Self::Text,         // 'T'
            _ => Self::Unknown
        }
    }
    fn prodos_type(&self) -> u8 {
        match self {
            Self::Applesoft => 0xfc,
            Self::Binary => 0x06,
            Self::Text => 0x04,
            Self::Unknown => 0x00
        }
    }
}

/// Check the signature at (1,0) and the catalog code marker, returning the
/// variant.  The variants are distinguished by sector count and by which
/// sector holds the `<NAME>` string of the catalog code.
fn test_image(img: &mut DiskImg,order: SectorOrder) -> Option<FsFormat> {
    let spt = img.sectors_per_track();
    if spt != 13 && spt != 16 {
        return None;
    }
    let buf = img.read_track_sector_swapped(CAT_TRACK,0,order,SectorOrder::Physical).ok()?;
    // "RDOS " in high ASCII, plus a sane block size byte
    if buf[0] != b'R'+0x80 || buf[1] != b'D'+0x80 || buf[2] != b'O'+0x80 ||
        buf[3] != b'S'+0x80 || buf[4] != b' '+0x80 {
        trace!("RDOS no signature found on ({},0)",CAT_TRACK);
        return None;
    }
    if buf[25] != 26 && buf[25] != 32 {
        return None;
    }
    // guess the variant from the first catalog entry, usually
    // "RDOS 2.0", "RDOS 2.1", or "RDOS 3.3"
    let format = match spt {
        13 => FsFormat::Rdos32,
        _ => match buf[5] {
            b if b == b'2'+0x80 => FsFormat::Rdos3,
            _ => FsFormat::Rdos33
        }
    };
    // the sector holding the catalog code pins down the ordering
    let (track,sector,offset,or_mask,code_order) = match format {
        FsFormat::Rdos32 | FsFormat::Rdos3 => (1,12,0xa2,0x80u8,SectorOrder::Physical),
        _ => (0,1,0x98,0x00u8,SectorOrder::ProDos)
    };
    let buf = img.read_track_sector_swapped(track,sector,order,code_order).ok()?;
    let compare = b"<NAME>";
    for (i,ch) in compare.iter().enumerate() {
        if buf[offset+i] != *ch | or_mask {
            return None;
        }
    }
    trace!("RDOS found '<NAME>' signature (order={})",order);
    Some(format)
}

/// The primary interface for RDOS disk operations.
pub struct Disk {
    img: DiskImg,
    usage: VolumeUsage,
    files: Vec<FileInfo>,
    open_files: OpenFiles,
    volume_name: String,
    sect_per_track: usize,
    disk_is_good: bool
}

impl Disk {
    /// Test for any RDOS variant.  We can reliably detect which one.
    pub fn test(img: &mut DiskImg) -> Option<(SectorOrder,FsFormat)> {
        if !img.has_sectors() || img.num_tracks() != 35 {
            return None;
        }
        for order in SectorOrder::candidates(img.order) {
            if let Some(format) = test_image(img,order) {
                return Some((order,format));
            }
        }
        debug!("RDOS didn't find valid FS");
        None
    }

    pub fn mount(img: DiskImg) -> Result<Self,DYNERR> {
        let (volume_name,sect_per_track) = match img.fs_format {
            FsFormat::Rdos33 => ("RDOS 3.3",16),
            FsFormat::Rdos32 => ("RDOS 3.2",13),
            FsFormat::Rdos3 => ("RDOS 3",13),
            _ => return Err(Box::new(super::Error::FileSystemNotFound))
        };
        let usage = VolumeUsage::new_sectors(img.num_tracks(),sect_per_track);
        let mut disk = Self {
            img,
            usage,
            files: Vec::new(),
            open_files: OpenFiles::new(),
            volume_name: volume_name.to_string(),
            sect_per_track,
            disk_is_good: false
        };
        disk.read_catalog()?;
        disk.scan_file_usage()?;
        let (damaged,_suspicious) = super::scan_for_damaged_files(&disk.files);
        disk.disk_is_good = !damaged;
        disk.usage.dump();
        Ok(disk)
    }

    /// Slurp the whole catalog into memory and walk the 32-byte entries.
    fn read_catalog(&mut self) -> STDRESULT {
        let mut dir: Vec<u8> = Vec::with_capacity(SECTOR_SIZE*NUM_CAT_SECTORS);
        for sector in 0..NUM_CAT_SECTORS {
            dir.append(&mut self.img.read_track_sector(CAT_TRACK,sector)?);
        }
        let max_sector = self.img.num_tracks()*self.sect_per_track;
        for i in 0..NUM_CAT_SECTORS*ENTRIES_PER_SECTOR {
            let entry = &dir[i*DIR_ENTRY_LEN..(i+1)*DIR_ENTRY_LEN];
            if entry[0] == 0x80 || entry[24] == 0xa0 {
                // deleted file
                continue;
            }
            if entry[24] == 0x00 {
                // unused entry; must be at end of catalog
                break;
            }
            let mut name_buf: Vec<u8> = entry[0..MAX_FILE_NAME].to_vec();
            super::lower_ascii(&mut name_buf);
            let name = String::from_utf8_lossy(&name_buf).trim_end().to_string();
            let typ = FileType::from_byte(entry[24]);
            let num_sectors = entry[25] as u16;
            let load_addr = u16::from_le_bytes([entry[26],entry[27]]);
            let length = u16::from_le_bytes([entry[28],entry[29]]);
            let start_sector = u16::from_le_bytes([entry[30],entry[31]]);
            let mut finfo = FileInfo::new(name,FilePayload::Rdos {
                start_sector,
                num_sectors,
                load_addr
            });
            finfo.fs_type = entry[24];
            finfo.prodos_type = typ.prodos_type();
            finfo.aux = load_addr;
            finfo.length = length as usize;
            finfo.sparse_length = length as usize;
            finfo.sectors = num_sectors as usize;
            finfo.locked = true;
            if start_sector as usize + num_sectors as usize > max_sector {
                debug!("RDOS invalid start/count ({} + {}) '{}'",start_sector,num_sectors,finfo.name);
                finfo.length = 0;
                finfo.sectors = 0;
                finfo.quality = Quality::Damaged;
                if let FilePayload::Rdos { start_sector, num_sectors, .. } = &mut finfo.payload {
                    *start_sector = 0;
                    *num_sectors = 0;
                }
            }
            self.files.push(finfo);
        }
        Ok(())
    }

    /// No in-use map and no index blocks, so this is straightforward.
    fn scan_file_usage(&mut self) -> STDRESULT {
        for f in self.files.clone() {
            if let FilePayload::Rdos { start_sector, num_sectors, .. } = f.payload {
                for s in start_sector..start_sector+num_sectors {
                    let track = s as usize/self.sect_per_track;
                    let sector = s as usize%self.sect_per_track;
                    self.usage.claim_sector(track,sector,ChunkPurpose::UserData)?;
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
        self.img.fs_format
    }
    fn volume_id(&self) -> String {
        self.volume_name.clone()
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
        let (start,count) = match &self.files[idx].payload {
            FilePayload::Rdos { start_sector, num_sectors, .. } => (*start_sector,*num_sectors),
            _ => return Err(Box::new(super::Error::InvalidArg))
        };
        let (slot,_gen) = self.open_files.open(&self.files[idx].name)?;
        let mut handle = Handle::new(slot,self.files[idx].name.clone(),SECTOR_SIZE);
        handle.eof = self.files[idx].length;
        for s in start..start+count {
            let track = s as usize/self.sect_per_track;
            let sector = s as usize%self.sect_per_track;
            handle.chunks.push(Chunk::Sector(track as u8,sector as u8));
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
