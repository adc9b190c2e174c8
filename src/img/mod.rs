//! # Disk Image Module
//!
//! `DiskImg` sits between the outer wrappers and the file systems.  It owns
//! the raw image bytes (or a windowed view of a parent's bytes, for
//! partitions), knows the physical format and geometry, and translates
//! logical sector and block addresses through the sector-order permutations.
//!
//! ## Layers
//!
//! A linear image stores each track as sixteen 256-byte sectors in *some*
//! order.  Which logical sector lives at which position is the image's
//! sector order; which order a file system expects is a property of the file
//! system.  `read_track_sector` composes the two permutations.  Block access
//! rides on top of sector access for sectored media, or goes straight to the
//! bytes for block media.  Nibble images route through the GCR codec in
//! `nib`, which caches one decoded track at a time.
//!
//! ## Analysis
//!
//! `analyze_physical` classifies the image by size.  Sector order and file
//! system are chosen together by `fs::probe`, which tries each candidate
//! order against each file system's test routine and commits the first
//! (highest-scoring) match.  The whole pipeline for a byte stream is wired
//! up in the crate root.

pub mod gcr;
pub mod nib;

use std::rc::Rc;
use std::cell::RefCell;
use log::{debug,warn};
use crate::DYNERR;

pub const SECTOR_SIZE: usize = 256;
pub const BLOCK_SIZE: usize = 512;
/// partitions may nest (a MacPart inside a MacPart), but not without limit
pub const MAX_SUB_DEPTH: usize = 4;

/// Enumerates disk image errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("unknown physical format")]
    UnknownPhysicalFormat,
    #[error("bad disk image")]
    BadDiskImage,
    #[error("invalid track request")]
    InvalidTrack,
    #[error("invalid sector request")]
    InvalidSector,
    #[error("invalid block request")]
    InvalidBlock,
    #[error("invalid argument")]
    InvalidArg,
    #[error("image size did not match the request")]
    ImageSizeMismatch,
    #[error("image is read only")]
    ReadOnly,
    #[error("sector could not be read")]
    SectorUnreadable,
    #[error("sub-volume nesting limit reached")]
    NestingLimit,
    #[error("invalid index")]
    InvalidIndex,
    #[error("internal error")]
    Internal,
    #[error("file system not found")]
    FilesystemNotFound
}

/// Enumerates nibble-level errors.
#[derive(thiserror::Error,Debug)]
pub enum NibbleError {
    #[error("invalid byte while decoding")]
    InvalidByte,
    #[error("bad checksum found in a sector")]
    BadChecksum,
    #[error("sector not found")]
    SectorNotFound,
    #[error("track not usable")]
    BadTrack,
    #[error("nibble type appeared in wrong context")]
    NibbleType
}

/// A total, invertible permutation of the sixteen logical sectors in a track.
/// `Unknown` acts as a passthrough.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum SectorOrder {
    Dos,
    ProDos,
    Cpm,
    Physical,
    Unknown
}

impl std::fmt::Display for SectorOrder {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dos => write!(f,"DOS"),
            Self::ProDos => write!(f,"ProDOS"),
            Self::Cpm => write!(f,"CP/M"),
            Self::Physical => write!(f,"physical"),
            Self::Unknown => write!(f,"unknown")
        }
    }
}

const RAW2DOS: [usize;16] = [0,7,14,6,13,5,12,4,11,3,10,2,9,1,8,15];
const DOS2RAW: [usize;16] = [0,13,11,9,7,5,3,1,14,12,10,8,6,4,2,15];
const RAW2PRODOS: [usize;16] = [0,8,1,9,2,10,3,11,4,12,5,13,6,14,7,15];
const PRODOS2RAW: [usize;16] = [0,2,4,6,8,10,12,14,1,3,5,7,9,11,13,15];
const RAW2CPM: [usize;16] = [0,11,6,1,12,7,2,13,8,3,14,9,4,15,10,5];
const CPM2RAW: [usize;16] = [0,3,6,9,12,15,2,5,8,11,14,1,4,7,10,13];

impl SectorOrder {
    /// physical sector holding logical sector `sec` under this order
    pub fn to_physical(&self,sec: usize) -> usize {
        match self {
            Self::Dos => DOS2RAW[sec],
            Self::ProDos => PRODOS2RAW[sec],
            Self::Cpm => CPM2RAW[sec],
            Self::Physical | Self::Unknown => sec
        }
    }
    /// logical sector stored at physical position `psec` under this order
    pub fn from_physical(&self,psec: usize) -> usize {
        match self {
            Self::Dos => RAW2DOS[psec],
            Self::ProDos => RAW2PRODOS[psec],
            Self::Cpm => RAW2CPM[psec],
            Self::Physical | Self::Unknown => psec
        }
    }
    /// Candidate orders for probing, preferred one first.
    pub fn candidates(preferred: Self) -> Vec<Self> {
        let all = [Self::Dos,Self::ProDos,Self::Cpm,Self::Physical];
        let mut ans = Vec::new();
        if preferred != Self::Unknown {
            ans.push(preferred);
        }
        for order in all {
            if !ans.contains(&order) {
                ans.push(order);
            }
        }
        ans
    }
}

/// Physical layout of the stored bytes.  Exactly one of sectors, blocks, or
/// nibbles is primary; derived views (blocks over 16-sector media) are
/// computed on the fly.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum PhysicalFormat {
    /// linear 256-byte sectors, `tracks` x `sectors` per track
    Sectors { tracks: usize, sectors: usize },
    /// linear 512-byte blocks
    Blocks { blocks: usize },
    /// raw GCR nibble tracks of fixed length (6656 for NIB, 6384 for NB2)
    Nibbles { tracks: usize, track_len: usize }
}

/// File system identification, set by `fs::probe`.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum FsFormat {
    Unknown,
    Dos32,
    Dos33,
    Pascal,
    Cpm,
    Rdos33,
    Rdos32,
    Rdos3,
    Gutenberg,
    Fat,
    MacPart,
    FocusDrive
}

impl std::fmt::Display for FsFormat {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f,"unknown"),
            Self::Dos32 => write!(f,"DOS 3.2"),
            Self::Dos33 => write!(f,"DOS 3.3"),
            Self::Pascal => write!(f,"Pascal"),
            Self::Cpm => write!(f,"CP/M"),
            Self::Rdos33 => write!(f,"RDOS 3.3"),
            Self::Rdos32 => write!(f,"RDOS 3.2"),
            Self::Rdos3 => write!(f,"RDOS 3"),
            Self::Gutenberg => write!(f,"Gutenberg"),
            Self::Fat => write!(f,"MS-DOS FAT"),
            Self::MacPart => write!(f,"Macintosh partitions"),
            Self::FocusDrive => write!(f,"FocusDrive partitions")
        }
    }
}

impl FsFormat {
    /// the sector order a file system expects when it calls `read_track_sector`
    pub fn preferred_order(&self) -> SectorOrder {
        match self {
            Self::Dos32 | Self::Dos33 | Self::Gutenberg => SectorOrder::Dos,
            Self::Pascal | Self::Fat | Self::MacPart | Self::FocusDrive => SectorOrder::ProDos,
            Self::Cpm => SectorOrder::Cpm,
            Self::Rdos33 => SectorOrder::ProDos,
            Self::Rdos32 | Self::Rdos3 => SectorOrder::Physical,
            Self::Unknown => SectorOrder::Unknown
        }
    }
}

/// How hard the file system probes should squint.
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum Leniency {
    Not,
    Very
}

#[derive(Clone,Copy,PartialEq,Eq)]
pub enum NoteKind {
    Info,
    Warning
}

/// Human-readable observations accumulated during analysis.  Structural
/// corruption found after a file system has been chosen lands here rather
/// than failing the mount.
#[derive(Clone)]
pub struct Note {
    pub kind: NoteKind,
    pub text: String
}

pub(crate) struct NibbleCache {
    pub track: Option<usize>,
    pub buf: Vec<u8>,
    pub dirty: bool,
    pub descr: Option<usize>
}

/// The disk image: byte storage plus everything analysis has learned about it.
pub struct DiskImg {
    storage: Rc<RefCell<Vec<u8>>>,
    offset: usize,
    length: usize,
    depth: usize,
    read_only: bool,
    pub physical: PhysicalFormat,
    /// order in which the image file stores its sectors
    pub order: SectorOrder,
    /// order the chosen file system addresses sectors with
    pub fs_order: SectorOrder,
    pub fs_format: FsFormat,
    pub dos_volume: Option<u8>,
    pub wrapper: Option<crate::wrap::WrapperKind>,
    pub wrapper_damaged: bool,
    notes: Vec<Note>,
    pub(crate) nib_cache: Option<NibbleCache>
}

impl DiskImg {
    /// Take ownership of raw (already unwrapped) image bytes.  The physical
    /// format is not probed until `analyze_physical`.
    pub fn from_bytes(data: Vec<u8>,read_only: bool) -> Self {
        let length = data.len();
        Self {
            storage: Rc::new(RefCell::new(data)),
            offset: 0,
            length,
            depth: 0,
            read_only,
            physical: PhysicalFormat::Blocks { blocks: 0 },
            order: SectorOrder::Unknown,
            fs_order: SectorOrder::Unknown,
            fs_format: FsFormat::Unknown,
            dos_volume: None,
            wrapper: None,
            wrapper_damaged: false,
            notes: Vec::new(),
            nib_cache: None
        }
    }
    /// Create a fresh sectored image filled with zeroes.
    pub fn create_sectors(tracks: usize,sectors: usize) -> Self {
        let mut ans = Self::from_bytes(vec![0;tracks*sectors*SECTOR_SIZE],false);
        ans.physical = PhysicalFormat::Sectors { tracks, sectors };
        ans.order = SectorOrder::Dos;
        ans.fs_order = SectorOrder::Dos;
        ans
    }
    /// Create a fresh 35-track NIB-style nibble image with formatted
    /// address and data fields, using one of the standard dialects.
    pub fn create_nibbles(descr_idx: usize,vol: u8) -> Result<Self,DYNERR> {
        let (tracks,track_len) = (35,6656);
        let mut ans = Self::from_bytes(vec![0;tracks*track_len],false);
        ans.physical = PhysicalFormat::Nibbles { tracks, track_len };
        ans.nib_cache = Some(NibbleCache { track: None, buf: Vec::new(), dirty: false, descr: None });
        ans.order = SectorOrder::Physical;
        ans.fs_order = SectorOrder::Physical;
        ans.dos_volume = Some(vol);
        ans.format_nibble_tracks(descr_idx,vol)?;
        Ok(ans)
    }
    /// Create a fresh block image filled with zeroes.
    pub fn create_blocks(blocks: usize) -> Self {
        let mut ans = Self::from_bytes(vec![0;blocks*BLOCK_SIZE],false);
        ans.physical = PhysicalFormat::Blocks { blocks };
        ans.order = SectorOrder::ProDos;
        ans.fs_order = SectorOrder::ProDos;
        ans
    }
    /// A windowed view over a block range of this image, sharing the bytes.
    /// Read-only propagates downward.  Sub-images are implicitly
    /// ProDOS-ordered block devices.
    pub fn sub_image(&self,start_block: usize,num_blocks: usize) -> Result<DiskImg,DYNERR> {
        if self.depth+1 >= MAX_SUB_DEPTH {
            return Err(Box::new(Error::NestingLimit));
        }
        let start = start_block*BLOCK_SIZE;
        let len = num_blocks*BLOCK_SIZE;
        if start + len > self.length {
            return Err(Box::new(Error::InvalidBlock));
        }
        Ok(DiskImg {
            storage: Rc::clone(&self.storage),
            offset: self.offset + start,
            length: len,
            depth: self.depth + 1,
            read_only: self.read_only,
            physical: PhysicalFormat::Blocks { blocks: num_blocks },
            order: SectorOrder::ProDos,
            fs_order: SectorOrder::Unknown,
            fs_format: FsFormat::Unknown,
            dos_volume: None,
            wrapper: None,
            wrapper_damaged: false,
            notes: Vec::new(),
            nib_cache: None
        })
    }
    pub fn len(&self) -> usize {
        self.length
    }
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }
    pub fn depth(&self) -> usize {
        self.depth
    }
    pub fn add_note(&mut self,kind: NoteKind,text: String) {
        match kind {
            NoteKind::Warning => warn!("{}",text),
            NoteKind::Info => debug!("{}",text)
        }
        self.notes.push(Note { kind, text });
    }
    pub fn notes(&self) -> &Vec<Note> {
        &self.notes
    }
    /// Copy of the whole (view of the) image, e.g. for re-wrapping.
    pub fn to_bytes(&self) -> Vec<u8> {
        let stor = self.storage.borrow();
        stor[self.offset..self.offset+self.length].to_vec()
    }

    pub(crate) fn read_bytes(&self,offset: usize,len: usize) -> Result<Vec<u8>,DYNERR> {
        if offset + len > self.length {
            return Err(Box::new(Error::ImageSizeMismatch));
        }
        let stor = self.storage.borrow();
        Ok(stor[self.offset+offset..self.offset+offset+len].to_vec())
    }
    pub(crate) fn write_bytes(&mut self,offset: usize,dat: &[u8]) -> Result<(),DYNERR> {
        if self.read_only {
            return Err(Box::new(Error::ReadOnly));
        }
        if offset + dat.len() > self.length {
            return Err(Box::new(Error::ImageSizeMismatch));
        }
        let mut stor = self.storage.borrow_mut();
        stor[self.offset+offset..self.offset+offset+dat.len()].copy_from_slice(dat);
        Ok(())
    }

    pub fn num_tracks(&self) -> usize {
        match self.physical {
            PhysicalFormat::Sectors { tracks, .. } => tracks,
            PhysicalFormat::Nibbles { tracks, .. } => tracks,
            PhysicalFormat::Blocks { blocks } => blocks/8
        }
    }
    pub fn sectors_per_track(&self) -> usize {
        match self.physical {
            PhysicalFormat::Sectors { sectors, .. } => sectors,
            PhysicalFormat::Nibbles { .. } => match &self.nib_cache {
                Some(cache) => match cache.descr {
                    Some(idx) => nib::STD_NIBBLE_DESCRS[idx].num_sectors,
                    None => 16
                },
                None => 16
            },
            PhysicalFormat::Blocks { .. } => 16
        }
    }
    pub fn num_blocks(&self) -> usize {
        match self.physical {
            PhysicalFormat::Blocks { blocks } => blocks,
            PhysicalFormat::Sectors { tracks, sectors } if sectors==16 => tracks*sectors/2,
            PhysicalFormat::Sectors { .. } => 0,
            PhysicalFormat::Nibbles { tracks, .. } => match self.sectors_per_track() {
                16 => tracks*8,
                _ => 0
            }
        }
    }
    pub fn has_sectors(&self) -> bool {
        match self.physical {
            PhysicalFormat::Sectors { .. } => true,
            PhysicalFormat::Nibbles { .. } => self.nib_cache.as_ref().is_some_and(|c| c.descr.is_some()),
            PhysicalFormat::Blocks { .. } => true  // derived view
        }
    }
    pub fn has_blocks(&self) -> bool {
        self.num_blocks() > 0
    }
    pub fn has_nibbles(&self) -> bool {
        matches!(self.physical,PhysicalFormat::Nibbles { .. })
    }

    /// Stage 1 of analysis: classify the physical format from the byte count.
    /// Nibble images also get their dialect identified here.
    pub fn analyze_physical(&mut self) -> Result<(),DYNERR> {
        self.physical = match self.length {
            116480 => PhysicalFormat::Sectors { tracks: 35, sectors: 13 },
            143360 => PhysicalFormat::Sectors { tracks: 35, sectors: 16 },
            // 40 track 5.25 inch images exist in the wild
            163840 => PhysicalFormat::Sectors { tracks: 40, sectors: 16 },
            232960 => PhysicalFormat::Nibbles { tracks: 35, track_len: 6656 },
            223440 => PhysicalFormat::Nibbles { tracks: 35, track_len: 6384 },
            len if len >= BLOCK_SIZE && len%BLOCK_SIZE == 0 => PhysicalFormat::Blocks { blocks: len/BLOCK_SIZE },
            _ => {
                debug!("image size {} matches no physical format",self.length);
                return Err(Box::new(Error::UnknownPhysicalFormat));
            }
        };
        if self.has_nibbles() {
            self.nib_cache = Some(NibbleCache { track: None, buf: Vec::new(), dirty: false, descr: None });
            self.analyze_nibble_data()?;
        }
        debug!("physical format {:?}",self.physical);
        Ok(())
    }

    /// Commit the result of the file system probe.
    pub fn set_fs(&mut self,format: FsFormat,order: SectorOrder,dos_volume: Option<u8>) {
        self.fs_format = format;
        self.order = order;
        self.fs_order = format.preferred_order();
        if dos_volume.is_some() {
            self.dos_volume = dos_volume;
        }
    }

    fn sector_offset(&self,track: usize,sector: usize,img_order: SectorOrder,want_order: SectorOrder) -> Result<usize,DYNERR> {
        let (tracks,sectors) = match self.physical {
            PhysicalFormat::Sectors { tracks, sectors } => (tracks,sectors),
            PhysicalFormat::Blocks { blocks } => (blocks/8,16),
            PhysicalFormat::Nibbles { .. } => return Err(Box::new(Error::InvalidArg))
        };
        if track >= tracks {
            return Err(Box::new(Error::InvalidTrack));
        }
        if sector >= sectors {
            return Err(Box::new(Error::InvalidSector));
        }
        let file_sector = match sectors {
            16 => img_order.from_physical(want_order.to_physical(sector)),
            // 13-sector images carry no skew, they store physical order
            _ => sector
        };
        Ok(track*sectors*SECTOR_SIZE + file_sector*SECTOR_SIZE)
    }

    /// Read a 256-byte sector, resolving `want_order` against `img_order`
    /// instead of the committed orders.  This is the probe's entry point.
    pub fn read_track_sector_swapped(&mut self,track: usize,sector: usize,img_order: SectorOrder,want_order: SectorOrder) -> Result<Vec<u8>,DYNERR> {
        if self.has_nibbles() {
            let spt = self.sectors_per_track();
            let psec = match spt {
                16 => want_order.to_physical(sector),
                _ => sector
            };
            return self.read_nibble_sector(track,psec);
        }
        let offset = self.sector_offset(track,sector,img_order,want_order)?;
        self.read_bytes(offset,SECTOR_SIZE)
    }
    /// Read a 256-byte sector under the committed file system order.
    pub fn read_track_sector(&mut self,track: usize,sector: usize) -> Result<Vec<u8>,DYNERR> {
        let (img_order,fs_order) = (self.order,self.fs_order);
        self.read_track_sector_swapped(track,sector,img_order,fs_order)
    }
    pub fn write_track_sector_swapped(&mut self,track: usize,sector: usize,dat: &[u8],img_order: SectorOrder,want_order: SectorOrder) -> Result<(),DYNERR> {
        if dat.len() > SECTOR_SIZE {
            return Err(Box::new(Error::InvalidArg));
        }
        if self.has_nibbles() {
            let spt = self.sectors_per_track();
            let psec = match spt {
                16 => want_order.to_physical(sector),
                _ => sector
            };
            let mut padded = dat.to_vec();
            padded.resize(SECTOR_SIZE,0);
            return self.write_nibble_sector(track,psec,&padded);
        }
        let offset = self.sector_offset(track,sector,img_order,want_order)?;
        let mut padded = dat.to_vec();
        padded.resize(SECTOR_SIZE,0);
        self.write_bytes(offset,&padded)
    }
    pub fn write_track_sector(&mut self,track: usize,sector: usize,dat: &[u8]) -> Result<(),DYNERR> {
        let (img_order,fs_order) = (self.order,self.fs_order);
        self.write_track_sector_swapped(track,sector,dat,img_order,fs_order)
    }

    /// Read a 512-byte block, resolving the image order candidate explicitly.
    /// `want_order` is the skew the file system assembles its blocks with:
    /// ProDOS for most, CP/M for CP/M volumes.  Block devices ignore both.
    pub fn read_block_swapped(&mut self,block: usize,img_order: SectorOrder,want_order: SectorOrder) -> Result<Vec<u8>,DYNERR> {
        match self.physical {
            PhysicalFormat::Blocks { blocks } => {
                if block >= blocks {
                    return Err(Box::new(Error::InvalidBlock));
                }
                self.read_bytes(block*BLOCK_SIZE,BLOCK_SIZE)
            },
            _ => {
                if self.sectors_per_track() != 16 {
                    return Err(Box::new(Error::InvalidBlock));
                }
                let track = block/8;
                let half = block%8;
                let mut ans = Vec::with_capacity(BLOCK_SIZE);
                for i in 0..2 {
                    let psec = want_order.to_physical(half*2+i);
                    ans.append(&mut self.read_track_sector_swapped(track,psec,img_order,SectorOrder::Physical)?);
                }
                Ok(ans)
            }
        }
    }
    pub fn read_block(&mut self,block: usize) -> Result<Vec<u8>,DYNERR> {
        let img_order = self.order;
        let want_order = match self.fs_order {
            SectorOrder::Cpm => SectorOrder::Cpm,
            _ => SectorOrder::ProDos
        };
        self.read_block_swapped(block,img_order,want_order)
    }
    pub fn write_block_swapped(&mut self,block: usize,dat: &[u8],img_order: SectorOrder,want_order: SectorOrder) -> Result<(),DYNERR> {
        if dat.len() != BLOCK_SIZE {
            return Err(Box::new(Error::InvalidArg));
        }
        match self.physical {
            PhysicalFormat::Blocks { blocks } => {
                if block >= blocks {
                    return Err(Box::new(Error::InvalidBlock));
                }
                self.write_bytes(block*BLOCK_SIZE,dat)
            },
            _ => {
                if self.sectors_per_track() != 16 {
                    return Err(Box::new(Error::InvalidBlock));
                }
                let track = block/8;
                let half = block%8;
                for i in 0..2 {
                    let psec = want_order.to_physical(half*2+i);
                    self.write_track_sector_swapped(track,psec,&dat[i*SECTOR_SIZE..(i+1)*SECTOR_SIZE],img_order,SectorOrder::Physical)?;
                }
                Ok(())
            }
        }
    }
    pub fn write_block(&mut self,block: usize,dat: &[u8]) -> Result<(),DYNERR> {
        let img_order = self.order;
        let want_order = match self.fs_order {
            SectorOrder::Cpm => SectorOrder::Cpm,
            _ => SectorOrder::ProDos
        };
        self.write_block_swapped(block,dat,img_order,want_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_round_trip() {
        for order in [SectorOrder::Dos,SectorOrder::ProDos,SectorOrder::Cpm,SectorOrder::Physical] {
            for s in 0..16 {
                assert_eq!(order.from_physical(order.to_physical(s)),s);
                assert_eq!(order.to_physical(order.from_physical(s)),s);
            }
        }
    }

    #[test]
    fn sector_read_matches_linear_position() {
        // readTS(t,s,O) must equal readLinear(t*spt + s) on an image whose
        // storage order is the same O
        let mut img = DiskImg::create_sectors(35,16);
        for t in 0..35 {
            for s in 0..16 {
                let linear = t*16 + s;
                img.write_bytes(linear*SECTOR_SIZE,&[(linear%251) as u8]).expect("write failed");
            }
        }
        for order in [SectorOrder::Dos,SectorOrder::ProDos,SectorOrder::Cpm,SectorOrder::Physical] {
            for t in 0..35 {
                for s in 0..16 {
                    let sec = img.read_track_sector_swapped(t,s,order,order).expect("read failed");
                    let linear = t*16 + s;
                    assert_eq!(sec[0],(linear%251) as u8);
                }
            }
        }
    }

    #[test]
    fn dos_to_prodos_swap() {
        // DOS logical sector 1 of a DOS-ordered image lives at physical 13,
        // which ProDOS addressing reaches as logical sector 11
        let mut img = DiskImg::create_sectors(35,16);
        img.write_track_sector_swapped(0,1,&[0xabu8;256],SectorOrder::Dos,SectorOrder::Dos).expect("write failed");
        let back = img.read_track_sector_swapped(0,11,SectorOrder::Dos,SectorOrder::ProDos).expect("read failed");
        assert_eq!(back[0],0xab);
    }

    #[test]
    fn block_maps_to_dos_sectors_0_and_14() {
        let mut img = DiskImg::create_sectors(35,16);
        let mut blk = vec![0u8;BLOCK_SIZE];
        blk[0] = 0x11;
        blk[256] = 0x22;
        img.write_block_swapped(0,&blk,SectorOrder::Dos,SectorOrder::ProDos).expect("write failed");
        let s0 = img.read_track_sector_swapped(0,0,SectorOrder::Dos,SectorOrder::Dos).expect("read failed");
        let s14 = img.read_track_sector_swapped(0,14,SectorOrder::Dos,SectorOrder::Dos).expect("read failed");
        assert_eq!(s0[0],0x11);
        assert_eq!(s14[0],0x22);
    }

    #[test]
    fn sub_image_shares_bytes() {
        let mut parent = DiskImg::create_blocks(100);
        parent.write_block(10,&[0x5au8;BLOCK_SIZE]).expect("write failed");
        let mut child = parent.sub_image(10,20).expect("sub failed");
        assert_eq!(child.read_block(0).expect("read failed"),vec![0x5au8;BLOCK_SIZE]);
        child.write_block(1,&[0xa5u8;BLOCK_SIZE]).expect("write failed");
        assert_eq!(parent.read_block(11).expect("read failed"),vec![0xa5u8;BLOCK_SIZE]);
    }

    #[test]
    fn nesting_limit() {
        let parent = DiskImg::create_blocks(100);
        let c1 = parent.sub_image(0,50).expect("sub failed");
        let c2 = c1.sub_image(0,25).expect("sub failed");
        let c3 = c2.sub_image(0,12).expect("sub failed");
        assert!(c3.sub_image(0,6).is_err());
    }
}
