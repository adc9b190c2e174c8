//! # File System Module
//!
//! There is a sub-module for each supported file system.  All of them share
//! the probe/initialize/iterate shape: a `test` routine that scores the
//! image under each candidate sector order, a `mount` routine that parses
//! the catalog and builds the usage map, and a file list of `FileInfo`.
//!
//! File systems are represented by the `DiskFS` trait.  The trait object
//! owns the `DiskImg` it was mounted on and, for partitioned containers,
//! owns child `DiskFS` objects discovered inside it.
//!
//! Opening a file yields a `Handle`, which resolves the file's storage into
//! a flat chunk list up front.  Reads and seeks go through the handle; only
//! one handle may exist per file at a time, enforced by a slot table on the
//! owning file system.

pub mod usage;
pub mod dos33;
pub mod pascal;
pub mod cpm;
pub mod rdos;
pub mod gutenberg;
pub mod fat;
pub mod macpart;
pub mod focus;

use log::{info,debug};
use crate::img::{self,DiskImg,FsFormat,Leniency,SectorOrder};
use crate::fd::Whence;
use crate::{DYNERR,STDRESULT};
use usage::VolumeUsage;

/// Enumerates file system errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("file system not found")]
    FileSystemNotFound,
    #[error("bad disk image")]
    BadDiskImage,
    #[error("directory structure forms a loop")]
    DirectoryLoop,
    #[error("file not found")]
    FileNotFound,
    #[error("fork not found")]
    ForkNotFound,
    #[error("file is already open")]
    AlreadyOpen,
    #[error("handle is stale")]
    FileNotOpen,
    #[error("access denied")]
    AccessDenied,
    #[error("volume is read only")]
    ReadOnly,
    #[error("disk full")]
    DiskFull,
    #[error("volume directory full")]
    VolumeDirFull,
    #[error("file already exists")]
    FileExists,
    #[error("file is locked")]
    FileLocked,
    #[error("invalid file name")]
    InvalidName,
    #[error("invalid argument")]
    InvalidArg,
    #[error("not enough data")]
    DataUnderrun,
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation not supported by this file system")]
    NotSupported
}

/// How much confidence the catalog scan left us with.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Quality {
    Good,
    Suspicious,
    Damaged
}

/// Per-variant payload of a catalog entry, carrying what the shared header
/// cannot.
#[derive(Clone)]
pub enum FilePayload {
    Dos {
        tslist: [u8;2],
        cat_ts: [u8;2],
        cat_slot: usize,
        /// bytes of embedded header before the data (4 for B, 2 for A/I)
        data_offset: usize
    },
    Pascal {
        start_block: u16,
        next_block: u16,
        bytes_rem: u16,
        dir_index: usize
    },
    Cpm {
        /// indices of this file's extents in the raw directory
        extents: Vec<usize>
    },
    Rdos {
        start_sector: u16,
        num_sectors: u16,
        load_addr: u16
    },
    Gutenberg {
        start: [u8;2]
    },
    /// placeholder entries (FAT volumes, unknown partitions)
    Opaque
}

/// Catalog entry: shared attributes plus a variant payload.
#[derive(Clone)]
pub struct FileInfo {
    pub name: String,
    /// native type byte, meaning varies by file system
    pub fs_type: u8,
    /// ProDOS mapping of the type
    pub prodos_type: u8,
    pub aux: u16,
    pub length: usize,
    /// length minus sparse holes
    pub sparse_length: usize,
    pub sectors: usize,
    pub locked: bool,
    pub quality: Quality,
    pub mod_date: Option<chrono::NaiveDateTime>,
    pub payload: FilePayload
}

impl FileInfo {
    pub fn new(name: String,payload: FilePayload) -> Self {
        Self {
            name,
            fs_type: 0,
            prodos_type: 0,
            aux: 0,
            length: 0,
            sparse_length: 0,
            sectors: 0,
            locked: false,
            quality: Quality::Good,
            mod_date: None,
            payload
        }
    }
}

/// Which mutations a mounted file system supports.
#[derive(Clone,Copy,Default)]
pub struct Capabilities {
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub rename: bool,
    pub set_info: bool,
    pub rename_volume: bool
}

/// One resolved allocation unit of an open file.
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum Chunk {
    Sector(u8,u8),
    Block(u32),
    /// a hole in a DOS random-access text file
    Sparse
}

/// Slot table tracking which files are open.  Handles carry a generation
/// counter so a stale handle cannot touch a recycled slot.
pub struct OpenFiles {
    slots: Vec<Option<String>>,
    gen: u64
}

impl OpenFiles {
    pub fn new() -> Self {
        Self { slots: Vec::new(), gen: 0 }
    }
    pub fn open(&mut self,name: &str) -> Result<(usize,u64),DYNERR> {
        if self.slots.iter().any(|s| s.as_deref() == Some(name)) {
            return Err(Box::new(Error::AlreadyOpen));
        }
        self.gen += 1;
        for (slot,entry) in self.slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(name.to_string());
                return Ok((slot,self.gen));
            }
        }
        self.slots.push(Some(name.to_string()));
        Ok((self.slots.len()-1,self.gen))
    }
    pub fn close(&mut self,slot: usize) -> STDRESULT {
        match self.slots.get_mut(slot) {
            Some(entry) if entry.is_some() => {
                *entry = None;
                Ok(())
            },
            _ => Err(Box::new(Error::FileNotOpen))
        }
    }
    pub fn is_open(&self,name: &str) -> bool {
        self.slots.iter().any(|s| s.as_deref() == Some(name))
    }
}

/// Open handle over a file: the resolved storage list plus a seek mark.
/// The chunk list length equals the file's storage footprint; holes in DOS
/// random-access text files appear as `Chunk::Sparse`.
pub struct Handle {
    pub(crate) slot: usize,
    pub name: String,
    /// logical end of file
    pub eof: usize,
    /// current mark, `0..=eof`
    pub mark: usize,
    /// bytes of header to skip at the start of the first chunk
    pub data_offset: usize,
    /// allocation unit as read from the image
    pub chunk_len: usize,
    /// bytes of per-chunk header to skip (Gutenberg sector links)
    pub skip_per_chunk: usize,
    pub chunks: Vec<Chunk>,
    pub writable: bool
}

impl Handle {
    pub fn new(slot: usize,name: String,chunk_len: usize) -> Self {
        Self {
            slot,
            name,
            eof: 0,
            mark: 0,
            data_offset: 0,
            chunk_len,
            skip_per_chunk: 0,
            chunks: Vec::new(),
            writable: false
        }
    }
    /// Seek, clamped to `[0,eof]`.
    pub fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => self.mark as i64,
            Whence::End => self.eof as i64
        };
        let target = match base.checked_add(offset) {
            Some(t) => t,
            None => return Err(Box::new(Error::InvalidArg))
        };
        let clamped = target.clamp(0,self.eof as i64) as usize;
        self.mark = clamped;
        Ok(clamped as u64)
    }
    pub fn tell(&self) -> u64 {
        self.mark as u64
    }
}

/// Read through a handle's chunk list.  Returns the actual count, which is
/// short (possibly zero) at end of file.  Sparse chunks read as zeroes.
pub fn read_handle(img: &mut DiskImg,h: &mut Handle,buf: &mut [u8]) -> Result<usize,DYNERR> {
    let payload = h.chunk_len - h.skip_per_chunk;
    let want = usize::min(buf.len(),h.eof.saturating_sub(h.mark));
    let mut done = 0;
    while done < want {
        let byte_index = h.mark + h.data_offset;
        let chunk_index = byte_index/payload;
        let chunk_offset = byte_index%payload;
        let this_len = usize::min(want-done,payload-chunk_offset);
        if chunk_index >= h.chunks.len() {
            return Err(Box::new(Error::DataUnderrun));
        }
        match h.chunks[chunk_index] {
            Chunk::Sparse => {
                for i in 0..this_len {
                    buf[done+i] = 0;
                }
            },
            Chunk::Sector(t,s) => {
                let sec = img.read_track_sector(t as usize,s as usize)?;
                buf[done..done+this_len].copy_from_slice(&sec[h.skip_per_chunk+chunk_offset..h.skip_per_chunk+chunk_offset+this_len]);
            },
            Chunk::Block(b) => {
                let blk = img.read_block(b as usize)?;
                buf[done..done+this_len].copy_from_slice(&blk[h.skip_per_chunk+chunk_offset..h.skip_per_chunk+chunk_offset+this_len]);
            }
        }
        done += this_len;
        h.mark += this_len;
    }
    Ok(done)
}

/// Like `read_handle` but the whole request must be satisfied.
pub fn read_handle_exact(img: &mut DiskImg,h: &mut Handle,buf: &mut [u8]) -> STDRESULT {
    match read_handle(img,h,buf)? {
        n if n == buf.len() => Ok(()),
        _ => Err(Box::new(Error::DataUnderrun))
    }
}

/// Progress callback polled between chunk writes; return `false` to abort
/// the operation with `Error::Cancelled`.
pub type ProgressFn<'a> = dyn FnMut(u64) -> bool + 'a;

/// Controls whether mounting descends into partitions.
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum SubVolumeScan {
    Disabled,
    ContainerOnly,
    Enabled
}

/// How much of the catalog to load.
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum InitMode {
    Full,
    HeaderOnly
}

/// A partition exposed by a container file system.  `fs` is `None` when the
/// child could not be identified, so the partition stays visible.
pub struct SubVolume {
    pub name: String,
    pub kind: String,
    pub start_block: usize,
    pub num_blocks: usize,
    pub fs: Option<Box<dyn DiskFS>>
}

/// Abstract file system interface.  Owns an underlying `DiskImg`.
/// The five mutation operations default to unsupported; writable variants
/// override them and say so in `capabilities`.
pub trait DiskFS {
    fn fs_format(&self) -> FsFormat;
    /// volume name or identification string
    fn volume_id(&self) -> String;
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
    /// false when the catalog scan found conflicts or damage; mutations are
    /// refused on a disk that is not good
    fn is_good(&self) -> bool;
    fn list_files(&self) -> &Vec<FileInfo>;
    fn usage(&self) -> &VolumeUsage;
    fn open(&mut self,name: &str) -> Result<Handle,DYNERR>;
    /// Close flushes any updated catalog metadata.
    fn close(&mut self,handle: Handle) -> STDRESULT;
    fn read(&mut self,handle: &mut Handle,buf: &mut [u8]) -> Result<usize,DYNERR> {
        read_handle(self.get_img(),handle,buf)
    }
    /// One-shot write: the handle must be freshly opened for writing with
    /// `mark == 0` and `eof == 0`.
    fn write(&mut self,_handle: &mut Handle,_buf: &[u8],_progress: Option<&mut ProgressFn>) -> Result<usize,DYNERR> {
        Err(Box::new(Error::NotSupported))
    }
    fn create(&mut self,_name: &str,_prodos_type: u8,_aux: u16) -> STDRESULT {
        Err(Box::new(Error::NotSupported))
    }
    fn delete(&mut self,_name: &str) -> STDRESULT {
        Err(Box::new(Error::NotSupported))
    }
    fn rename(&mut self,_old_name: &str,_new_name: &str) -> STDRESULT {
        Err(Box::new(Error::NotSupported))
    }
    fn set_info(&mut self,_name: &str,_prodos_type: Option<u8>,_aux: Option<u16>,_locked: Option<bool>) -> STDRESULT {
        Err(Box::new(Error::NotSupported))
    }
    fn rename_volume(&mut self,_new_name: &str) -> STDRESULT {
        Err(Box::new(Error::NotSupported))
    }
    fn sub_volumes(&self) -> &[SubVolume] {
        &[]
    }
    /// Mutably borrow the underlying disk image.
    fn get_img(&mut self) -> &mut DiskImg;
}

/// Walk the file list for damaged or suspicious entries.
pub fn scan_for_damaged_files(files: &Vec<FileInfo>) -> (bool,bool) {
    let mut damaged = false;
    let mut suspicious = false;
    for f in files {
        match f.quality {
            Quality::Damaged => damaged = true,
            Quality::Suspicious => suspicious = true,
            Quality::Good => {}
        }
    }
    (damaged,suspicious)
}

/// Append digits to make `name` unique, preserving a short dot-extension.
/// `exists` reports whether a candidate collides.
pub fn make_file_name_unique(name: &str,max_len: usize,exists: impl Fn(&str) -> bool) -> Result<String,DYNERR> {
    const MAX_EXTENSION_LEN: usize = 4;     // includes the dot
    if !exists(name) {
        return Ok(name.to_string());
    }
    debug!("found duplicate of '{}', making unique",name);
    let (stem,ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len()-dot <= MAX_EXTENSION_LEN => (&name[0..dot],&name[dot..]),
        _ => (name,"")
    };
    for digits in 1..1000 {
        let digit_str = digits.to_string();
        let keep = usize::min(stem.len(),max_len - ext.len() - digit_str.len());
        let candidate = format!("{}{}{}",&stem[0..keep],digit_str,ext);
        if !exists(&candidate) {
            debug!("converted to unique name: {}",candidate);
            return Ok(candidate);
        }
    }
    Err(Box::new(Error::FileExists))
}

/// Convert high ASCII to low ASCII the way DOS-family catalogs want it,
/// coping with inverse and flashing text in names.
pub fn lower_ascii(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        if *b & 0x80 > 0 {
            if *b >= 0xa0 {
                *b &= 0x7f;
            } else {
                *b = (*b & 0x7f) + 0x20;
            }
        } else {
            *b = ((*b & 0x3f) ^ 0x20) + 0x20;
        }
    }
}

/// Probe the filesystems in fixed priority order and commit the first match
/// to the image.  Structural misses are expected and only logged.
pub fn probe(img: &mut DiskImg,leniency: Leniency) -> STDRESULT {
    if let Some((order,format,vol)) = dos33::Disk::test(img,leniency) {
        info!("identified {} (order {})",format,order);
        img.set_fs(format,order,vol);
        return Ok(());
    }
    if let Some(order) = pascal::Disk::test(img) {
        info!("identified Pascal file system (order {})",order);
        img.set_fs(FsFormat::Pascal,order,None);
        return Ok(());
    }
    if let Some(order) = cpm::Disk::test(img) {
        info!("identified CP/M file system (order {})",order);
        img.set_fs(FsFormat::Cpm,order,None);
        return Ok(());
    }
    if let Some((order,format)) = rdos::Disk::test(img) {
        info!("identified {} (order {})",format,order);
        img.set_fs(format,order,None);
        return Ok(());
    }
    if let Some(order) = gutenberg::Disk::test(img,leniency) {
        info!("identified Gutenberg file system (order {})",order);
        img.set_fs(FsFormat::Gutenberg,order,None);
        return Ok(());
    }
    if fat::Disk::test(img) {
        info!("identified FAT volume");
        img.set_fs(FsFormat::Fat,SectorOrder::ProDos,None);
        return Ok(());
    }
    if macpart::Disk::test(img) {
        info!("identified Macintosh partition map");
        img.set_fs(FsFormat::MacPart,SectorOrder::ProDos,None);
        return Ok(());
    }
    if focus::Disk::test(img) {
        info!("identified FocusDrive partition map");
        img.set_fs(FsFormat::FocusDrive,SectorOrder::ProDos,None);
        return Ok(());
    }
    debug!("no file system matched");
    Err(Box::new(img::Error::FilesystemNotFound))
}

/// Bind the identified file system and initialize it.  The `DiskFS` takes
/// ownership of the image.
pub fn mount(img: DiskImg,init: InitMode,scan: SubVolumeScan) -> Result<Box<dyn DiskFS>,DYNERR> {
    match img.fs_format {
        FsFormat::Dos32 | FsFormat::Dos33 => Ok(Box::new(dos33::Disk::mount(img,init)?)),
        FsFormat::Pascal => Ok(Box::new(pascal::Disk::mount(img)?)),
        FsFormat::Cpm => Ok(Box::new(cpm::Disk::mount(img)?)),
        FsFormat::Rdos33 | FsFormat::Rdos32 | FsFormat::Rdos3 => Ok(Box::new(rdos::Disk::mount(img)?)),
        FsFormat::Gutenberg => Ok(Box::new(gutenberg::Disk::mount(img)?)),
        FsFormat::Fat => Ok(Box::new(fat::Disk::mount(img)?)),
        FsFormat::MacPart => Ok(Box::new(macpart::Disk::mount(img,scan)?)),
        FsFormat::FocusDrive => Ok(Box::new(focus::Disk::mount(img,scan)?)),
        FsFormat::Unknown => Err(Box::new(img::Error::FilesystemNotFound))
    }
}

/// Full analysis and mount of a sub-image, used by the container file
/// systems.  If the child cannot be identified the caller keeps a
/// placeholder instead.
pub fn mount_sub_image(mut img: DiskImg,scan: SubVolumeScan) -> Result<Box<dyn DiskFS>,DYNERR> {
    img.analyze_physical()?;
    probe(&mut img,Leniency::Not)?;
    mount(img,InitMode::Full,scan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names() {
        let taken = ["HELLO","HELLO1","PIC.GIF","PIC1.GIF"];
        let exists = |s: &str| taken.contains(&s);
        assert_eq!(make_file_name_unique("NEW",30,exists).unwrap(),"NEW");
        assert_eq!(make_file_name_unique("HELLO",30,exists).unwrap(),"HELLO2");
        assert_eq!(make_file_name_unique("PIC.GIF",15,exists).unwrap(),"PIC2.GIF");
    }

    #[test]
    fn unique_name_truncates_at_cap() {
        let exists = |s: &str| s == "ABCDEFG";
        assert_eq!(make_file_name_unique("ABCDEFG",7,exists).unwrap(),"ABCDEF1");
    }

    #[test]
    fn one_open_descriptor_per_file() {
        let mut open = OpenFiles::new();
        let (slot,_gen) = open.open("A").expect("open failed");
        assert!(open.open("A").is_err());
        open.close(slot).expect("close failed");
        open.open("A").expect("reopen failed");
    }

    #[test]
    fn seek_clamps() {
        let mut h = Handle::new(0,"T".to_string(),256);
        h.eof = 100;
        assert_eq!(h.seek(0,Whence::End).unwrap(),100);
        assert_eq!(h.seek(-150,Whence::Cur).unwrap(),0);
        assert_eq!(h.seek(500,Whence::Set).unwrap(),100);
    }
}
