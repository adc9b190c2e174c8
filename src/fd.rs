//! # Generic file descriptor module
//!
//! Everything above this layer reads and writes through `GenericFD`, a uniform
//! random-access byte stream.  Two implementations are provided: `BufferFD`
//! wraps an in-memory buffer, `FileFD` wraps a host file.  Wrappers and disk
//! images do not care which one they are given.

use std::io::{Read,Write,Seek,SeekFrom};
use crate::DYNERR;

/// Enumerates stream errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("I/O error")]
    Io,
    #[error("end of stream")]
    Eof,
    #[error("stream is read only")]
    ReadOnly,
    #[error("invalid argument")]
    InvalidArg
}

/// Seek origin, mirrors `std::io::SeekFrom` but keeps the signed/unsigned
/// bookkeeping in one place.
#[derive(Clone,Copy,PartialEq,Eq)]
pub enum Whence {
    Set,
    Cur,
    End
}

/// Uniform random-access byte stream over a file or buffer.
/// Reads are direct, there is no buffering contract.
pub trait GenericFD {
    /// Read up to `buf.len()` bytes, returning the actual count.
    /// Returns `Error::Eof` only when no bytes at all are available.
    fn read(&mut self,buf: &mut [u8]) -> Result<usize,DYNERR>;
    /// Write all of `buf` at the current mark, extending the stream if needed.
    fn write(&mut self,buf: &[u8]) -> Result<usize,DYNERR>;
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR>;
    fn tell(&self) -> u64;
    fn length(&self) -> u64;
    fn truncate(&mut self) -> Result<(),DYNERR>;
    fn rewind(&mut self) -> Result<(),DYNERR> {
        self.seek(0,Whence::Set)?;
        Ok(())
    }
    fn is_read_only(&self) -> bool;
    /// Read exactly `buf.len()` bytes or fail with `Error::Eof`.
    fn read_exact(&mut self,buf: &mut [u8]) -> Result<(),DYNERR> {
        let mut mark = 0;
        while mark < buf.len() {
            match self.read(&mut buf[mark..])? {
                0 => return Err(Box::new(Error::Eof)),
                n => mark += n
            }
        }
        Ok(())
    }
}

fn resolve_seek(curr: u64,end: u64,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
    let base = match whence {
        Whence::Set => 0,
        Whence::Cur => curr as i64,
        Whence::End => end as i64
    };
    match base.checked_add(offset) {
        Some(pos) if pos >= 0 => Ok(pos as u64),
        _ => Err(Box::new(Error::InvalidArg))
    }
}

/// In-memory stream.  When writable the buffer grows on writes past the end.
pub struct BufferFD {
    buf: Vec<u8>,
    mark: usize,
    read_only: bool
}

impl BufferFD {
    pub fn new(buf: Vec<u8>,read_only: bool) -> Self {
        Self {
            buf,
            mark: 0,
            read_only
        }
    }
    pub fn writable() -> Self {
        Self::new(Vec::new(),false)
    }
    /// Give up the buffer, consuming the stream.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
    pub fn buffer(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl GenericFD for BufferFD {
    fn read(&mut self,buf: &mut [u8]) -> Result<usize,DYNERR> {
        if self.mark >= self.buf.len() {
            return Err(Box::new(Error::Eof));
        }
        let actual = usize::min(buf.len(),self.buf.len()-self.mark);
        buf[0..actual].copy_from_slice(&self.buf[self.mark..self.mark+actual]);
        self.mark += actual;
        Ok(actual)
    }
    fn write(&mut self,buf: &[u8]) -> Result<usize,DYNERR> {
        if self.read_only {
            return Err(Box::new(Error::ReadOnly));
        }
        if self.mark + buf.len() > self.buf.len() {
            self.buf.resize(self.mark + buf.len(),0);
        }
        self.buf[self.mark..self.mark+buf.len()].copy_from_slice(buf);
        self.mark += buf.len();
        Ok(buf.len())
    }
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
        let pos = resolve_seek(self.mark as u64,self.buf.len() as u64,offset,whence)?;
        self.mark = pos as usize;
        Ok(pos)
    }
    fn tell(&self) -> u64 {
        self.mark as u64
    }
    fn length(&self) -> u64 {
        self.buf.len() as u64
    }
    fn truncate(&mut self) -> Result<(),DYNERR> {
        if self.read_only {
            return Err(Box::new(Error::ReadOnly));
        }
        self.buf.truncate(self.mark);
        Ok(())
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Host file stream.
pub struct FileFD {
    file: std::fs::File,
    read_only: bool
}

impl FileFD {
    pub fn open_read(path: &str) -> Result<Self,DYNERR> {
        let file = std::fs::File::open(path)?;
        Ok(Self { file, read_only: true })
    }
    pub fn open_rw(path: &str) -> Result<Self,DYNERR> {
        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(path)?;
        Ok(Self { file, read_only: false })
    }
}

impl GenericFD for FileFD {
    fn read(&mut self,buf: &mut [u8]) -> Result<usize,DYNERR> {
        match self.file.read(buf) {
            Ok(0) if buf.len()>0 => Err(Box::new(Error::Eof)),
            Ok(n) => Ok(n),
            Err(_) => Err(Box::new(Error::Io))
        }
    }
    fn write(&mut self,buf: &[u8]) -> Result<usize,DYNERR> {
        if self.read_only {
            return Err(Box::new(Error::ReadOnly));
        }
        match self.file.write_all(buf) {
            Ok(()) => Ok(buf.len()),
            Err(_) => Err(Box::new(Error::Io))
        }
    }
    fn seek(&mut self,offset: i64,whence: Whence) -> Result<u64,DYNERR> {
        let target = match whence {
            Whence::Set if offset >= 0 => SeekFrom::Start(offset as u64),
            Whence::Set => return Err(Box::new(Error::InvalidArg)),
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset)
        };
        match self.file.seek(target) {
            Ok(pos) => Ok(pos),
            Err(_) => Err(Box::new(Error::Io))
        }
    }
    fn tell(&self) -> u64 {
        // stream_position on a clone-free handle; failure here means the
        // descriptor is already unusable
        let mut f = &self.file;
        f.seek(SeekFrom::Current(0)).unwrap_or(0)
    }
    fn length(&self) -> u64 {
        match self.file.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => 0
        }
    }
    fn truncate(&mut self) -> Result<(),DYNERR> {
        if self.read_only {
            return Err(Box::new(Error::ReadOnly));
        }
        let pos = self.tell();
        match self.file.set_len(pos) {
            Ok(()) => Ok(()),
            Err(_) => Err(Box::new(Error::Io))
        }
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Copy `len` bytes from `src` to `dst` at their current marks.
/// If `crc` is given it accumulates a zlib-compatible CRC-32 of the copied bytes.
pub fn copy_fd(dst: &mut dyn GenericFD,src: &mut dyn GenericFD,len: u64,crc: Option<&mut u32>) -> Result<(),DYNERR> {
    let mut hasher = flate2::Crc::new();
    let mut remaining = len;
    let mut buf = [0u8;16384];
    while remaining > 0 {
        let want = u64::min(remaining,buf.len() as u64) as usize;
        src.read_exact(&mut buf[0..want])?;
        dst.write(&buf[0..want])?;
        hasher.update(&buf[0..want]);
        remaining -= want as u64;
    }
    if let Some(out) = crc {
        *out = hasher.sum();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_seek_and_grow() {
        let mut fd = BufferFD::writable();
        fd.write(&[1,2,3,4]).expect("write failed");
        fd.seek(-2,Whence::End).expect("seek failed");
        assert_eq!(fd.tell(),2);
        fd.write(&[9,9,9]).expect("write failed");
        assert_eq!(fd.into_buffer(),vec![1,2,9,9,9]);
    }

    #[test]
    fn read_only_refused() {
        let mut fd = BufferFD::new(vec![0;4],true);
        assert!(fd.write(&[1]).is_err());
        assert!(fd.truncate().is_err());
    }

    #[test]
    fn copy_crc_matches_zlib() {
        // CRC-32 of "123456789" is the classic check value
        let mut src = BufferFD::new(b"123456789".to_vec(),true);
        let mut dst = BufferFD::writable();
        let mut crc = 0u32;
        copy_fd(&mut dst,&mut src,9,Some(&mut crc)).expect("copy failed");
        assert_eq!(crc,0xcbf43926);
        assert_eq!(dst.into_buffer(),b"123456789".to_vec());
    }
}
