//! ### ZIP wrapper
//!
//! Only archives with exactly one member are treated as wrapped disk images.
//! The end-of-central-directory record is found by scanning the trailing 64K
//! backwards (archives written to a pipe have no sizes anywhere else, and
//! people append junk).  The central directory entry is authoritative for
//! sizes and the data offset; the local file header is read only to skip it,
//! because its size fields are legitimately zero in streamed archives.
//!
//! The wire records are declared with `binrw`.

use std::io::{Cursor,Read,Write,Seek,SeekFrom};
use binrw::{BinRead,BinWrite,BinReaderExt,BinWriterExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use chrono::{Datelike,Timelike};
use log::{debug,info};
use crate::DYNERR;
use super::{Error,MAX_UNWRAPPED_SIZE};

const EOCD_SIGNATURE: u32 = 0x06054b50;
const EOCD_LEN: usize = 22;
const MAX_EOCD_SEARCH: usize = 65536 + EOCD_LEN;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const DEFAULT_VERSION: u16 = 20;
const MIN_MEMBER_SIZE: u32 = 512;

#[derive(BinRead,BinWrite)]
#[brw(little,magic = 0x04034b50u32)]
struct LocalFileHeader {
    version_to_extract: u16,
    gp_bit_flag: u16,
    compression_method: u16,
    last_mod_file_time: u16,
    last_mod_file_date: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    file_name_length: u16,
    extra_field_length: u16,
    #[br(count = file_name_length)]
    file_name: Vec<u8>,
    #[br(count = extra_field_length)]
    extra_field: Vec<u8>
}

#[derive(BinRead,BinWrite)]
#[brw(little,magic = 0x02014b50u32)]
struct CentralDirEntry {
    version_made_by: u16,
    version_to_extract: u16,
    gp_bit_flag: u16,
    compression_method: u16,
    last_mod_file_time: u16,
    last_mod_file_date: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    file_name_length: u16,
    extra_field_length: u16,
    file_comment_length: u16,
    disk_number_start: u16,
    internal_attrs: u16,
    external_attrs: u32,
    local_header_rel_offset: u32,
    #[br(count = file_name_length)]
    file_name: Vec<u8>,
    #[br(count = extra_field_length)]
    extra_field: Vec<u8>,
    #[br(count = file_comment_length)]
    file_comment: Vec<u8>
}

#[derive(BinRead,BinWrite)]
#[brw(little,magic = 0x06054b50u32)]
struct EndOfCentralDir {
    disk_number: u16,
    disk_with_central_dir: u16,
    num_entries: u16,
    total_num_entries: u16,
    central_dir_size: u32,
    central_dir_offset: u32,
    comment_length: u16,
    #[br(count = comment_length)]
    comment: Vec<u8>
}

/// Scan the tail of the archive for the EOCD, then read the single
/// central directory entry it points at.
fn read_central_dir(raw: &[u8]) -> Result<CentralDirEntry,DYNERR> {
    if raw.len() < EOCD_LEN + 4 {
        return Err(Box::new(Error::Mismatch));
    }
    let search_start = raw.len().saturating_sub(MAX_EOCD_SEARCH);
    let tail = &raw[search_start..];
    let mut eocd_pos: Option<usize> = None;
    for i in (0..=tail.len()-4).rev() {
        if tail[i] == 0x50 && u32::from_le_bytes([tail[i],tail[i+1],tail[i+2],tail[i+3]]) == EOCD_SIGNATURE {
            eocd_pos = Some(search_start + i);
            break;
        }
    }
    let eocd_pos = match eocd_pos {
        Some(pos) => pos,
        None => {
            debug!("EOCD not found, not ZIP");
            return Err(Box::new(Error::Mismatch));
        }
    };
    let mut curs = Cursor::new(raw);
    curs.set_position(eocd_pos as u64);
    let eocd: EndOfCentralDir = match curs.read_le() {
        Ok(rec) => rec,
        Err(_) => return Err(Box::new(Error::Mismatch))
    };
    if eocd.disk_number != 0 || eocd.disk_with_central_dir != 0 ||
        eocd.num_entries != 1 || eocd.total_num_entries != 1 {
        debug!("probable ZIP archive has more than one member");
        return Err(Box::new(Error::FileArchive));
    }
    curs.set_position(eocd.central_dir_offset as u64);
    let cde: CentralDirEntry = match curs.read_le() {
        Ok(rec) => rec,
        Err(_) => return Err(Box::new(Error::Mismatch))
    };
    // the lone CDE must run right up against the EOCD
    let mut check = [0u8;4];
    curs.read_exact(&mut check)?;
    if u32::from_le_bytes(check) != EOCD_SIGNATURE {
        debug!("CDE read check failed");
        return Err(Box::new(Error::Mismatch));
    }
    Ok(cde)
}

/// Probe for a single-member ZIP carrying a plausible disk image.
pub fn test(raw: &[u8]) -> Result<(),DYNERR> {
    let cde = read_central_dir(raw)?;
    if cde.compression_method != METHOD_STORED && cde.compression_method != METHOD_DEFLATED {
        debug!("ZIP compression method {} not supported",cde.compression_method);
        return Err(Box::new(Error::Mismatch));
    }
    if cde.uncompressed_size < MIN_MEMBER_SIZE || cde.uncompressed_size as usize > MAX_UNWRAPPED_SIZE {
        debug!("ZIP uncompressed size {} is outside range",cde.uncompressed_size);
        return Err(Box::new(Error::Mismatch));
    }
    Ok(())
}

/// Extract the single member.  Returns `(image,stored_name)`.
pub fn load(raw: &[u8]) -> Result<(Vec<u8>,String),DYNERR> {
    let cde = read_central_dir(raw)?;
    if cde.uncompressed_size as usize > MAX_UNWRAPPED_SIZE {
        return Err(Box::new(Error::TooBig));
    }
    let stored_name = String::from_utf8_lossy(&cde.file_name).to_string();
    // seek to the local header and skip over it to find the data; the
    // LFH sizes may be zero so only the CDE values are used
    let mut curs = Cursor::new(raw);
    curs.set_position(cde.local_header_rel_offset as u64);
    let _lfh: LocalFileHeader = match curs.read_le() {
        Ok(rec) => rec,
        Err(_) => return Err(Box::new(Error::BadCompressedData))
    };
    let data_start = curs.position() as usize;
    let data_end = data_start + cde.compressed_size as usize;
    if data_end > raw.len() {
        return Err(Box::new(Error::BadCompressedData));
    }
    let member = &raw[data_start..data_end];
    let buf: Vec<u8> = match cde.compression_method {
        METHOD_STORED => member.to_vec(),
        METHOD_DEFLATED => {
            let mut decoder = DeflateDecoder::new(member);
            let mut ans = Vec::with_capacity(cde.uncompressed_size as usize);
            if decoder.read_to_end(&mut ans).is_err() {
                return Err(Box::new(Error::BadCompressedData));
            }
            if ans.len() != cde.uncompressed_size as usize {
                debug!("size mismatch on inflated file ({} vs {})",ans.len(),cde.uncompressed_size);
                return Err(Box::new(Error::BadCompressedData));
            }
            ans
        },
        _ => return Err(Box::new(Error::Mismatch))
    };
    let mut hasher = flate2::Crc::new();
    hasher.update(&buf);
    if hasher.sum() != cde.crc32 {
        debug!("ZIP CRC mismatch: inflated crc32={:08x}, stored={:08x}",hasher.sum(),cde.crc32);
        return Err(Box::new(Error::BadChecksum));
    }
    info!("ZIP member '{}' extracted, {} bytes",stored_name,buf.len());
    Ok((buf,stored_name))
}

fn msdos_datetime() -> (u16,u16) {
    let now = chrono::Local::now().naive_local();
    let year = match now.year() {
        y if y < 1980 => 1980,
        y => y
    } as u16;
    let date = (now.day() as u16) | ((now.month() as u16) << 5) | ((year-1980) << 9);
    let time = ((now.second()/2) as u16) | ((now.minute() as u16) << 5) | ((now.hour() as u16) << 11);
    (date,time)
}

/// Pack an image into a one-member archive.  The local header is rewritten
/// after the data, once the compressed size and CRC are known.
pub fn save(img: &[u8],stored_name: Option<&str>) -> Result<Vec<u8>,DYNERR> {
    // don't store an empty name, some unzip tools get confused
    let name: Vec<u8> = match stored_name {
        Some(s) if s.len() > 0 => s.as_bytes().to_vec(),
        _ => b"disk".to_vec()
    };
    let (mod_date,mod_time) = msdos_datetime();
    let mut lfh = LocalFileHeader {
        version_to_extract: DEFAULT_VERSION,
        gp_bit_flag: 0x0002,    // maximum compression
        compression_method: METHOD_DEFLATED,
        last_mod_file_time: mod_time,
        last_mod_file_date: mod_date,
        crc32: 0,
        compressed_size: 0,
        uncompressed_size: 0,
        file_name_length: name.len() as u16,
        extra_field_length: 0,
        file_name: name.clone(),
        extra_field: Vec::new()
    };
    let mut curs = Cursor::new(Vec::new());
    curs.write_le(&lfh)?;
    let data_start = curs.position();
    {
        let mut encoder = DeflateEncoder::new(&mut curs,Compression::best());
        encoder.write_all(img)?;
        encoder.finish()?;
    }
    let data_end = curs.position();
    let mut hasher = flate2::Crc::new();
    hasher.update(img);
    lfh.crc32 = hasher.sum();
    lfh.compressed_size = (data_end - data_start) as u32;
    lfh.uncompressed_size = img.len() as u32;
    curs.seek(SeekFrom::Start(0))?;
    curs.write_le(&lfh)?;
    curs.seek(SeekFrom::Start(data_end))?;
    let cde_start = curs.position();
    let cde = CentralDirEntry {
        version_made_by: DEFAULT_VERSION,
        version_to_extract: lfh.version_to_extract,
        gp_bit_flag: lfh.gp_bit_flag,
        compression_method: lfh.compression_method,
        last_mod_file_time: lfh.last_mod_file_time,
        last_mod_file_date: lfh.last_mod_file_date,
        crc32: lfh.crc32,
        compressed_size: lfh.compressed_size,
        uncompressed_size: lfh.uncompressed_size,
        file_name_length: name.len() as u16,
        extra_field_length: 0,
        file_comment_length: 0,
        disk_number_start: 0,
        internal_attrs: 0,
        external_attrs: 0x81b60020,     // matches what WinZip writes
        local_header_rel_offset: 0,
        file_name: name,
        extra_field: Vec::new(),
        file_comment: Vec::new()
    };
    curs.write_le(&cde)?;
    let cde_end = curs.position();
    let eocd = EndOfCentralDir {
        disk_number: 0,
        disk_with_central_dir: 0,
        num_entries: 1,
        total_num_entries: 1,
        central_dir_size: (cde_end - cde_start) as u32,
        central_dir_offset: cde_start as u32,
        comment_length: 0,
        comment: Vec::new()
    };
    curs.write_le(&eocd)?;
    Ok(curs.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> Vec<u8> {
        (0..4096).map(|i| (i%253) as u8).collect()
    }

    #[test]
    fn round_trip() {
        let img = sample_image();
        let packed = save(&img,Some("test.do")).expect("save failed");
        test(&packed).expect("probe failed");
        let (unpacked,name) = load(&packed).expect("load failed");
        assert_eq!(unpacked,img);
        assert_eq!(name,"test.do");
    }

    #[test]
    fn crc_mismatch_rejected() {
        let img = sample_image();
        let mut packed = save(&img,None).expect("save failed");
        // the CDE copy of the CRC is the one that gets verified
        for pos in 0..packed.len()-3 {
            let sig = u32::from_le_bytes([packed[pos],packed[pos+1],packed[pos+2],packed[pos+3]]);
            if sig == 0x02014b50 {
                packed[pos+16] ^= 0xff;
            }
        }
        match load(&packed) {
            Err(e) => assert!(e.to_string().contains("checksum")),
            Ok(_) => panic!("corrupted archive was accepted")
        }
    }

    #[test]
    fn multi_member_rejected() {
        let img = sample_image();
        let mut packed = save(&img,None).expect("save failed");
        // bump the entry counts in the EOCD
        let n = packed.len();
        packed[n-14] = 2;   // num_entries
        packed[n-12] = 2;   // total_num_entries
        match load(&packed) {
            Err(e) => assert!(e.to_string().contains("more than one member")),
            Ok(_) => panic!("multi-member archive was accepted")
        }
    }

    #[test]
    fn tiny_member_fails_probe() {
        let packed = save(&[0u8;16],None).expect("save failed");
        assert!(test(&packed).is_err());
        // but an explicit load still works, the size floor is a probe heuristic
        assert!(load(&packed).is_ok());
    }
}
