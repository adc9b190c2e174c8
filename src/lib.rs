//! # `a2img` main library
//!
//! This library reads and writes vintage Apple II disk images, covering the
//! outer compression wrappers, the raw GCR nibble layer, and the mutually
//! incompatible file systems that lived on those disks.
//!
//! ## Architecture
//!
//! Opening an image is a strictly layered pipeline:
//! * `wrap` detects and removes an outer compression layer (gzip, a
//!   single-member ZIP, or DDD) yielding the raw image bytes
//! * `img::DiskImg` identifies the physical format, the track/sector or
//!   block geometry, and the sector-order permutation
//! * `fs` probes for a file system (DOS 3.2/3.3, Pascal, CP/M, RDOS,
//!   Gutenberg, FAT identification, and the MacPart/FocusDrive partition
//!   containers) and mounts a `fs::DiskFS` over the image
//!
//! The `DiskFS` owns the `DiskImg` and exposes the catalog as a list of
//! `fs::FileInfo`.  Opening a file yields a seekable handle; DOS 3.x and
//! Pascal volumes additionally support creating and writing files.
//! Partitioned containers recursively mount their children, which appear as
//! `fs::SubVolume` entries.
//!
//! All work happens on in-memory byte buffers; nothing is written to the
//! host until the caller saves the image back out.

pub mod fd;
pub mod wrap;
pub mod img;
pub mod fs;

use std::fmt::Write;
use log::{info,warn};
use fs::DiskFS;

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const KNOWN_FILE_EXTENSIONS: &str = "dsk,d13,do,po,nib,nb2,hdv,img,gz,zip,ddd";

/// Options controlling the open pipeline.
#[derive(Clone,Copy)]
pub struct OpenOptions {
    pub leniency: img::Leniency,
    pub scan: fs::SubVolumeScan,
    pub init: fs::InitMode,
    /// DDD has no magic; only try it when asked
    pub try_ddd: bool,
    pub read_only: bool
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            leniency: img::Leniency::Not,
            scan: fs::SubVolumeScan::ContainerOnly,
            init: fs::InitMode::Full,
            try_ddd: false,
            read_only: false
        }
    }
}

/// Given a bytestream return a disk image with the outer wrapper removed
/// and physical format and file system identified, or Err if the bytestream
/// cannot be interpreted.
pub fn create_img_from_bytestream(disk_img_data: &[u8],opts: &OpenOptions) -> Result<img::DiskImg,DYNERR> {
    let unwrapped = wrap::unwrap(disk_img_data,opts.try_ddd)?;
    let mut disk_img = img::DiskImg::from_bytes(unwrapped.data,opts.read_only);
    disk_img.wrapper = unwrapped.kind;
    disk_img.wrapper_damaged = unwrapped.damaged;
    if unwrapped.damaged {
        disk_img.set_read_only();
        disk_img.add_note(img::NoteKind::Warning,"wrapper was damaged, image is read only".to_string());
    }
    disk_img.dos_volume = unwrapped.dos_volume;
    disk_img.analyze_physical()?;
    if let Err(e) = fs::probe(&mut disk_img,opts.leniency) {
        warn!("cannot match any file system");
        return Err(e);
    }
    Ok(disk_img)
}

/// Given a bytestream return a mounted file system, or Err if the
/// bytestream cannot be interpreted.  The file system takes ownership of
/// the disk image.
pub fn create_fs_from_bytestream(disk_img_data: &[u8],opts: &OpenOptions) -> Result<Box<dyn DiskFS>,DYNERR> {
    let disk_img = create_img_from_bytestream(disk_img_data,opts)?;
    info!("identified {} file system",disk_img.fs_format);
    fs::mount(disk_img,opts.init,opts.scan)
}

/// Calls `create_fs_from_bytestream` getting the bytes from a file.
/// Unknown extensions are allowed, the content decides.
pub fn create_fs_from_file(img_path: &str,opts: &OpenOptions) -> Result<Box<dyn DiskFS>,DYNERR> {
    let disk_img_data = std::fs::read(img_path)?;
    if let Some(ext) = img_path.split('.').last() {
        if !KNOWN_FILE_EXTENSIONS.contains(&ext.to_lowercase()) {
            info!("unknown extension '{}', trying content anyway",ext);
        }
    }
    create_fs_from_bytestream(&disk_img_data,opts)
}

/// Save the image file (make changes permanent), re-applying the outer
/// wrapper it came in with.
pub fn save_img(disk: &mut Box<dyn DiskFS>,img_path: &str) -> STDRESULT {
    let img = disk.get_img();
    let raw = img.to_bytes();
    let packed = match img.wrapper {
        Some(wrap::WrapperKind::Gzip) => wrap::gzip::save(&raw)?,
        Some(wrap::WrapperKind::Zip) => wrap::zip::save(&raw,None)?,
        Some(wrap::WrapperKind::Ddd) => wrap::ddd::save(&raw,img.dos_volume.unwrap_or(254))?,
        None => raw
    };
    std::fs::write(img_path,packed)?;
    Ok(())
}

/// Display binary to stdout in columns of hex, +ascii, and -ascii
pub fn display_block(start_addr: u16,block: &[u8]) {
    let mut slice_start = 0;
    while slice_start < block.len() {
        let row_label = start_addr as usize + slice_start;
        let slice_end = usize::min(slice_start + 16,block.len());
        let slice = &block[slice_start..slice_end];
        let txt: Vec<u8> = slice.iter().map(|c| match *c {
            x if x < 32 => b'.',
            x if x < 127 => x,
            _ => b'.'
        }).collect();
        let neg_txt: Vec<u8> = slice.iter().map(|c| match *c {
            x if x >= 160 && x < 255 => x - 128,
            _ => b'.'
        }).collect();
        print!("{:04X} : ",row_label);
        for byte in slice {
            print!("{:02X} ",byte);
        }
        for _blank in slice_end..slice_start+16 {
            print!("   ");
        }
        print!("|+| {} ",String::from_utf8_lossy(&txt));
        for _blank in slice_end..slice_start+16 {
            print!(" ");
        }
        println!("|-| {}",String::from_utf8_lossy(&neg_txt));
        slice_start += 16;
    }
}

/// This takes any bytes and makes an ascii friendly string
/// by using hex escapes, e.g., `\xFF`.
/// if `escape_cc` is true, ascii control characters are also escaped.
/// if `inverted` is true, assume we have negative ascii bytes.
/// This is intended for directory strings.
pub fn escaped_ascii_from_bytes(bytes: &[u8],escape_cc: bool,inverted: bool) -> String {
    let mut result = String::new();
    let (lb,ub) = match (escape_cc,inverted) {
        (true,false) => (0x20,0x7e),
        (false,false) => (0x00,0x7f),
        (true,true) => (0xa0,0xfe),
        (false,true) => (0x80,0xff)
    };
    for i in 0..bytes.len() {
        if bytes[i] >= lb && bytes[i] <= ub {
            let ch = match inverted {
                true => bytes[i] - 0x80,
                false => bytes[i]
            };
            result.push(ch as char);
        } else {
            let mut temp = String::new();
            write!(&mut temp,"\\x{:02X}",bytes[i]).expect("unreachable");
            result += &temp;
        }
    }
    result
}

/// Interpret a UTF8 string as pure ascii and put into bytes.
/// Non-ascii characters are omitted from the result, but arbitrary
/// bytes can be introduced using escapes, e.g., `\xFF`.
/// if `inverted` is true the sign of the non-escaped bytes is flipped.
/// The ascii is put in upper case, suitable for directory strings.
pub fn escaped_ascii_to_bytes(s: &str,inverted: bool) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        // check for a \xHH escape
        if chars[i] == '\\' && i+3 < chars.len() && chars[i+1] == 'x' &&
            chars[i+2].is_ascii_hexdigit() && chars[i+3].is_ascii_hexdigit() {
            let hex_str: String = chars[i+2..i+4].iter().collect();
            if let Ok(mut bytes) = hex::decode(&hex_str) {
                ans.append(&mut bytes);
                i += 4;
                continue;
            }
        }
        if chars[i].is_ascii() {
            let up = chars[i].to_ascii_uppercase() as u8;
            ans.push(up + match inverted { true => 128, false => 0 });
        }
        i += 1;
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaped_ascii_round_trip() {
        let bytes = escaped_ascii_to_bytes("hello",true);
        assert_eq!(bytes,vec![0xc8,0xc5,0xcc,0xcc,0xcf]);
        assert_eq!(escaped_ascii_from_bytes(&bytes,true,true),"HELLO");
    }

    #[test]
    fn hex_escapes() {
        let bytes = escaped_ascii_to_bytes("A\\x8dB",false);
        assert_eq!(bytes,vec![0x41,0x8d,0x42]);
        assert_eq!(escaped_ascii_from_bytes(&bytes,true,false),"A\\x8DB");
    }
}
