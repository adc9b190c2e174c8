//! # Outer wrapper module
//!
//! Disk images are sometimes carried inside an outer compression layer.
//! This module detects and removes that layer, handing the raw image bytes up
//! to `img`.  Three wrappers are handled, probed in this order:
//!
//! * gzip, detected by the `1F 8B` magic
//! * ZIP with exactly one member, detected by the end-of-central-directory trailer
//! * DDD ("DOS Disk Destroyer"), which has no magic and is only tried on request
//!
//! Each wrapper exposes `test`, `load`, and `save`.  Loading produces a plain
//! byte buffer; saving re-encodes one.

pub mod gzip;
pub mod zip;
pub mod ddd;

use log::{debug,info};
use crate::DYNERR;

/// Largest uncompressed image a wrapper will produce.  Partitioned hard
/// drive images can exceed the 32M ProDOS volume limit, but accepting
/// arbitrarily large streams invites abuse.
pub const MAX_UNWRAPPED_SIZE: usize = 32*1024*1024;

/// Enumerates wrapper errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("wrapper format mismatch")]
    Mismatch,
    #[error("archive has more than one member")]
    FileArchive,
    #[error("bad checksum")]
    BadChecksum,
    #[error("bad compressed data")]
    BadCompressedData,
    #[error("wrapper is damaged")]
    WrapperDamaged,
    #[error("uncompressed size out of range")]
    TooBig
}

#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum WrapperKind {
    Gzip,
    Zip,
    Ddd
}

impl std::fmt::Display for WrapperKind {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gzip => write!(f,"gzip"),
            Self::Zip => write!(f,"zip"),
            Self::Ddd => write!(f,"ddd")
        }
    }
}

/// Result of removing (or not finding) an outer wrapper.
pub struct Unwrapped {
    pub data: Vec<u8>,
    pub kind: Option<WrapperKind>,
    /// set when a damaged wrapper was accepted anyway (see `gzip`)
    pub damaged: bool,
    /// member name stored in the archive, when the wrapper has one
    pub stored_name: Option<String>,
    /// DOS volume number recovered from a DDD stream
    pub dos_volume: Option<u8>
}

impl Unwrapped {
    fn plain(data: Vec<u8>) -> Self {
        Self { data, kind: None, damaged: false, stored_name: None, dos_volume: None }
    }
}

/// Probe the magic-bearing wrappers and unwrap if one matches.
/// Bytes that match no wrapper pass through unchanged.  DDD has no magic, so
/// it is only tried when `try_ddd` is set (normally because the user asserted
/// the format or a DOS file catalog suggested it).
pub fn unwrap(raw: &[u8],try_ddd: bool) -> Result<Unwrapped,DYNERR> {
    if gzip::test(raw) {
        info!("found gzip wrapper");
        let (data,damaged) = gzip::load(raw)?;
        return Ok(Unwrapped {
            data,
            kind: Some(WrapperKind::Gzip),
            damaged,
            stored_name: None,
            dos_volume: None
        });
    }
    if zip::test(raw).is_ok() {
        info!("found zip wrapper");
        let (data,stored_name) = zip::load(raw)?;
        return Ok(Unwrapped {
            data,
            kind: Some(WrapperKind::Zip),
            damaged: false,
            stored_name: Some(stored_name),
            dos_volume: None
        });
    }
    if try_ddd {
        match ddd::load(raw) {
            Ok((data,vol)) => {
                info!("unpacked DDD wrapper, volume {}",vol);
                return Ok(Unwrapped {
                    data,
                    kind: Some(WrapperKind::Ddd),
                    damaged: false,
                    stored_name: None,
                    dos_volume: Some(vol)
                });
            },
            Err(e) => debug!("not DDD: {}",e)
        }
    }
    debug!("no outer wrapper found");
    Ok(Unwrapped::plain(raw.to_vec()))
}
