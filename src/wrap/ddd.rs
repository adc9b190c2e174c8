//! ### DDD wrapper
//!
//! "DOS Disk Destroyer" packs a 35-track DOS-ordered image one track at a
//! time.  Each track carries a table of its 20 most frequent byte values
//! (runs excluded), then a token stream: a 0 bit prefixes an 8-bit literal
//! (LSB first on the wire), the favorite codes are 4 to 7 bits long with an
//! implied leading 1, and the code 0x97 introduces a `(value,count)` run
//! where a count of 0 means 256.  Runs are emitted for four or more repeats.
//!
//! There is no magic and no checksum.  The only way to recognize the format
//! is to unpack it and land exactly on 140K; DOS-resident copies can carry
//! up to 256 trailing junk bytes, which are tolerated.

use log::{debug,trace};
use crate::DYNERR;
use super::Error;

const NUM_TRACKS: usize = 35;
const TRACK_LEN: usize = 4096;
pub const UNPACKED_LEN: usize = NUM_TRACKS * TRACK_LEN;
const NUM_FAVORITES: usize = 20;
const RLE_DELIM: u8 = 0x97;
const MAX_EXCESS_BYTES: usize = 256;
/// apparent random garbage, but DDD Pro 1.1 writes it consistently
const DDD_PRO_SIGNATURE: [u8;4] = [0x03,0xc9,0xbf,0xd0];

/// Favorite codes as they appear on the wire, low bits first; written in
/// reverse order every one of them starts with a high bit.
const FAVORITE_BIT_ENC: [u8;NUM_FAVORITES] = [
    0x03, 0x09, 0x1f, 0x0f, 0x07, 0x1b, 0x0b, 0x0d, 0x15, 0x37,
    0x3d, 0x25, 0x05, 0xb1, 0x11, 0x21, 0x01, 0x57, 0x5d, 0x1d
];
const FAVORITE_BIT_ENC_LEN: [usize;NUM_FAVORITES] = [
    4, 4, 5, 5, 5, 5, 5, 5, 5, 6,
    6, 6, 6, 6, 6, 6, 6, 7, 7, 7
];
/// Reverse of `FAVORITE_BIT_ENC`: bit-reversed and missing the leading 1.
const FAVORITE_BIT_DEC: [u8;NUM_FAVORITES] = [
    0x04, 0x01, 0x0f, 0x0e, 0x0c, 0x0b, 0x0a, 0x06, 0x05, 0x1b,
    0x0f, 0x09, 0x08, 0x03, 0x02, 0x01, 0x00, 0x35, 0x1d, 0x1c
];

fn reverse_bits(val: u8) -> u8 {
    let mut v = val;
    let mut ans = 0u8;
    for _i in 0..8 {
        ans = (ans << 1) | (v & 1);
        v >>= 1;
    }
    ans
}

/// Bit stream reader.  Bits come out in wire order, most significant first
/// within each byte.
struct BitReader<'a> {
    src: &'a [u8],
    mark: usize,
    bits: u8,
    bit_count: usize,
    starved: bool
}

impl<'a> BitReader<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self { src, mark: 0, bits: 0, bit_count: 0, starved: false }
    }
    fn get_bits(&mut self,num_bits: usize) -> u8 {
        let mut ans = 0u8;
        for _i in 0..num_bits {
            if self.bit_count == 0 {
                if self.mark < self.src.len() {
                    self.bits = self.src[self.mark];
                    self.mark += 1;
                } else {
                    self.bits = 0;
                    self.starved = true;
                }
                self.bit_count = 8;
            }
            ans = (ans << 1) | (self.bits >> 7);
            self.bits <<= 1;
            self.bit_count -= 1;
        }
        ans
    }
    /// bytes of input consumed so far, counting the partial byte
    fn consumed(&self) -> usize {
        self.mark
    }
}

/// Bit stream writer, most significant bit of each output byte first.
/// `put_bits` takes bits LSB first from `bits`, matching the packer's habit
/// of emitting literals in reverse.
struct BitWriter {
    out: Vec<u8>,
    bits: u8,
    bit_count: usize
}

impl BitWriter {
    fn new() -> Self {
        Self { out: Vec::new(), bits: 0, bit_count: 0 }
    }
    fn put_bits(&mut self,bits: u8,num_bits: usize) {
        let mut v = bits;
        for _i in 0..num_bits {
            self.bits = (self.bits << 1) | (v & 1);
            self.bit_count += 1;
            if self.bit_count == 8 {
                self.out.push(self.bits);
                self.bits = 0;
                self.bit_count = 0;
            }
            v >>= 1;
        }
    }
    fn into_bytes(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            self.put_bits(0,8-self.bit_count%8);
        }
        self.out
    }
}

/// Count symbol frequencies over one track, skipping bytes inside runs of
/// four or more.
fn compute_freq_counts(track: &[u8]) -> [u16;256] {
    let mut counts = [0u16;256];
    let mut i = 0;
    while i < TRACK_LEN {
        let val = track[i];
        if i < TRACK_LEN-3 && val == track[i+1] && val == track[i+2] && val == track[i+3] {
            let mut run_len = 4;
            i += 3;
            while i < TRACK_LEN-1 && track[i] == track[i+1] {
                run_len += 1;
                i += 1;
                if run_len == 256 {
                    break;
                }
            }
        } else {
            counts[val as usize] += 1;
        }
        i += 1;
    }
    counts
}

/// Pick the 20 most frequent symbols, in order.  Ties go to the highest value,
/// the same way the original's `>=` scan resolves them.
fn compute_favorites(counts: &mut [u16;256]) -> [u8;NUM_FAVORITES] {
    let mut favorites = [0u8;NUM_FAVORITES];
    for fav in 0..NUM_FAVORITES {
        let mut best_count = 0u16;
        let mut best_sym = 0u8;
        for sym in 0..256 {
            if counts[sym] >= best_count {
                best_sym = sym as u8;
                best_count = counts[sym];
            }
        }
        favorites[fav] = best_sym;
        counts[best_sym as usize] = 0;
    }
    favorites
}

fn pack_track(track: &[u8],writer: &mut BitWriter) {
    let mut counts = compute_freq_counts(track);
    let favorites = compute_favorites(&mut counts);
    for fav in 0..NUM_FAVORITES {
        writer.put_bits(favorites[fav],8);
    }
    let mut i = 0;
    while i < TRACK_LEN {
        let val = track[i];
        if i < TRACK_LEN-3 && val == track[i+1] && val == track[i+2] && val == track[i+3] {
            let mut run_len: usize = 4;
            i += 3;
            while i < TRACK_LEN-1 && track[i] == track[i+1] {
                run_len += 1;
                i += 1;
                if run_len == 256 {
                    run_len = 0;
                    break;
                }
            }
            writer.put_bits(RLE_DELIM,8);
            writer.put_bits(val,8);
            writer.put_bits(run_len as u8,8);
        } else {
            match favorites.iter().position(|f| *f == val) {
                Some(fav) => writer.put_bits(FAVORITE_BIT_ENC[fav],FAVORITE_BIT_ENC_LEN[fav]),
                None => {
                    writer.put_bits(0,1);
                    writer.put_bits(val,8);
                }
            }
        }
        i += 1;
    }
}

fn unpack_track(reader: &mut BitReader,track: &mut [u8]) -> bool {
    let mut favorites = [0u8;NUM_FAVORITES];
    for fav in 0..NUM_FAVORITES {
        favorites[fav] = reverse_bits(reader.get_bits(8));
    }
    let mut mark = 0;
    while mark < TRACK_LEN {
        if reader.get_bits(1) == 0 {
            track[mark] = reverse_bits(reader.get_bits(8));
            mark += 1;
            continue;
        }
        // high bit set: favorite code or the RLE sentinel
        let mut val = reader.get_bits(2);
        let mut extra_bits = 0;
        let mut matched = false;
        while extra_bits < 4 {
            val = (val << 1) | reader.get_bits(1);
            let (start,end) = match extra_bits {
                0 => (0,2),
                1 => (2,9),
                2 => (9,17),
                _ => (17,20)
            };
            if let Some(hit) = (start..end).find(|j| val == FAVORITE_BIT_DEC[*j]) {
                track[mark] = favorites[hit];
                mark += 1;
                matched = true;
                break;
            }
            extra_bits += 1;
        }
        if !matched {
            // no favorite fits, so this must be the 8-bit RLE sentinel
            let _last = reader.get_bits(1);
            let rle_char = reverse_bits(reader.get_bits(8));
            let count = reverse_bits(reader.get_bits(8));
            let rle_count = match count {
                0 => 256,
                n => n as usize
            };
            if mark + rle_count > TRACK_LEN {
                debug!("DDD overrun in RLE");
                return false;
            }
            for _i in 0..rle_count {
                track[mark] = rle_char;
                mark += 1;
            }
        }
    }
    true
}

/// Unpack a DDD stream.  Returns the raw DOS-ordered image and the volume
/// number recorded in the header.
pub fn load(raw: &[u8]) -> Result<(Vec<u8>,u8),DYNERR> {
    if raw.len() < 4 + NUM_FAVORITES {
        return Err(Box::new(Error::Mismatch));
    }
    // the first four bytes replace the DOS addr/len header, skip them
    let mut reader = BitReader::new(&raw[4..]);
    if reader.get_bits(3) != 0 {
        debug!("DDD leading bits not zero");
        return Err(Box::new(Error::Mismatch));
    }
    let vol = reverse_bits(reader.get_bits(8));
    trace!("DDD found disk volume num = {}",vol);
    let mut ans = vec![0u8;UNPACKED_LEN];
    for track in 0..NUM_TRACKS {
        if !unpack_track(&mut reader,&mut ans[track*TRACK_LEN..(track+1)*TRACK_LEN]) {
            debug!("DDD failed unpacking track {}",track);
            return Err(Box::new(Error::BadCompressedData));
        }
        if reader.starved {
            debug!("DDD ran out of input");
            return Err(Box::new(Error::BadCompressedData));
        }
    }
    // we should be within a byte or two of the end; DOS-resident copies can
    // leave up to a sector of junk behind
    let excess = raw.len() - 4 - reader.consumed();
    if excess > MAX_EXCESS_BYTES {
        debug!("DDD looks like too much data in input file ({} extra)",excess);
        return Err(Box::new(Error::BadCompressedData));
    }
    trace!("DDD excess bytes ({}) within normal parameters",excess);
    Ok((ans,vol))
}

/// Pack a DOS-ordered image.
pub fn save(img: &[u8],dos_volume: u8) -> Result<Vec<u8>,DYNERR> {
    if img.len() != UNPACKED_LEN {
        return Err(Box::new(Error::Mismatch));
    }
    let mut writer = BitWriter::new();
    for byte in DDD_PRO_SIGNATURE {
        writer.put_bits(byte,8);
    }
    writer.put_bits(0,3);
    writer.put_bits(dos_volume,8);
    for track in 0..NUM_TRACKS {
        pack_track(&img[track*TRACK_LEN..(track+1)*TRACK_LEN],&mut writer);
    }
    // flush the remainder, then one more zero because that's what
    // DDD Pro v1.1 does
    let mut ans = writer.into_bytes();
    ans.push(0);
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> Vec<u8> {
        let mut img = vec![0u8;UNPACKED_LEN];
        // a texture with runs, favorites, and scattered literals
        for (i,b) in img.iter_mut().enumerate() {
            *b = match i%11 {
                0..=3 => 0xa5,
                4..=6 => (i/7 % 256) as u8,
                _ => 0xde
            };
        }
        img
    }

    #[test]
    fn round_trip() {
        let img = sample_image();
        let packed = save(&img,254).expect("save failed");
        let (unpacked,vol) = load(&packed).expect("load failed");
        assert_eq!(vol,254);
        assert_eq!(unpacked,img);
    }

    #[test]
    fn round_trip_uniform_disk() {
        // all one value, exercises 256-count runs across every track
        let img = vec![0xe5u8;UNPACKED_LEN];
        let packed = save(&img,1).expect("save failed");
        let (unpacked,vol) = load(&packed).expect("load failed");
        assert_eq!(vol,1);
        assert_eq!(unpacked,img);
    }

    #[test]
    fn trailing_junk_tolerated() {
        let img = sample_image();
        let mut packed = save(&img,100).expect("save failed");
        packed.extend_from_slice(&[0xffu8;200]);
        assert!(load(&packed).is_ok());
        packed.extend_from_slice(&[0xffu8;200]);
        assert!(load(&packed).is_err());
    }

    #[test]
    fn not_ddd() {
        assert!(load(&vec![0x55u8;1000]).is_err());
    }
}
