//! ### Volume usage map
//!
//! Every file system keeps one of these while scanning its catalog.  Each
//! allocation chunk (a sector or a block) carries three facts: whether some
//! structure actually uses it, whether the volume's own bookkeeping marks it
//! used, and what it is used for.  A chunk claimed by two owners becomes a
//! conflict, which `check_disk_is_good` turns into a warning.

use bit_vec::BitVec;
use log::{debug,warn};
use crate::DYNERR;
use crate::img;

/// What a used chunk is used for.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum ChunkPurpose {
    Unknown,
    /// boot loaders, OS images, volume bitmaps
    System,
    VolumeDir,
    /// index structures such as T/S lists
    FileStruct,
    UserData,
    Subdir,
    /// an embedded sub-volume
    Embedded,
    /// more than one owner claimed the chunk
    Conflict
}

#[derive(Clone,Copy,PartialEq,Eq)]
pub struct ChunkState {
    pub is_used: bool,
    pub is_marked_used: bool,
    pub purpose: ChunkPurpose
}

impl ChunkState {
    pub fn free() -> Self {
        Self { is_used: false, is_marked_used: false, purpose: ChunkPurpose::Unknown }
    }
}

/// Per-chunk allocation and conflict map, indexed by `(track,sector)` or by
/// block depending on how it was created.
pub struct VolumeUsage {
    by_blocks: bool,
    num_sectors: usize,
    total_chunks: usize,
    used: BitVec,
    marked: BitVec,
    purpose: Vec<u8>
}

impl VolumeUsage {
    pub fn new_blocks(num_blocks: usize) -> Self {
        Self {
            by_blocks: true,
            num_sectors: 0,
            total_chunks: num_blocks,
            used: BitVec::from_elem(num_blocks,false),
            marked: BitVec::from_elem(num_blocks,false),
            purpose: vec![0;num_blocks]
        }
    }
    pub fn new_sectors(num_tracks: usize,num_sectors: usize) -> Self {
        let count = num_tracks*num_sectors;
        Self {
            by_blocks: false,
            num_sectors,
            total_chunks: count,
            used: BitVec::from_elem(count,false),
            marked: BitVec::from_elem(count,false),
            purpose: vec![0;count]
        }
    }
    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }
    fn purpose_from_code(code: u8) -> ChunkPurpose {
        match code {
            1 => ChunkPurpose::System,
            2 => ChunkPurpose::VolumeDir,
            3 => ChunkPurpose::FileStruct,
            4 => ChunkPurpose::UserData,
            5 => ChunkPurpose::Subdir,
            6 => ChunkPurpose::Embedded,
            7 => ChunkPurpose::Conflict,
            _ => ChunkPurpose::Unknown
        }
    }
    fn purpose_to_code(purpose: ChunkPurpose) -> u8 {
        match purpose {
            ChunkPurpose::Unknown => 0,
            ChunkPurpose::System => 1,
            ChunkPurpose::VolumeDir => 2,
            ChunkPurpose::FileStruct => 3,
            ChunkPurpose::UserData => 4,
            ChunkPurpose::Subdir => 5,
            ChunkPurpose::Embedded => 6,
            ChunkPurpose::Conflict => 7
        }
    }
    fn get_idx(&self,idx: usize) -> Result<ChunkState,DYNERR> {
        if idx >= self.total_chunks {
            return Err(Box::new(img::Error::InvalidArg));
        }
        Ok(ChunkState {
            is_used: self.used[idx],
            is_marked_used: self.marked[idx],
            purpose: Self::purpose_from_code(self.purpose[idx])
        })
    }
    fn set_idx(&mut self,idx: usize,state: ChunkState) -> Result<(),DYNERR> {
        if idx >= self.total_chunks {
            return Err(Box::new(img::Error::InvalidArg));
        }
        self.used.set(idx,state.is_used);
        self.marked.set(idx,state.is_marked_used);
        self.purpose[idx] = match state.is_used {
            true => Self::purpose_to_code(state.purpose),
            false => 0
        };
        Ok(())
    }
    pub fn get_block(&self,block: usize) -> Result<ChunkState,DYNERR> {
        if !self.by_blocks {
            return Err(Box::new(img::Error::InvalidArg));
        }
        self.get_idx(block)
    }
    pub fn set_block(&mut self,block: usize,state: ChunkState) -> Result<(),DYNERR> {
        if !self.by_blocks {
            return Err(Box::new(img::Error::InvalidArg));
        }
        self.set_idx(block,state)
    }
    pub fn get_sector(&self,track: usize,sector: usize) -> Result<ChunkState,DYNERR> {
        if self.by_blocks || sector >= self.num_sectors {
            return Err(Box::new(img::Error::InvalidArg));
        }
        self.get_idx(track*self.num_sectors + sector)
    }
    pub fn set_sector(&mut self,track: usize,sector: usize,state: ChunkState) -> Result<(),DYNERR> {
        if self.by_blocks || sector >= self.num_sectors {
            return Err(Box::new(img::Error::InvalidArg));
        }
        self.set_idx(track*self.num_sectors + sector,state)
    }
    /// Claim a chunk for `purpose`; a second claim degrades it to a conflict.
    pub fn claim_block(&mut self,block: usize,purpose: ChunkPurpose) -> Result<(),DYNERR> {
        let mut state = self.get_block(block)?;
        if state.is_used {
            warn!("conflicting uses for block={}",block);
            state.purpose = ChunkPurpose::Conflict;
        } else {
            state.is_used = true;
            state.is_marked_used = true;
            state.purpose = purpose;
        }
        self.set_block(block,state)
    }
    pub fn claim_sector(&mut self,track: usize,sector: usize,purpose: ChunkPurpose) -> Result<(),DYNERR> {
        let mut state = self.get_sector(track,sector)?;
        if state.is_used {
            warn!("conflicting uses for sct=({},{})",track,sector);
            state.purpose = ChunkPurpose::Conflict;
        } else {
            state.is_used = true;
            state.is_marked_used = true;
            state.purpose = purpose;
        }
        self.set_sector(track,sector,state)
    }
    /// chunks that are neither used nor marked used
    pub fn actual_free_chunks(&self) -> usize {
        let mut free_count = 0;
        let mut funky_count = 0;
        for i in 0..self.total_chunks {
            let used = self.used[i];
            let marked = self.marked[i];
            if !used && !marked {
                free_count += 1;
            }
            if used != marked || (used && self.purpose[i] == Self::purpose_to_code(ChunkPurpose::Conflict)) {
                funky_count += 1;
            }
        }
        debug!("VU total={} free={} funky={}",self.total_chunks,free_count,funky_count);
        free_count
    }
    /// Tallies for consistency checks: `(not_marked,extra_used,conflicts)`.
    pub fn tallies(&self) -> (usize,usize,usize) {
        let mut not_marked = 0;
        let mut extra_used = 0;
        let mut conflicts = 0;
        for i in 0..self.total_chunks {
            if self.used[i] && !self.marked[i] {
                not_marked += 1;
            }
            if !self.used[i] && self.marked[i] {
                extra_used += 1;
            }
            if self.purpose[i] == Self::purpose_to_code(ChunkPurpose::Conflict) {
                conflicts += 1;
            }
        }
        (not_marked,extra_used,conflicts)
    }
    fn state_to_char(state: &ChunkState) -> char {
        match (state.is_used,state.is_marked_used) {
            (false,false) => '.',
            (false,true) => 'X',
            (true,false) => '!',
            (true,true) => match state.purpose {
                ChunkPurpose::Unknown => '?',
                ChunkPurpose::Conflict => '#',
                ChunkPurpose::System => 'S',
                ChunkPurpose::VolumeDir => 'V',
                ChunkPurpose::Subdir => 'D',
                ChunkPurpose::UserData => 'F',
                ChunkPurpose::FileStruct => 'I',
                ChunkPurpose::Embedded => 'E'
            }
        }
    }
    /// Emit the character map through the log, one row per track or per
    /// 32 blocks.
    pub fn dump(&self) {
        debug!("VolumeUsage dump ({} free chunks):",self.actual_free_chunks());
        if self.by_blocks {
            let mut row = String::new();
            for block in 0..self.total_chunks {
                if let Ok(state) = self.get_idx(block) {
                    row.push(Self::state_to_char(&state));
                }
                if block%32 == 31 || block == self.total_chunks-1 {
                    debug!("  {:#06x}: {}",block & !31,row);
                    row.clear();
                }
            }
        } else {
            debug!("  map 0123456789abcdef");
            let num_tracks = self.total_chunks/self.num_sectors;
            for track in 0..num_tracks {
                let mut row = String::new();
                for sector in 0..self.num_sectors {
                    if let Ok(state) = self.get_sector(track,sector) {
                        row.push(Self::state_to_char(&state));
                    }
                }
                debug!("  {:2}: {}",track,row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservation() {
        let mut usage = VolumeUsage::new_sectors(35,16);
        assert_eq!(usage.actual_free_chunks(),560);
        for s in 0..16 {
            usage.claim_sector(17,s,ChunkPurpose::VolumeDir).expect("claim failed");
        }
        assert_eq!(usage.actual_free_chunks(),560-16);
    }

    #[test]
    fn conflict_detection() {
        let mut usage = VolumeUsage::new_blocks(280);
        usage.claim_block(6,ChunkPurpose::UserData).expect("claim failed");
        usage.claim_block(6,ChunkPurpose::FileStruct).expect("claim failed");
        assert_eq!(usage.get_block(6).unwrap().purpose,ChunkPurpose::Conflict);
        let (_nm,_xu,conflicts) = usage.tallies();
        assert_eq!(conflicts,1);
    }

    #[test]
    fn marked_but_unused() {
        let mut usage = VolumeUsage::new_blocks(16);
        let mut state = ChunkState::free();
        state.is_marked_used = true;
        usage.set_block(3,state).expect("set failed");
        let (not_marked,extra_used,_c) = usage.tallies();
        assert_eq!((not_marked,extra_used),(0,1));
        assert_eq!(usage.actual_free_chunks(),15);
    }

    #[test]
    fn addressing_mode_enforced() {
        let usage = VolumeUsage::new_blocks(16);
        assert!(usage.get_sector(0,0).is_err());
        let usage = VolumeUsage::new_sectors(35,13);
        assert!(usage.get_block(0).is_err());
        assert!(usage.get_sector(0,13).is_err());
    }
}
