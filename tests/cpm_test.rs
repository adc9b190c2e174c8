// test of cpm file system module
use a2img::img::{DiskImg,FsFormat,SectorOrder};
use a2img::fs::{self,cpm,DiskFS,InitMode};
use a2img::OpenOptions;

/// Build a CP/M directory by hand on a DOS-ordered 140K image.  The
/// directory occupies CP/M blocks 0-1 (ProDOS blocks 24-27 under the CP/M
/// skew); data blocks are named by number relative to that base.
fn build_cpm_disk() -> Vec<u8> {
    let mut img = DiskImg::create_sectors(35,16);
    let erased = vec![0xe5u8;512];
    for i in 0..4 {
        img.write_block_swapped(24+i,&erased,SectorOrder::Dos,SectorOrder::Cpm).expect("write failed");
    }
    // HELLO.TXT: one extent, 9 records (1152 bytes), cpm blocks 2 and 3
    let mut dir = vec![0xe5u8;512];
    dir[0x00] = 0;                          // user number
    dir[0x01..0x09].copy_from_slice(b"HELLO   ");
    dir[0x09..0x0c].copy_from_slice(b"TXT");
    dir[0x0c] = 0;                          // extent
    dir[0x0d] = 0;                          // S1
    dir[0x0e] = 0;                          // S2
    dir[0x0f] = 9;                          // records
    dir[0x10] = 2;                          // first allocation block
    dir[0x11] = 3;
    for i in 0x12..0x20 {
        dir[i] = 0;
    }
    // BIG.BIN: two extents to check extent merging; extent 0 is full
    // (16K = 128 records, recorded as 0x80), extent 1 has 4 records
    for (off,extent,records,first_block) in [(0x20,0u8,0x80u8,4u8),(0x40,1,4,20)] {
        dir[off+0x00] = 0;
        dir[off+0x01..off+0x09].copy_from_slice(b"BIG     ");
        dir[off+0x09..off+0x0c].copy_from_slice(b"BIN");
        dir[off+0x0c] = extent;
        dir[off+0x0f] = records;
        for b in 0..16 {
            dir[off+0x10+b] = match extent {
                0 => first_block + b as u8,
                _ => match b {
                    0 => first_block,
                    _ => 0
                }
            };
        }
    }
    img.write_block_swapped(24,&dir,SectorOrder::Dos,SectorOrder::Cpm).expect("write failed");
    // data for HELLO.TXT
    let payload: Vec<u8> = (0..1152).map(|i| (i%251) as u8).collect();
    for (i,chunk) in payload.chunks(512).enumerate() {
        let mut blk = vec![0u8;512];
        blk[0..chunk.len()].copy_from_slice(chunk);
        img.write_block_swapped(24 + 2*2 + i,&blk,SectorOrder::Dos,SectorOrder::Cpm).expect("write failed");
    }
    img.to_bytes()
}

#[test]
fn identify_and_catalog() {
    let bytes = build_cpm_disk();
    let probed = a2img::create_img_from_bytestream(&bytes,&OpenOptions::default()).expect("probe failed");
    assert_eq!(probed.fs_format,FsFormat::Cpm);
    assert_eq!(probed.order,SectorOrder::Dos);
    let disk = fs::mount(probed,InitMode::Full,fs::SubVolumeScan::ContainerOnly).expect("mount failed");
    assert_eq!(disk.list_files().len(),2);
    let hello = disk.list_files().iter().find(|f| f.name == "HELLO.TXT").expect("file missing");
    assert_eq!(hello.length,9*128);
    let big = disk.list_files().iter().find(|f| f.name == "BIG.BIN").expect("file missing");
    // last extent is #1 with 4 records
    assert_eq!(big.length,16*1024 + 4*128);
}

#[test]
fn read_contents() {
    let bytes = build_cpm_disk();
    let mut disk = a2img::create_fs_from_bytestream(&bytes,&OpenOptions::default()).expect("open failed");
    let mut handle = disk.open("HELLO.TXT").expect("open failed");
    let mut buf = vec![0u8;2000];
    let n = disk.read(&mut handle,&mut buf).expect("read failed");
    assert_eq!(n,1152);
    for i in 0..1152 {
        assert_eq!(buf[i],(i%251) as u8);
    }
    disk.close(handle).expect("close failed");
    // CP/M is read-only
    assert!(disk.create("NEW.TXT",0x04,0).is_err());
    let mut handle = disk.open("HELLO.TXT").expect("open failed");
    assert!(disk.write(&mut handle,&[0u8;10],None).is_err());
    disk.close(handle).expect("close failed");
}

#[test]
fn mixed_case_directory_is_not_cpm() {
    // an erased directory with one entry whose user number is out of
    // range must not identify
    let mut img = DiskImg::create_sectors(35,16);
    let mut dir = vec![0xe5u8;512];
    dir[0] = 0x55;
    img.write_block_swapped(24,&dir,SectorOrder::Dos,SectorOrder::Cpm).expect("write failed");
    let mut raw = DiskImg::from_bytes(img.to_bytes(),false);
    raw.analyze_physical().expect("physical failed");
    assert!(cpm::Disk::test(&mut raw).is_none());
}
