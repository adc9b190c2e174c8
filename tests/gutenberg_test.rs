// test of gutenberg file system module
use a2img::img::{DiskImg,FsFormat,SectorOrder};
use a2img::fs::{self,DiskFS,InitMode};
use a2img::OpenOptions;

fn high_pad(s: &str,len: usize) -> Vec<u8> {
    let mut ans: Vec<u8> = s.bytes().map(|b| b | 0x80).collect();
    ans.resize(len,0xa0);
    ans
}

/// One catalog sector at (17,7) naming the DIR file and one document, plus
/// the document's two linked sectors.
fn build_gutenberg_disk() -> Vec<u8> {
    let mut img = DiskImg::create_sectors(35,16);
    let mut cat = vec![0u8;256];
    // sector links: prev points home, cur is self, next has the end bit
    cat[0] = 17; cat[1] = 7;
    cat[2] = 17; cat[3] = 7;
    cat[4] = 0x80 | 17; cat[5] = 7;
    cat[6..15].copy_from_slice(&high_pad("GB/MASTER",9));
    cat[15] = 0x8d;
    // every entry line ends with 0x8D so the sector reads as text
    for i in 1..15 {
        let off = 0x10 + (i-1)*0x10;
        cat[off..off+12].copy_from_slice(&high_pad("",12));
        cat[off+15] = 0x8d;
    }
    // entry 1: the catalog itself
    cat[0x10..0x1c].copy_from_slice(&high_pad("DIR",12));
    cat[0x1c] = 17; cat[0x1d] = 7;
    cat[0x1e] = b'L' | 0x80;
    // entry 2: a two-sector document
    cat[0x20..0x2c].copy_from_slice(&high_pad("CHAPTER1",12));
    cat[0x2c] = 20; cat[0x2d] = 3;
    cat[0x2e] = b'P' | 0x80;
    img.write_track_sector_swapped(17,7,&cat,SectorOrder::Dos,SectorOrder::Dos).expect("write failed");
    // the document: (20,3) -> (20,4) -> end
    let mut sec1 = vec![0xc1u8;256];
    sec1[0] = 0x80 | 17; sec1[1] = 7;   // prev link marks start of file
    sec1[2] = 20; sec1[3] = 3;
    sec1[4] = 20; sec1[5] = 4;
    img.write_track_sector_swapped(20,3,&sec1,SectorOrder::Dos,SectorOrder::Dos).expect("write failed");
    let mut sec2 = vec![0xc2u8;256];
    sec2[0] = 20; sec2[1] = 3;
    sec2[2] = 20; sec2[3] = 4;
    sec2[4] = 0x80 | 20; sec2[5] = 4;   // end of file
    img.write_track_sector_swapped(20,4,&sec2,SectorOrder::Dos,SectorOrder::Dos).expect("write failed");
    img.to_bytes()
}

#[test]
fn identify_and_catalog() {
    let bytes = build_gutenberg_disk();
    let probed = a2img::create_img_from_bytestream(&bytes,&OpenOptions::default()).expect("probe failed");
    assert_eq!(probed.fs_format,FsFormat::Gutenberg);
    assert_eq!(probed.order,SectorOrder::Dos);
    let disk = fs::mount(probed,InitMode::Full,fs::SubVolumeScan::ContainerOnly).expect("mount failed");
    assert_eq!(disk.volume_id(),"Gutenberg: GB/MASTER");
    let names: Vec<String> = disk.list_files().iter().map(|f| f.name.clone()).collect();
    assert!(names.contains(&"DIR".to_string()));
    assert!(names.contains(&"CHAPTER1".to_string()));
    let doc = disk.list_files().iter().find(|f| f.name == "CHAPTER1").expect("file missing");
    // six bytes of every sector are links, the other 250 are payload
    assert_eq!(doc.length,2*250);
    assert_eq!(doc.sectors,2);
}

#[test]
fn read_skips_sector_links() {
    let bytes = build_gutenberg_disk();
    let mut disk = a2img::create_fs_from_bytestream(&bytes,&OpenOptions::default()).expect("open failed");
    let mut handle = disk.open("CHAPTER1").expect("open failed");
    let mut buf = vec![0u8;1000];
    let n = disk.read(&mut handle,&mut buf).expect("read failed");
    assert_eq!(n,500);
    assert_eq!(&buf[0..250],&[0xc1u8;250][..]);
    assert_eq!(&buf[250..500],&[0xc2u8;250][..]);
    disk.close(handle).expect("close failed");
}

#[test]
fn deleted_entries_are_hidden() {
    let mut bytes = build_gutenberg_disk();
    // catalog sector (17,7) of a DOS-ordered image: logical sector 7 is
    // physical 1, stored at linear position raw2dos[1] = 7
    let offset = (17*16 + 7)*256;
    // mark CHAPTER1 deleted via the 0x40 sector byte
    bytes[offset+0x2d] = 0x40;
    let disk = a2img::create_fs_from_bytestream(&bytes,&OpenOptions::default()).expect("open failed");
    assert!(disk.list_files().iter().all(|f| f.name != "CHAPTER1"));
}
