// test of dos33 file system module
use a2img::img::{DiskImg,FsFormat,SectorOrder};
use a2img::fs::{self,dos33,DiskFS,InitMode};
use a2img::OpenOptions;

fn fresh_dos33() -> Box<dyn DiskFS> {
    let mut img = DiskImg::create_sectors(35,16);
    dos33::Disk::format(&mut img,254,true).expect("failed to format");
    Box::new(dos33::Disk::mount(img,InitMode::Full).expect("failed to mount"))
}

fn remount(disk: &mut Box<dyn DiskFS>) -> Box<dyn DiskFS> {
    let bytes = disk.get_img().to_bytes();
    a2img::create_fs_from_bytestream(&bytes,&OpenOptions::default()).expect("remount failed")
}

#[test]
fn format() {
    let mut disk = fresh_dos33();
    assert_eq!(disk.volume_id(),"DOS 3.3 Volume 254");
    assert!(disk.is_good());
    assert_eq!(disk.list_files().len(),0);
    // 560 total, less 3 DOS tracks and the catalog track
    assert_eq!(disk.usage().total_chunks(),560);
    assert_eq!(disk.usage().actual_free_chunks(),560 - 3*16 - 16);
    // the image probes back deterministically
    let bytes = disk.get_img().to_bytes();
    let probed = a2img::create_img_from_bytestream(&bytes,&OpenOptions::default()).expect("probe failed");
    assert_eq!(probed.fs_format,FsFormat::Dos33);
    assert_eq!(probed.order,SectorOrder::Dos);
}

#[test]
fn write_and_read_small() {
    let mut disk = fresh_dos33();
    // BASIC program file: 2-byte length header is embedded on close
    let prog: Vec<u8> = (0..300).map(|i| (i%100) as u8).collect();
    disk.create("HELLO",0xfc,0).expect("create failed");
    let mut handle = disk.open("HELLO").expect("open failed");
    disk.write(&mut handle,&prog,None).expect("write failed");
    disk.close(handle).expect("close failed");

    // reopen from scratch; length must come back from the embedded header
    let mut disk = remount(&mut disk);
    let finfo = disk.list_files().iter().find(|f| f.name == "HELLO").expect("file missing").clone();
    assert_eq!(finfo.length,300);
    assert_eq!(finfo.prodos_type,0xfc);
    // 2 data sectors (302 bytes with header) plus one T/S list
    assert_eq!(finfo.sectors,3);
    let mut handle = disk.open("HELLO").expect("open failed");
    let mut back = vec![0u8;400];
    let n = disk.read(&mut handle,&mut back).expect("read failed");
    assert_eq!(n,300);
    assert_eq!(&back[0..300],&prog[0..300]);
    disk.close(handle).expect("close failed");
}

#[test]
fn binary_header_law() {
    let mut disk = fresh_dos33();
    let payload: Vec<u8> = (0..1000).map(|i| (i%251) as u8).collect();
    disk.create("THECHIP",0x06,0x0300).expect("create failed");
    let mut handle = disk.open("THECHIP").expect("open failed");
    disk.write(&mut handle,&payload,None).expect("write failed");
    disk.close(handle).expect("close failed");
    // the first data sector starts with the address and length
    let img = disk.get_img();
    let finfo_bytes = img.read_track_sector(17,15).expect("catalog read failed");
    let tsl_ts = [finfo_bytes[0x0b],finfo_bytes[0x0c]];
    let tsl = img.read_track_sector(tsl_ts[0] as usize,tsl_ts[1] as usize).expect("tsl read failed");
    let first = img.read_track_sector(tsl[0x0c] as usize,tsl[0x0d] as usize).expect("data read failed");
    assert_eq!(&first[0..4],&[0x00,0x03,0xe8,0x03]);
    // and the reopened file reports aux and length faithfully
    let mut disk = remount(&mut disk);
    let finfo = disk.list_files().iter().find(|f| f.name == "THECHIP").expect("file missing").clone();
    assert_eq!(finfo.aux,0x0300);
    assert_eq!(finfo.length,1000);
}

#[test]
fn free_count_accounting() {
    let mut disk = fresh_dos33();
    let before = disk.usage().actual_free_chunks();
    let payload = vec![0x41u8;5*256];
    disk.create("DATA",0x06,0x2000).expect("create failed");
    let mut handle = disk.open("DATA").expect("open failed");
    disk.write(&mut handle,&payload,None).expect("write failed");
    disk.close(handle).expect("close failed");
    // 6 data sectors (payload + 4 byte header) and one T/S list
    let mut disk = remount(&mut disk);
    let after = disk.usage().actual_free_chunks();
    assert_eq!(before-after,7);
    // delete puts them all back
    disk.delete("DATA").expect("delete failed");
    let disk2 = remount(&mut disk);
    assert_eq!(disk2.usage().actual_free_chunks(),before);
    assert_eq!(disk2.list_files().len(),0);
}

#[test]
fn sparse_text_file() {
    // craft a random-access text file by hand: data, a (0,0) hole, then a
    // final sector whose first NUL stops the length scan
    let mut img = DiskImg::create_sectors(35,16);
    dos33::Disk::format(&mut img,254,false).expect("format failed");
    // catalog entry in the first catalog sector
    let mut cat = img.read_track_sector(17,15).expect("read failed");
    cat[0x0b] = 16;     // T/S list track
    cat[0x0c] = 15;     // T/S list sector
    cat[0x0d] = 0x00;   // type T
    for i in 0..30 {
        cat[0x0e+i] = 0xa0;
    }
    for (i,ch) in b"SPARSE".iter().enumerate() {
        cat[0x0e+i] = ch | 0x80;
    }
    cat[0x2c] = 4;      // length in sectors
    cat[0x2d] = 0;
    img.write_track_sector(17,15,&cat).expect("write failed");
    // T/S list with a hole in the middle
    let mut tsl = vec![0u8;256];
    tsl[0x0c] = 16; tsl[0x0d] = 14;
    tsl[0x0e] = 0;  tsl[0x0f] = 0;
    tsl[0x10] = 16; tsl[0x11] = 12;
    img.write_track_sector(16,15,&tsl).expect("write failed");
    let no_nul = vec![0xc1u8;256];
    img.write_track_sector(16,14,&no_nul).expect("write failed");
    let mut last = vec![0u8;256];
    last[0] = 0xc1;
    last[1] = 0xc2;
    img.write_track_sector(16,12,&last).expect("write failed");
    // mark the sectors used so the consistency scan stays quiet; the bit
    // for sector s of a 16-sector disk is bit s+16 of the big-endian word
    let mut vtoc = img.read_track_sector(17,0).expect("read failed");
    let mut map = u32::from_be_bytes([vtoc[0x38+16*4],vtoc[0x39+16*4],vtoc[0x3a+16*4],vtoc[0x3b+16*4]]);
    map &= !((1u32<<31) | (1<<30) | (1<<28));   // sectors 15, 14, 12
    vtoc[0x38+16*4..0x3c+16*4].copy_from_slice(&map.to_be_bytes());
    img.write_track_sector(17,0,&vtoc).expect("write failed");

    let mut disk = dos33::Disk::mount(img,InitMode::Full).expect("mount failed");
    let finfo = disk.list_files().iter().find(|f| f.name == "SPARSE").expect("file missing").clone();
    // 3 entries in the list, last sector has its first NUL at offset 2
    assert_eq!(finfo.length,2*256 + 2);
    assert_eq!(finfo.sparse_length,finfo.length - 256);
    // the hole reads back as zeroes
    let mut handle = disk.open("SPARSE").expect("open failed");
    let mut buf = vec![0u8;514];
    let n = fs::read_handle(disk.get_img(),&mut handle,&mut buf).expect("read failed");
    assert_eq!(n,514);
    assert_eq!(buf[0],0xc1);
    assert_eq!(&buf[256..512],&[0u8;256]);
    assert_eq!(&buf[512..514],&[0xc1,0xc2]);
}

#[test]
fn suspicious_length_blocks_writes() {
    let mut disk = fresh_dos33();
    let payload = vec![0u8;100];
    disk.create("TRUTH",0x06,0).expect("create failed");
    let mut handle = disk.open("TRUTH").expect("open failed");
    disk.write(&mut handle,&payload,None).expect("write failed");
    disk.close(handle).expect("close failed");
    // corrupt the embedded length so it exceeds the footprint
    {
        let img = disk.get_img();
        let cat = img.read_track_sector(17,15).expect("read failed");
        let tsl = img.read_track_sector(cat[0x0b] as usize,cat[0x0c] as usize).expect("read failed");
        let first_ts = [tsl[0x0c],tsl[0x0d]];
        let mut first = img.read_track_sector(first_ts[0] as usize,first_ts[1] as usize).expect("read failed");
        first[2] = 0xff;
        first[3] = 0x7f;
        img.write_track_sector(first_ts[0] as usize,first_ts[1] as usize,&first).expect("write failed");
    }
    let mut disk = remount(&mut disk);
    let finfo = disk.list_files().iter().find(|f| f.name == "TRUTH").expect("file missing").clone();
    assert_eq!(finfo.quality,fs::Quality::Suspicious);
    assert!(!disk.is_good());
    assert!(disk.create("ANOTHER",0x06,0).is_err());
}

#[test]
fn rename_and_lock() {
    let mut disk = fresh_dos33();
    disk.create("FIRST",0x04,0).expect("create failed");
    disk.rename("FIRST","SECOND").expect("rename failed");
    assert!(disk.open("FIRST").is_err());
    disk.set_info("SECOND",None,None,Some(true)).expect("lock failed");
    assert!(disk.rename("SECOND","THIRD").is_err());
    assert!(disk.delete("SECOND").is_err());
    disk.set_info("SECOND",None,None,Some(false)).expect("unlock failed");
    disk.delete("SECOND").expect("delete failed");
}

#[test]
fn only_one_descriptor_per_file() {
    let mut disk = fresh_dos33();
    disk.create("SOLO",0x04,0).expect("create failed");
    let handle = disk.open("SOLO").expect("open failed");
    assert!(disk.open("SOLO").is_err());
    disk.close(handle).expect("close failed");
    let handle = disk.open("SOLO").expect("reopen failed");
    disk.close(handle).expect("close failed");
}

#[test]
fn prodos_ordered_dos_disk() {
    // the same logical volume stored in ProDOS order must probe as
    // (Dos33, ProDOS order)
    let mut disk = fresh_dos33();
    disk.create("MARKER",0x04,0).expect("create failed");
    let mut po = DiskImg::create_sectors(35,16);
    {
        let img = disk.get_img();
        for t in 0..35 {
            for s in 0..16 {
                let sec = img.read_track_sector_swapped(t,s,SectorOrder::Dos,SectorOrder::Dos).expect("read failed");
                po.write_track_sector_swapped(t,s,&sec,SectorOrder::ProDos,SectorOrder::Dos).expect("write failed");
            }
        }
    }
    let probed = a2img::create_img_from_bytestream(&po.to_bytes(),&OpenOptions::default()).expect("probe failed");
    assert_eq!(probed.fs_format,FsFormat::Dos33);
    assert_eq!(probed.order,SectorOrder::ProDos);
    let disk2 = a2img::fs::mount(probed,InitMode::Full,fs::SubVolumeScan::ContainerOnly).expect("mount failed");
    assert!(disk2.list_files().iter().any(|f| f.name == "MARKER"));
}

#[test]
fn cancelled_write_rolls_back() {
    let mut disk = fresh_dos33();
    let before = disk.usage().actual_free_chunks();
    disk.create("BIGONE",0x06,0).expect("create failed");
    let mut handle = disk.open("BIGONE").expect("open failed");
    let payload = vec![0u8;10*256];
    let mut polls = 0;
    let mut cancel = |_offset: u64| {
        polls += 1;
        polls < 3
    };
    let res = disk.write(&mut handle,&payload,Some(&mut cancel));
    assert!(res.is_err());
    disk.close(handle).expect("close failed");
    // the data sectors were freed again; only the catalog entry and its
    // T/S list remain
    let disk2 = remount(&mut disk);
    assert_eq!(disk2.usage().actual_free_chunks(),before-1);
}
