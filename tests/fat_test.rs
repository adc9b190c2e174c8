// test of FAT identification
use a2img::img::{DiskImg,FsFormat};
use a2img::fs::DiskFS;
use a2img::OpenOptions;

#[test]
fn bios_parameter_block() {
    let mut img = DiskImg::create_blocks(2880);
    let mut boot = vec![0u8;512];
    boot[0] = 0xeb; boot[1] = 0x3c; boot[2] = 0x90;
    boot[3..11].copy_from_slice(b"MSDOS5.0");
    boot[0x0b..0x0d].copy_from_slice(&512u16.to_le_bytes());
    boot[0x0d] = 2;                                     // sectors per cluster
    boot[0x13..0x15].copy_from_slice(&2880u16.to_le_bytes());
    boot[0x2b..0x36].copy_from_slice(b"FUBAR      ");
    boot[0x1fe] = 0x55; boot[0x1ff] = 0xaa;
    img.write_block(0,&boot).expect("write failed");
    let mut disk = a2img::create_fs_from_bytestream(&img.to_bytes(),&OpenOptions::default()).expect("open failed");
    assert_eq!(disk.get_img().fs_format,FsFormat::Fat);
    assert_eq!(disk.volume_id(),"FUBAR");
    // identification only: one descriptive pseudo-file, no access
    assert_eq!(disk.list_files().len(),1);
    assert!(disk.list_files()[0].name.contains("MS-DOS volume"));
    assert!(disk.open("anything").is_err());
}

#[test]
fn master_boot_record() {
    let mut img = DiskImg::create_blocks(4096);
    let mut boot = vec![0u8;512];
    boot[0] = 0xfa;
    // one active partition at LBA 63
    let entry = &mut boot[0x1be..0x1ce];
    entry[0] = 0x80;
    entry[4] = 0x06;    // FAT16
    entry[8..12].copy_from_slice(&63u32.to_le_bytes());
    entry[12..16].copy_from_slice(&4000u32.to_le_bytes());
    boot[0x1fe] = 0x55; boot[0x1ff] = 0xaa;
    img.write_block(0,&boot).expect("write failed");
    let mut disk = a2img::create_fs_from_bytestream(&img.to_bytes(),&OpenOptions::default()).expect("open failed");
    assert_eq!(disk.get_img().fs_format,FsFormat::Fat);
    assert!(disk.list_files()[0].name.contains("partitioned"));
}

#[test]
fn missing_signature_is_not_fat() {
    let mut img = DiskImg::create_blocks(2880);
    let mut boot = vec![0u8;512];
    boot[0] = 0xeb;
    boot[0x0b..0x0d].copy_from_slice(&512u16.to_le_bytes());
    // no AA55 trailer
    img.write_block(0,&boot).expect("write failed");
    assert!(a2img::create_fs_from_bytestream(&img.to_bytes(),&OpenOptions::default()).is_err());
}
