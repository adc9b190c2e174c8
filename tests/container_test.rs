// test of the partitioned-container file systems
use a2img::img::{DiskImg,FsFormat};
use a2img::fs::{self,pascal,DiskFS,InitMode,SubVolumeScan};
use a2img::OpenOptions;

fn be16(v: u16) -> [u8;2] { v.to_be_bytes() }
fn be32(v: u32) -> [u8;4] { v.to_be_bytes() }

/// A Mac-style drive with two partitions; the second holds a live Pascal
/// volume, the first is unformatted and should come back as a placeholder.
fn build_macpart_disk() -> Vec<u8> {
    let mut img = DiskImg::create_blocks(4096);
    // driver descriptor record
    let mut ddr = vec![0u8;512];
    ddr[0..2].copy_from_slice(&be16(0x4552));           // 'ER'
    ddr[2..4].copy_from_slice(&be16(512));
    ddr[4..8].copy_from_slice(&be32(4096));
    img.write_block(0,&ddr).expect("write failed");
    // two partition map entries
    for (block,start,count,name,kind) in [
        (1usize,8u32,1600u32,"Scratch","Apple_Scratch"),
        (2,1608,280,"Work","Apple_PRODOS")
    ] {
        let mut pm = vec![0u8;512];
        pm[0..2].copy_from_slice(&be16(0x504d));        // 'PM'
        pm[4..8].copy_from_slice(&be32(2));             // map block count
        pm[8..12].copy_from_slice(&be32(start));
        pm[12..16].copy_from_slice(&be32(count));
        pm[0x10..0x10+name.len()].copy_from_slice(name.as_bytes());
        pm[0x30..0x30+kind.len()].copy_from_slice(kind.as_bytes());
        img.write_block(block,&pm).expect("write failed");
    }
    // drop a Pascal volume into the second partition through a shared view
    let mut sub = img.sub_image(1608,280).expect("sub failed");
    pascal::Disk::format(&mut sub,"INSIDE",None).expect("format failed");
    img.to_bytes()
}

#[test]
fn macpart_recursion() {
    let bytes = build_macpart_disk();
    let probed = a2img::create_img_from_bytestream(&bytes,&OpenOptions::default()).expect("probe failed");
    assert_eq!(probed.fs_format,FsFormat::MacPart);
    let disk = fs::mount(probed,InitMode::Full,SubVolumeScan::Enabled).expect("mount failed");
    let subs = disk.sub_volumes();
    assert_eq!(subs.len(),2);
    // the scratch partition is visible but unidentified
    assert_eq!(subs[0].name,"Scratch");
    assert!(subs[0].fs.is_none());
    // the Pascal partition mounted recursively
    assert_eq!(subs[1].name,"Work");
    assert_eq!(subs[1].num_blocks,280);
    let child = subs[1].fs.as_ref().expect("child fs missing");
    assert_eq!(child.volume_id(),"INSIDE:");
}

#[test]
fn macpart_scan_disabled() {
    let bytes = build_macpart_disk();
    let disk = a2img::create_fs_from_bytestream(&bytes,&OpenOptions {
        scan: SubVolumeScan::Disabled,
        ..Default::default()
    }).expect("open failed");
    // partitions are listed but none are mounted
    assert_eq!(disk.sub_volumes().len(),2);
    assert!(disk.sub_volumes().iter().all(|s| s.fs.is_none()));
}

#[test]
fn macpart_oversize_partition_clipped() {
    let mut img = DiskImg::create_blocks(4096);
    let mut ddr = vec![0u8;512];
    ddr[0..2].copy_from_slice(&be16(0x4552));
    ddr[2..4].copy_from_slice(&be16(512));
    ddr[4..8].copy_from_slice(&be32(4096));
    img.write_block(0,&ddr).expect("write failed");
    let mut pm = vec![0u8;512];
    pm[0..2].copy_from_slice(&be16(0x504d));
    pm[4..8].copy_from_slice(&be32(1));
    pm[8..12].copy_from_slice(&be32(4000));
    pm[12..16].copy_from_slice(&be32(500));             // runs past the end
    pm[0x10..0x13].copy_from_slice(b"Big");
    img.write_block(1,&pm).expect("write failed");
    let mut disk = a2img::create_fs_from_bytestream(&img.to_bytes(),&OpenOptions::default()).expect("open failed");
    assert_eq!(disk.sub_volumes()[0].num_blocks,96);
    assert!(disk.get_img().notes().iter().any(|n| n.text.contains("reduced partition")));
}

/// A FocusDrive with one Pascal partition and names in blocks 1-2.
fn build_focus_disk() -> Vec<u8> {
    let mut img = DiskImg::create_blocks(4096);
    let mut map = vec![0u8;512];
    map[0..14].copy_from_slice(b"Parsons Engin.");
    map[0x0f] = 1;
    let entry = &mut map[0x20..0x30];
    entry[0..4].copy_from_slice(&500u32.to_le_bytes());
    entry[4..8].copy_from_slice(&280u32.to_le_bytes());
    img.write_block(0,&map).expect("write failed");
    let mut names = vec![0u8;512];
    names[32..32+6].copy_from_slice(b"GAMES1");
    img.write_block(1,&names).expect("write failed");
    img.write_block(2,&vec![0u8;512]).expect("write failed");
    let mut sub = img.sub_image(500,280).expect("sub failed");
    pascal::Disk::format(&mut sub,"GAMES",None).expect("format failed");
    img.to_bytes()
}

#[test]
fn focusdrive_recursion() {
    let bytes = build_focus_disk();
    let probed = a2img::create_img_from_bytestream(&bytes,&OpenOptions::default()).expect("probe failed");
    assert_eq!(probed.fs_format,FsFormat::FocusDrive);
    let disk = fs::mount(probed,InitMode::Full,SubVolumeScan::Enabled).expect("mount failed");
    let subs = disk.sub_volumes();
    assert_eq!(subs.len(),1);
    assert_eq!(subs[0].name,"GAMES1");
    assert_eq!(subs[0].start_block,500);
    let child = subs[0].fs.as_ref().expect("child fs missing");
    assert_eq!(child.fs_format(),FsFormat::Pascal);
    assert_eq!(child.volume_id(),"GAMES:");
}

#[test]
fn nested_containers_hit_the_depth_limit() {
    // a MacPart whose partition is itself a MacPart, and so on; the inner
    // recursion must stop rather than chase its own tail
    let mut img = DiskImg::create_blocks(8192);
    fn write_map(img: &mut DiskImg,inner_start: u32,inner_count: u32) {
        let mut ddr = vec![0u8;512];
        ddr[0..2].copy_from_slice(&0x4552u16.to_be_bytes());
        ddr[2..4].copy_from_slice(&512u16.to_be_bytes());
        ddr[4..8].copy_from_slice(&8192u32.to_be_bytes());
        img.write_block(0,&ddr).expect("write failed");
        let mut pm = vec![0u8;512];
        pm[0..2].copy_from_slice(&0x504du16.to_be_bytes());
        pm[4..8].copy_from_slice(&1u32.to_be_bytes());
        pm[8..12].copy_from_slice(&inner_start.to_be_bytes());
        pm[12..16].copy_from_slice(&inner_count.to_be_bytes());
        pm[0x10..0x15].copy_from_slice(b"Inner");
        img.write_block(1,&pm).expect("write failed");
    }
    write_map(&mut img,16,4096);
    let mut level1 = img.sub_image(16,4096).expect("sub failed");
    write_map(&mut level1,16,2048);
    let mut level2 = level1.sub_image(16,2048).expect("sub failed");
    write_map(&mut level2,16,2048);
    // opening must terminate; how many levels mount is bounded by the
    // nesting cap, and the deepest one is a placeholder
    let disk = a2img::create_fs_from_bytestream(&img.to_bytes(),&OpenOptions {
        scan: SubVolumeScan::Enabled,
        ..Default::default()
    }).expect("open failed");
    let mut depth = 0;
    let mut cursor: &dyn DiskFS = disk.as_ref();
    loop {
        let subs = cursor.sub_volumes();
        if subs.is_empty() || subs[0].fs.is_none() {
            break;
        }
        cursor = subs[0].fs.as_ref().unwrap().as_ref();
        depth += 1;
    }
    assert!(depth >= 1 && depth < 4);
}
