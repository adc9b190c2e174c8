// test of the nibble layer through the whole stack
use a2img::img::{DiskImg,FsFormat,PhysicalFormat};
use a2img::fs::{dos33,DiskFS};
use a2img::OpenOptions;

#[test]
fn dos_volume_on_nibble_image() {
    // format the GCR surface, then put DOS on it through the codec
    let mut img = DiskImg::create_nibbles(0,254).expect("nibble format failed");
    dos33::Disk::format(&mut img,254,true).expect("DOS format failed");
    let bytes = img.to_bytes();
    assert_eq!(bytes.len(),232960);

    // the pipeline must identify the dialect, the volume, and the file system
    let mut disk = a2img::create_fs_from_bytestream(&bytes,&OpenOptions::default()).expect("open failed");
    let payload: Vec<u8> = (0..600).map(|i| (i%251) as u8).collect();
    disk.create("ONDISK",0x06,0x4000).expect("create failed");
    let mut handle = disk.open("ONDISK").expect("open failed");
    disk.write(&mut handle,&payload,None).expect("write failed");
    disk.close(handle).expect("close failed");

    // remount from the re-encoded nibbles and read it back
    let bytes = disk.get_img().to_bytes();
    let mut disk = a2img::create_fs_from_bytestream(&bytes,&OpenOptions::default()).expect("reopen failed");
    {
        let img = disk.get_img();
        assert!(matches!(img.physical,PhysicalFormat::Nibbles { .. }));
        assert_eq!(img.fs_format,FsFormat::Dos33);
        assert_eq!(img.dos_volume,Some(254));
    }
    let finfo = disk.list_files().iter().find(|f| f.name == "ONDISK").expect("file missing").clone();
    assert_eq!(finfo.length,600);
    assert_eq!(finfo.aux,0x4000);
    let mut handle = disk.open("ONDISK").expect("open failed");
    let mut back = vec![0u8;1000];
    let n = disk.read(&mut handle,&mut back).expect("read failed");
    assert_eq!(n,600);
    assert_eq!(&back[0..600],&payload[0..600]);
    disk.close(handle).expect("close failed");
}

#[test]
fn corrupted_sector_is_unreadable() {
    let mut img = DiskImg::create_nibbles(0,254).expect("nibble format failed");
    let dat = vec![0x5au8;256];
    // physical T=5 S=9 through the raw nibble path
    img.write_track_sector_swapped(5,9,&dat,
        a2img::img::SectorOrder::Physical,a2img::img::SectorOrder::Physical).expect("write failed");
    // smash some disk bytes in that track
    let mut bytes = img.to_bytes();
    for i in 0..6656 {
        bytes[5*6656+i] = 0x00;
    }
    let mut img2 = DiskImg::from_bytes(bytes,false);
    img2.analyze_physical().expect("physical failed");
    assert!(img2.read_track_sector_swapped(5,9,
        a2img::img::SectorOrder::Physical,a2img::img::SectorOrder::Physical).is_err());
    // other tracks still read
    assert!(img2.read_track_sector_swapped(6,1,
        a2img::img::SectorOrder::Physical,a2img::img::SectorOrder::Physical).is_ok());
}
