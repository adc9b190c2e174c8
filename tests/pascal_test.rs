// test of pascal file system module
use a2img::img::{DiskImg,FsFormat};
use a2img::fs::{pascal,DiskFS,FilePayload};
use a2img::OpenOptions;

fn fresh_pascal(blocks: usize) -> Box<dyn DiskFS> {
    let mut img = DiskImg::create_blocks(blocks);
    pascal::Disk::format(&mut img,"WORK",None).expect("failed to format");
    Box::new(pascal::Disk::mount(img).expect("failed to mount"))
}

fn start_of(disk: &Box<dyn DiskFS>,name: &str) -> usize {
    match disk.list_files().iter().find(|f| f.name == name).expect("file missing").payload {
        FilePayload::Pascal { start_block, .. } => start_block as usize,
        _ => panic!("wrong payload")
    }
}

fn put_file(disk: &mut Box<dyn DiskFS>,name: &str,blocks: usize) {
    disk.create(name,0x05,0).expect("create failed");
    let mut handle = disk.open(name).expect("open failed");
    let payload = vec![0x50u8;blocks*512 - 10];
    disk.write(&mut handle,&payload,None).expect("write failed");
    disk.close(handle).expect("close failed");
}

#[test]
fn format() {
    let mut disk = fresh_pascal(280);
    assert_eq!(disk.volume_id(),"WORK:");
    assert!(disk.is_good());
    // boot blocks plus four directory blocks are spoken for
    assert_eq!(disk.usage().actual_free_chunks(),280-6);
    let bytes = disk.get_img().to_bytes();
    let probed = a2img::create_img_from_bytestream(&bytes,&OpenOptions::default()).expect("probe failed");
    assert_eq!(probed.fs_format,FsFormat::Pascal);
}

#[test]
fn write_and_read_back() {
    let mut disk = fresh_pascal(280);
    let payload: Vec<u8> = (0..1400).map(|i| (i%251) as u8).collect();
    disk.create("DATA.TEXT",0x03,0).expect("create failed");
    let mut handle = disk.open("DATA.TEXT").expect("open failed");
    disk.write(&mut handle,&payload,None).expect("write failed");
    disk.close(handle).expect("close failed");

    let bytes = disk.get_img().to_bytes();
    let mut disk = a2img::create_fs_from_bytestream(&bytes,&OpenOptions::default()).expect("remount failed");
    let finfo = disk.list_files().iter().find(|f| f.name == "DATA.TEXT").expect("file missing").clone();
    // 1400 = 2 full blocks + 376 in the last
    assert_eq!(finfo.length,1400);
    assert_eq!(finfo.sectors,3);
    assert!(finfo.mod_date.is_some());
    let mut handle = disk.open("DATA.TEXT").expect("open failed");
    let mut back = vec![0u8;2000];
    let n = disk.read(&mut handle,&mut back).expect("read failed");
    assert_eq!(n,1400);
    assert_eq!(&back[0..1400],&payload[0..1400]);
    disk.close(handle).expect("close failed");
}

#[test]
fn create_lands_in_largest_gap() {
    // volume of 100 blocks, directory ends at 6
    let mut disk = fresh_pascal(100);
    put_file(&mut disk,"AAA",14);       // 6..20
    put_file(&mut disk,"BBB",5);        // 20..25
    put_file(&mut disk,"CCC",25);       // 25..50
    put_file(&mut disk,"DDD",50);       // 50..100
    assert_eq!(start_of(&disk,"AAA"),6);
    assert_eq!(start_of(&disk,"BBB"),20);
    assert_eq!(start_of(&disk,"CCC"),25);
    assert_eq!(start_of(&disk,"DDD"),50);
    // dropping the middle file leaves 25..50 as the only (largest) gap
    disk.delete("CCC").expect("delete failed");
    disk.create("EEE",0x05,0).expect("create failed");
    assert_eq!(start_of(&disk,"EEE"),25);
    // contiguity: every entry starts at or after its predecessor's end
    let mut prev_next = 6;
    for f in disk.list_files() {
        if let FilePayload::Pascal { start_block, next_block, .. } = f.payload {
            assert!(start_block as usize >= prev_next);
            assert!(next_block > start_block);
            prev_next = next_block as usize;
        }
    }
}

#[test]
fn gap_overflow_is_refused() {
    let mut disk = fresh_pascal(100);
    put_file(&mut disk,"AAA",14);       // 6..20
    put_file(&mut disk,"BBB",76);       // 20..96
    // largest remaining gap is 96..100, four blocks
    disk.create("TAIL",0x05,0).expect("create failed");
    assert_eq!(start_of(&disk,"TAIL"),96);
    let mut handle = disk.open("TAIL").expect("open failed");
    let too_big = vec![0u8;5*512];
    assert!(disk.write(&mut handle,&too_big,None).is_err());
    // a fit succeeds
    let fits = vec![0u8;4*512];
    disk.write(&mut handle,&fits,None).expect("write failed");
    disk.close(handle).expect("close failed");
}

#[test]
fn directory_fills_up() {
    let mut disk = fresh_pascal(280);
    // 4 blocks of 26-byte entries hold 78, one of which is the header
    for i in 0..77 {
        disk.create(&format!("F{}",i),0x05,0).expect("create failed");
    }
    assert!(disk.create("ONEMORE",0x05,0).is_err());
}

#[test]
fn rename_file_and_volume() {
    let mut disk = fresh_pascal(280);
    disk.create("OLD",0x05,0).expect("create failed");
    disk.rename("OLD","NEW.DATA").expect("rename failed");
    assert!(disk.open("OLD").is_err());
    assert!(disk.rename("NEW.DATA","BAD NAME").is_err());
    disk.rename_volume("MINE").expect("rename volume failed");
    assert_eq!(disk.volume_id(),"MINE:");
    assert!(disk.rename_volume("WAYTOOLONG").is_err());
}
