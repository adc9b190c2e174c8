use std::io::Read;
use a2img::fs::{DiskFS,FilePayload,Quality};
use a2img::{OpenOptions,DYNERR,STDRESULT};

mod cli;

fn quality_tag(q: Quality) -> &'static str {
    match q {
        Quality::Good => "",
        Quality::Suspicious => "?",
        Quality::Damaged => "!"
    }
}

/// print one volume's catalog, descending into partitions
fn catalog(disk: &dyn DiskFS,indent: usize) {
    let pad = "  ".repeat(indent);
    println!("{}{}",pad,disk.volume_id());
    for f in disk.list_files() {
        let lock = match f.locked {
            true => "*",
            false => " "
        };
        println!("{}{}{:02X} {:>7} {}{}",pad,lock,f.prodos_type,f.length,f.name,quality_tag(f.quality));
    }
    for sub in disk.sub_volumes() {
        println!("{}partition '{}' ({}) {} +{}",pad,sub.name,sub.kind,sub.start_block,sub.num_blocks);
        match &sub.fs {
            Some(child) => catalog(child.as_ref(),indent+1),
            None => println!("{}  (file system not identified)",pad)
        }
    }
}

fn open_from_args(matches: &clap::ArgMatches) -> Result<Box<dyn DiskFS>,DYNERR> {
    let path = matches.get_one::<String>("img_path").expect("required arg");
    let mut opts = OpenOptions::default();
    opts.try_ddd = matches.get_flag("ddd");
    a2img::create_fs_from_file(path,&opts)
}

fn read_whole_file(disk: &mut Box<dyn DiskFS>,name: &str) -> Result<Vec<u8>,DYNERR> {
    let mut handle = disk.open(name)?;
    let mut ans: Vec<u8> = Vec::new();
    let mut buf = [0u8;512];
    loop {
        match disk.read(&mut handle,&mut buf)? {
            0 => break,
            n => ans.extend_from_slice(&buf[0..n])
        }
    }
    disk.close(handle)?;
    Ok(ans)
}

fn main() -> STDRESULT {
    env_logger::init();
    let matches = cli::build_cli().get_matches();

    if let Some(cmd) = matches.subcommand_matches("catalog") {
        let disk = open_from_args(cmd)?;
        catalog(disk.as_ref(),0);
        return Ok(());
    }

    if let Some(cmd) = matches.subcommand_matches("stat") {
        let mut disk = open_from_args(cmd)?;
        println!("volume:     {}",disk.volume_id());
        println!("files:      {}",disk.list_files().len());
        println!("free:       {} chunks",disk.usage().actual_free_chunks());
        println!("good:       {}",disk.is_good());
        let img = disk.get_img();
        println!("format:     {}",img.fs_format);
        println!("order:      {}",img.order);
        println!("physical:   {:?}",img.physical);
        if let Some(wrapper) = img.wrapper {
            println!("wrapper:    {}{}",wrapper,match img.wrapper_damaged { true => " (damaged)", false => "" });
        }
        if let Some(vol) = img.dos_volume {
            println!("dos volume: {}",vol);
        }
        for note in img.notes() {
            println!("note:       {}",note.text);
        }
        return Ok(());
    }

    if let Some(cmd) = matches.subcommand_matches("get") {
        let mut disk = open_from_args(cmd)?;
        let name = cmd.get_one::<String>("file").expect("required arg");
        let dat = read_whole_file(&mut disk,name)?;
        // binary files display better starting at their load address
        let start_addr = disk.list_files().iter()
            .find(|f| f.name.to_uppercase() == name.to_uppercase())
            .map(|f| match f.payload {
                FilePayload::Rdos { load_addr, .. } => load_addr,
                _ => f.aux
            })
            .unwrap_or(0);
        match cmd.get_one::<String>("output") {
            Some(out) => std::fs::write(out,&dat)?,
            None => a2img::display_block(start_addr,&dat)
        }
        return Ok(());
    }

    if let Some(cmd) = matches.subcommand_matches("unwrap") {
        let path = cmd.get_one::<String>("img_path").expect("required arg");
        let out = cmd.get_one::<String>("output").expect("required arg");
        let mut raw = Vec::new();
        std::fs::File::open(path)?.read_to_end(&mut raw)?;
        let unwrapped = a2img::wrap::unwrap(&raw,cmd.get_flag("ddd"))?;
        match unwrapped.kind {
            Some(kind) => println!("removed {} wrapper, {} bytes",kind,unwrapped.data.len()),
            None => println!("no wrapper found, copied {} bytes",unwrapped.data.len())
        }
        std::fs::write(out,unwrapped.data)?;
        return Ok(());
    }

    unreachable!("subcommand is required");
}
