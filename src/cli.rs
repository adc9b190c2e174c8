use clap::{arg,crate_version,Arg,ArgAction,Command};

const IMG_HELP: &str = "path to disk image (dsk, do, po, d13, nib, optionally gzip/zip wrapped)";

pub fn build_cli() -> Command {
    Command::new("a2img")
        .about("Apple II disk image tool, by itself or in a pipeline")
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("catalog")
            .arg(arg!(<img_path> ).help(IMG_HELP))
            .arg(Arg::new("ddd").long("ddd").action(ArgAction::SetTrue)
                .help("assert the image is DDD compressed"))
            .visible_alias("cat")
            .about("list the files on a disk image"))
        .subcommand(Command::new("stat")
            .arg(arg!(<img_path> ).help(IMG_HELP))
            .arg(Arg::new("ddd").long("ddd").action(ArgAction::SetTrue)
                .help("assert the image is DDD compressed"))
            .about("show geometry, file system, and usage of a disk image"))
        .subcommand(Command::new("get")
            .arg(arg!(<img_path> ).help(IMG_HELP))
            .arg(arg!(-f --file <name> "file to extract").required(true))
            .arg(arg!(-o --output <path> "host file to write, hex dump to console if omitted").required(false))
            .arg(Arg::new("ddd").long("ddd").action(ArgAction::SetTrue)
                .help("assert the image is DDD compressed"))
            .about("extract a file from a disk image"))
        .subcommand(Command::new("unwrap")
            .arg(arg!(<img_path> ).help(IMG_HELP))
            .arg(arg!(-o --output <path> "host file for the raw image").required(true))
            .arg(Arg::new("ddd").long("ddd").action(ArgAction::SetTrue)
                .help("assert the image is DDD compressed"))
            .about("strip the outer wrapper and save the raw image"))
}
