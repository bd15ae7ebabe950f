mod cli;

use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use flash_dev::FlashDevice;
use flash_fs::FlashFileSystem;
use flash_fs_fuse::{geometry, FlashFile};
use vfs::OpenFlag;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nout={:?}", cli.source, cli.out_dir);

    let geo = geometry(cli.groups, cli.group_blocks);
    let dev: Arc<dyn FlashDevice> =
        Arc::new(FlashFile::create(cli.out_dir.join("flash.img"), geo)?);
    FlashFileSystem::format(&dev).expect("formatting failed");
    let fs = FlashFileSystem::mount(&dev).expect("mounting failed");

    for entry in std::fs::read_dir(&cli.source)? {
        let entry = entry?;
        let name = entry
            .file_name()
            .into_string()
            .expect("non-UTF-8 file name");
        let data = std::fs::read(entry.path())?;
        println!("packing: {name:?} ({} bytes)", data.len());

        let mut file = FlashFileSystem::open_file(
            &fs,
            &name,
            OpenFlag::Write | OpenFlag::Create | OpenFlag::Truncate,
        )
        .expect("creating file failed");
        file.write_at(0, &data).expect("writing file failed");
        file.close().expect("committing file failed");
    }

    Ok(())
}
