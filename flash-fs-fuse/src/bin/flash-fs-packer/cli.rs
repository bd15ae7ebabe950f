use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// 要打包进镜像的文件所在目录
    #[arg(long, short)]
    pub source: PathBuf,

    /// 镜像输出目录
    #[arg(long, short = 'O')]
    pub out_dir: PathBuf,

    /// 擦除组个数
    #[arg(long, default_value_t = 32)]
    pub groups: usize,

    /// 每个擦除组的块数
    #[arg(long, default_value_t = 32)]
    pub group_blocks: usize,
}
