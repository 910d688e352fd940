//! wad - 内嵌模块负载工具
//!
//! 将 yEnc 风格转义、DEFLATE 压缩的内嵌 WebAssembly 模块还原为 .wasm 文件,
//! 或只检查负载的各项大小.

mod logging;
mod unpack;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use log::debug;

#[derive(Parser, Debug)]
#[command(name = "wad", version, about = "内嵌 WebAssembly 模块负载工具")]
struct Cli {
    /// 详细输出 (-v: debug, -vv: trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// 日志目录
    #[arg(long = "log-dir", default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 解包负载为模块镜像
    Unpack {
        /// 负载文件
        input: PathBuf,

        /// 输出文件
        #[arg(short, long)]
        output: PathBuf,

        /// 解压后的字节数
        #[arg(short, long)]
        size: usize,

        /// 输入为未转义的原始 DEFLATE 数据
        #[arg(long)]
        raw: bool,

        /// 不检查 WebAssembly 魔数
        #[arg(long = "no-verify")]
        no_verify: bool,
    },
    /// 检查负载
    Info {
        /// 负载文件
        input: PathBuf,

        /// 解压后的字节数
        #[arg(short, long)]
        size: usize,

        /// 输入为未转义的原始 DEFLATE 数据
        #[arg(long)]
        raw: bool,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init("wad-cli", cli.verbose, &cli.log_dir) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    if let Err(e) = run(cli.command) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    debug!("命令: {:?}", command);
    match command {
        Command::Unpack {
            input,
            output,
            size,
            raw,
            no_verify,
        } => {
            let info = unpack::unpack(&input, &output, size, raw, !no_verify)?;
            println!("{} -> {} ({} 字节)", input.display(), output.display(), info.inflated_bytes);
        }
        Command::Info {
            input,
            size,
            raw,
            json,
        } => {
            let info = unpack::inspect(&input, size, raw)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{}", info.summary());
            }
        }
    }
    Ok(())
}
