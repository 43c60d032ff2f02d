//! # CubeMars CLI
//!
//! Command-line interface for CubeMars AK-series motors (servo mode over CAN).
//!
//! ```bash
//! # 配置默认接口
//! cubemars-cli config set --interface socketcan --channel can0 --motor 1
//!
//! # 速度模式运行 3 秒（退出时发送 Rpm 0）
//! cubemars-cli rpm 2000 --duration 3
//!
//! # 两个电机共享一个 SLCAN 适配器
//! cubemars-cli current 1.5 -i slcan -c /dev/ttyACM0 -m 1 -m 2
//!
//! # 监控反馈
//! cubemars-cli monitor --rate 20
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigCommand, DriveCommand, MonitorCommand, OriginCommand};

/// CubeMars CLI - AK 系列电机命令行工具
#[derive(Parser, Debug)]
#[command(name = "cubemars-cli")]
#[command(about = "Command-line interface for CubeMars AK-series motors", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    #[command(flatten)]
    Drive(DriveCommand),

    /// 设置原点
    Origin {
        #[command(flatten)]
        args: OriginCommand,
    },

    /// 监控电机反馈
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cubemars_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Drive(cmd) => cmd.execute(),
        Commands::Origin { args } => args.execute(),
        Commands::Monitor { args } => args.execute(),
    }
}
