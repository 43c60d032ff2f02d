//! 命令定义和实现

pub mod config;
pub mod drive;
pub mod monitor;

pub use config::ConfigCommand;
pub use drive::{DriveCommand, OriginCommand};
pub use monitor::MonitorCommand;

use anyhow::{Context, Result};
use clap::Args;
use config::CliConfig;
use cubemars_sdk::can::DEFAULT_BITRATE;
use cubemars_sdk::prelude::*;

/// 连接参数（覆盖配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// 接口类型（socketcan, slcan, mock；gs_usb 尚无后端）
    #[arg(short, long)]
    pub interface: Option<InterfaceKind>,

    /// 通道名称（如 can0, /dev/ttyACM0）
    #[arg(short, long)]
    pub channel: Option<String>,

    /// 波特率（bps）
    #[arg(short, long)]
    pub bitrate: Option<u32>,

    /// 电机 ID，可重复指定多个电机（共享同一连接）
    #[arg(short, long = "motor", value_name = "ID")]
    pub motors: Vec<u32>,

    /// 位置类命令按周期重发
    #[arg(long)]
    pub continuous_position: bool,
}

/// 合并命令行与配置文件后的连接设置
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub interface: InterfaceKind,
    pub channel: String,
    pub bitrate: u32,
    pub motors: Vec<u32>,
    pub continuous_position: bool,
}

impl ConnectArgs {
    pub fn resolve(&self, config: &CliConfig) -> Result<Settings> {
        let interface = match self.interface {
            Some(interface) => interface,
            None => match config.interface.as_deref() {
                Some(name) => name
                    .parse()
                    .with_context(|| format!("配置文件中的接口类型无效: {name}"))?,
                None => InterfaceKind::SocketCan,
            },
        };

        let motors = if self.motors.is_empty() {
            vec![u32::from(config.motor_id.unwrap_or(1))]
        } else {
            self.motors.clone()
        };

        Ok(Settings {
            interface,
            channel: self
                .channel
                .clone()
                .or_else(|| config.channel.clone())
                .unwrap_or_else(|| "can0".to_string()),
            bitrate: self.bitrate.or(config.bitrate).unwrap_or(DEFAULT_BITRATE),
            motors,
            continuous_position: self.continuous_position
                || config.continuous_position.unwrap_or(false),
        })
    }
}

impl Settings {
    pub fn bus_config(&self) -> BusConfig {
        let policy = if self.continuous_position {
            ContinuousPolicy::with_position()
        } else {
            ContinuousPolicy::default()
        };
        BusConfig::new(self.interface, self.channel.clone())
            .bitrate(self.bitrate)
            .policy(policy)
    }

    /// 打开连接并注册所有电机
    pub fn connect(&self) -> Result<Vec<Motor>> {
        println!(
            "🔌 连接到 {} {} @ {} bps...",
            self.interface, self.channel, self.bitrate
        );
        let bus = Bus::open(&self.bus_config())
            .with_context(|| format!("打开 {} 通道 {} 失败", self.interface, self.channel))?;

        let motors = self
            .motors
            .iter()
            .map(|&id| bus.motor(id).with_context(|| format!("注册电机 {id} 失败")))
            .collect::<Result<Vec<_>>>()?;
        bus.close()?;

        println!("✅ 已连接 {} 个电机", motors.len());
        Ok(motors)
    }
}

/// 依次关闭所有电机，返回第一个错误
pub fn close_all(motors: &[Motor]) -> Result<()> {
    let mut first_error = None;
    for motor in motors {
        if let Err(e) = motor.close() {
            tracing::warn!("motor {} close failed: {}", motor.id(), e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e).context("关闭电机失败"),
        None => Ok(()),
    }
}
