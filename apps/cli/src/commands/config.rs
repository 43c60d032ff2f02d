//! 配置管理命令
//!
//! 配置文件保存默认的接口、通道、波特率和电机 ID，命令行参数优先于配置文件。

use anyhow::{Context, Result};
use clap::Subcommand;
use cubemars_sdk::InterfaceKind;
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件路径
fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;

    path.push("cubemars");
    Ok(path)
}

pub fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 默认接口类型（socketcan / slcan / mock）
    pub interface: Option<String>,

    /// 默认通道（如 can0, /dev/ttyACM0）
    pub channel: Option<String>,

    /// 默认波特率
    pub bitrate: Option<u32>,

    /// 默认电机 ID
    pub motor_id: Option<u8>,

    /// 位置类命令是否按周期重发
    pub continuous_position: Option<bool>,
}

impl CliConfig {
    /// 加载配置（文件不存在时返回默认配置）
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("读取配置文件失败")?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 保存配置
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }

        let body = toml::to_string_pretty(self).context("序列化配置失败")?;
        let content = format!("# CubeMars CLI Configuration\n\n{body}");
        fs::write(path, content).context("写入配置文件失败")?;

        Ok(())
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 接口类型（socketcan, slcan, mock）
        #[arg(short, long)]
        interface: Option<InterfaceKind>,

        /// 通道名称（如 can0, /dev/ttyACM0）
        #[arg(short, long)]
        channel: Option<String>,

        /// 波特率（bps）
        #[arg(short, long)]
        bitrate: Option<u32>,

        /// 默认电机 ID
        #[arg(short, long)]
        motor: Option<u8>,

        /// 位置类命令是否按周期重发
        #[arg(long)]
        continuous_position: Option<bool>,
    },

    /// 显示当前配置
    Show,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Set {
                interface,
                channel,
                bitrate,
                motor,
                continuous_position,
            } => {
                let mut config = CliConfig::load()?;
                config.apply(interface, channel, bitrate, motor, continuous_position);
                config.save()?;
                println!("✅ 配置已保存: {}", config_file()?.display());
                Ok(())
            },

            ConfigCommand::Show => {
                let config = CliConfig::load()?;
                println!("配置文件: {}", config_file()?.display());
                print_config(&config);
                Ok(())
            },
        }
    }
}

impl CliConfig {
    fn apply(
        &mut self,
        interface: Option<InterfaceKind>,
        channel: Option<String>,
        bitrate: Option<u32>,
        motor: Option<u8>,
        continuous_position: Option<bool>,
    ) {
        if let Some(interface) = interface {
            println!("✅ 设置默认接口: {}", interface);
            self.interface = Some(interface.to_string());
        }
        if let Some(channel) = channel {
            println!("✅ 设置默认通道: {}", channel);
            self.channel = Some(channel);
        }
        if let Some(bitrate) = bitrate {
            println!("✅ 设置默认波特率: {}", bitrate);
            self.bitrate = Some(bitrate);
        }
        if let Some(motor) = motor {
            println!("✅ 设置默认电机 ID: {}", motor);
            self.motor_id = Some(motor);
        }
        if let Some(continuous) = continuous_position {
            println!("✅ 位置命令重发: {}", continuous);
            self.continuous_position = Some(continuous);
        }
    }
}

fn print_config(config: &CliConfig) {
    println!("  接口: {}", config.interface.as_deref().unwrap_or("(未设置)"));
    println!("  通道: {}", config.channel.as_deref().unwrap_or("(未设置)"));
    match config.bitrate {
        Some(bitrate) => println!("  波特率: {}", bitrate),
        None => println!("  波特率: (未设置)"),
    }
    match config.motor_id {
        Some(id) => println!("  电机 ID: {}", id),
        None => println!("  电机 ID: (未设置)"),
    }
    println!(
        "  位置命令重发: {}",
        config.continuous_position.unwrap_or(false)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        config.apply(
            Some(InterfaceKind::Slcan),
            Some("/dev/ttyACM0".to_string()),
            Some(500_000),
            Some(3),
            Some(true),
        );
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.interface.as_deref(), Some("slcan"));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "channel = \"can1\"\n").unwrap();

        let config = CliConfig::load_from(&path).unwrap();
        assert_eq!(config.channel.as_deref(), Some("can1"));
        assert!(config.interface.is_none());
        assert!(config.bitrate.is_none());
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bitrate = \"fast\"\n").unwrap();

        assert!(CliConfig::load_from(&path).is_err());
    }
}
