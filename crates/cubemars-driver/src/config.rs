//! 连接与控制循环配置

use crate::policy::ContinuousPolicy;
use cubemars_can::{DEFAULT_BITRATE, InterfaceKind};
use std::time::Duration;

/// 控制循环配置
///
/// # Example
///
/// ```
/// use cubemars_driver::LoopConfig;
/// use std::time::Duration;
///
/// // 默认配置（10ms 周期，即 100Hz，关闭等待 2s）
/// let config = LoopConfig::default();
/// assert_eq!(config.tick_period, Duration::from_millis(10));
///
/// // 自定义配置
/// let config = LoopConfig {
///     tick_period: Duration::from_millis(5),
///     ..LoopConfig::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// 重发周期（控制器看门狗容忍度约为 100Hz）
    pub tick_period: Duration,
    /// `close()` 等待控制循环确认的上限
    pub close_timeout: Duration,
    /// 每个周期最多处理的接收帧数（防止总线洪泛饿死发送）
    pub max_rx_per_tick: usize,
    /// 命令通道容量
    pub command_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(10),
            close_timeout: Duration::from_secs(2),
            max_rx_per_tick: 256,
            command_capacity: 256,
        }
    }
}

/// 连接注册表的键
///
/// 波特率不参与比较：同一个物理通道只能以一个波特率打开。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusKey {
    pub interface: InterfaceKind,
    pub channel: String,
}

impl std::fmt::Display for BusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.interface, self.channel)
    }
}

/// 总线连接配置
///
/// ```
/// use cubemars_can::InterfaceKind;
/// use cubemars_driver::{BusConfig, ContinuousPolicy};
///
/// let config = BusConfig::new(InterfaceKind::Slcan, "/dev/ttyACM0")
///     .bitrate(500_000)
///     .policy(ContinuousPolicy::with_position());
/// assert_eq!(config.bitrate, 500_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub interface: InterfaceKind,
    pub channel: String,
    pub bitrate: u32,
    pub loop_config: LoopConfig,
    pub policy: ContinuousPolicy,
}

impl BusConfig {
    /// 创建配置（默认 1Mbps、默认循环配置、默认重发策略）
    pub fn new(interface: InterfaceKind, channel: impl Into<String>) -> Self {
        Self {
            interface,
            channel: channel.into(),
            bitrate: DEFAULT_BITRATE,
            loop_config: LoopConfig::default(),
            policy: ContinuousPolicy::default(),
        }
    }

    /// 设置波特率
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// 设置控制循环配置
    pub fn loop_config(mut self, loop_config: LoopConfig) -> Self {
        self.loop_config = loop_config;
        self
    }

    /// 设置重发周期
    pub fn tick_period(mut self, period: Duration) -> Self {
        self.loop_config.tick_period = period;
        self
    }

    /// 设置连续重发策略
    pub fn policy(mut self, policy: ContinuousPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn key(&self) -> BusKey {
        BusKey {
            interface: self.interface,
            channel: self.channel.clone(),
        }
    }
}
