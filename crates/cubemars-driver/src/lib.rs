//! 驱动层模块
//!
//! 本模块提供 CubeMars AK 系列电机的连接管理与命令重发，包括：
//! - 连接注册表（同一 CAN 通道上的多个电机共享一个适配器，引用计数）
//! - 控制循环线程（100 Hz 重发连续命令，分发反馈帧）
//! - 状态同步（ArcSwap 无锁读取）
//! - 线程安全的电机句柄 [`Motor`]
//!
//! # 线程模型
//!
//! 每条连接只有一个控制循环线程拥有适配器；调用方线程通过有界收件箱投递命令，
//! 通过 `ArcSwap` 快照读取反馈，从不直接访问适配器。

mod command;
pub mod config;
mod connection;
mod control_loop;
mod error;
pub mod metrics;
mod motor;
pub mod policy;
pub mod state;

pub use config::{BusConfig, BusKey, LoopConfig};
pub use connection::{Bus, BusRegistry};
pub use error::DriverError;
pub use metrics::{LoopMetrics, MetricsSnapshot};
pub use motor::Motor;
pub use policy::ContinuousPolicy;
pub use state::{ActiveCommand, FeedbackSnapshot, MotorState, TransportFault};
