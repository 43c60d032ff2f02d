//! CubeMars SDK - AK 系列电机 Rust SDK
//!
//! 通过 CAN 总线（伺服模式）控制 CubeMars AK 系列电机：连续命令由后台控制循环
//! 以 100 Hz 重发，满足控制器的看门狗；反馈帧按电机 ID 分发，任意线程无锁读取。
//!
//! # 架构设计
//!
//! - **协议层** (`protocol`): 命令/反馈的编码与解码，无硬件依赖
//! - **CAN 层** (`can`): 适配器抽象，支持 SocketCAN、SLCAN 和内存 Mock
//! - **驱动层** (`driver`): 连接注册表、控制循环、线程安全的 [`Motor`] 句柄
//!
//! # 快速开始
//!
//! ```no_run
//! use cubemars_sdk::prelude::*;
//! use std::time::Duration;
//!
//! cubemars_sdk::init_logger();
//!
//! let config = BusConfig::new(InterfaceKind::SocketCan, "can0");
//! let motor = Motor::connect(&config, 1)?;
//! motor.set_rpm(2000.0)?;
//! std::thread::sleep(Duration::from_secs(2));
//! motor.close()?;
//! # Ok::<(), DriverError>(())
//! ```

pub mod prelude;

pub use cubemars_can as can;
pub use cubemars_driver as driver;
pub use cubemars_protocol as protocol;

pub use can::{CanAdapter, CanError, CubeFrame, InterfaceKind};
pub use driver::{Bus, BusConfig, BusRegistry, ContinuousPolicy, DriverError, LoopConfig, Motor};
pub use protocol::{Command, CommandKind, FeedbackFrame, OriginMode, ProtocolError};

use std::sync::Once;

static LOGGER: Once = Once::new();

/// 初始化日志
///
/// 安装 `tracing-subscriber` 的 fmt 输出（`RUST_LOG` 控制级别，默认 `info`），
/// 并把 `log` 记录桥接到 `tracing`。重复调用是空操作；
/// 如果进程中已经安装了其他全局 subscriber，则保留原有的。
pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = tracing_log::LogTracer::init();

        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
