//! 驱动层错误类型定义

use cubemars_can::{CanError, InterfaceKind};
use cubemars_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 打开适配器失败（设备不存在、被占用、权限不足）
    #[error("Failed to open transport: {0}")]
    TransportOpen(#[source] CanError),

    /// 参数越界（电机 ID、原点模式、缩放后溢出），调用点立即失败，不进入控制循环
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[source] ProtocolError),

    /// 帧格式错误（长度、帧类型、ID 不匹配）
    #[error("Protocol error: {0}")]
    Protocol(#[source] ProtocolError),

    /// 还没有收到过该电机的有效反馈帧
    #[error("No feedback received yet from motor {motor_id}")]
    NoFeedbackYet { motor_id: u8 },

    /// 控制循环没有在时限内确认关闭，连接应视为不可复用
    #[error("Control loop did not acknowledge shutdown within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },

    /// 同一条总线上已经有相同 ID 的电机
    #[error("Motor {motor_id} is already attached to {channel}")]
    MotorIdInUse { motor_id: u8, channel: String },

    /// 同一个 (interface, channel) 已按另一个波特率打开
    #[error("{interface}:{channel} is already open at {existing} bps (requested {requested} bps)")]
    BitrateConflict {
        interface: InterfaceKind,
        channel: String,
        existing: u32,
        requested: u32,
    },

    /// 电机句柄已关闭
    #[error("Motor {motor_id} is closed")]
    MotorClosed { motor_id: u8 },

    /// 命令通道已关闭（控制循环退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 命令通道已满
    #[error("Command channel full (capacity: {capacity})")]
    ChannelFull { capacity: usize },

    /// 锁被毒化（线程 panic）
    #[error("Poisoned lock (thread panic)")]
    PoisonedLock,

    /// 控制循环线程错误
    #[error("Control loop thread error: {0}")]
    IoThread(String),

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,
}

impl DriverError {
    /// 是否为参数错误（调用方 bug）
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, DriverError::InvalidArgument(_))
    }
}

impl From<ProtocolError> for DriverError {
    fn from(err: ProtocolError) -> Self {
        if err.is_invalid_argument() {
            DriverError::InvalidArgument(err)
        } else {
            DriverError::Protocol(err)
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DriverError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        DriverError::PoisonedLock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::NoFeedbackYet { motor_id: 3 };
        assert_eq!(err.to_string(), "No feedback received yet from motor 3");

        let err = DriverError::ChannelClosed;
        assert_eq!(err.to_string(), "Command channel closed");

        let err = DriverError::ShutdownTimeout {
            timeout: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("2s"));

        let err = DriverError::BitrateConflict {
            interface: InterfaceKind::Slcan,
            channel: "/dev/ttyACM0".to_string(),
            existing: 1_000_000,
            requested: 500_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("slcan:/dev/ttyACM0") && msg.contains("500000"), "{msg}");
    }

    #[test]
    fn test_from_protocol_error() {
        let protocol_error = ProtocolError::InvalidLength {
            expected: 8,
            actual: 4,
        };
        let driver_error: DriverError = protocol_error.into();
        assert!(!driver_error.is_invalid_argument());
        assert!(matches!(
            driver_error,
            DriverError::Protocol(ProtocolError::InvalidLength { expected: 8, actual: 4 })
        ));

        let driver_error: DriverError = ProtocolError::NotExtended { id: 0x305 }.into();
        assert!(matches!(driver_error, DriverError::Protocol(_)));

        let driver_error: DriverError = ProtocolError::InvalidArgument {
            field: "origin",
            reason: "mode 3".to_string(),
        }
        .into();
        assert!(driver_error.is_invalid_argument());
        assert!(driver_error.to_string().starts_with("Invalid argument"));
    }

    #[test]
    fn test_transport_open_keeps_source() {
        use std::error::Error;

        let err = DriverError::TransportOpen(CanError::NotStarted);
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("Failed to open transport"));
    }

    #[test]
    fn test_from_poison_error() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0));
        let cloned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err: DriverError = lock.lock().unwrap_err().into();
        assert!(matches!(err, DriverError::PoisonedLock));
    }
}
