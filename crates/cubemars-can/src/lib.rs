//! # CubeMars CAN Adapter Layer
//!
//! CAN 硬件抽象层，提供统一的 CAN 接口抽象。
//!
//! 上层（驱动层）只依赖 [`CanAdapter`] trait：
//! - `send`: 非阻塞发送一帧（29-bit 扩展 ID + ≤8 字节负载）
//! - `try_receive`: 非阻塞接收，没有数据时返回 `Ok(None)`
//! - `close`: 释放底层句柄
//!
//! 适配器通过 [`open_adapter`] 按 `(InterfaceKind, channel, bitrate)` 打开。

use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

// 重新导出 cubemars-protocol 中的 CubeFrame
pub use cubemars_protocol::CubeFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

#[cfg(feature = "slcan")]
pub mod slcan;

#[cfg(feature = "slcan")]
pub use slcan::SlcanAdapter;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBusHandle, MockCanAdapter};

/// 默认 CAN 波特率（1 Mbps）
pub const DEFAULT_BITRATE: u32 = 1_000_000;

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
}

impl CanError {
    /// 是否为不可恢复的设备错误（设备拔出、权限不足等）
    pub fn is_fatal(&self) -> bool {
        match self {
            CanError::Device(e) => e.is_fatal(),
            CanError::BusOff => true,
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidResponse,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NoDevice
                | CanDeviceErrorKind::AccessDenied
                | CanDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// CAN 适配器（传输层协作者）
///
/// 所有方法都必须是非阻塞的：控制循环在单线程内以固定周期
/// 发送和接收，任何阻塞都会推迟看门狗重发。
pub trait CanAdapter {
    /// 非阻塞发送一帧
    fn send(&mut self, frame: CubeFrame) -> Result<(), CanError>;

    /// 非阻塞接收一帧，没有排队数据时返回 `Ok(None)`
    fn try_receive(&mut self) -> Result<Option<CubeFrame>, CanError>;

    /// 释放底层句柄（由控制循环在退出时调用恰好一次）
    fn close(&mut self) {}
}

impl<A: CanAdapter + ?Sized> CanAdapter for Box<A> {
    fn send(&mut self, frame: CubeFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }

    fn try_receive(&mut self) -> Result<Option<CubeFrame>, CanError> {
        (**self).try_receive()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// 可跨线程移动的动态适配器
pub type BoxedAdapter = Box<dyn CanAdapter + Send>;

/// 适配器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InterfaceKind {
    /// Linux 内核 SocketCAN（`can0`、`vcan0` 等）
    SocketCan,
    /// 串口 CAN（Lawicel SLCAN，如 `/dev/ttyACM0`、`COM3`）
    Slcan,
    /// GS-USB 网关（candleLight 固件）
    GsUsb,
    /// 内存总线（测试 / 仿真）
    Mock,
}

impl InterfaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceKind::SocketCan => "socketcan",
            InterfaceKind::Slcan => "slcan",
            InterfaceKind::GsUsb => "gs_usb",
            InterfaceKind::Mock => "mock",
        }
    }
}

impl std::fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceKind {
    type Err = CanDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socketcan" | "can" => Ok(InterfaceKind::SocketCan),
            "slcan" | "serial" => Ok(InterfaceKind::Slcan),
            "gs_usb" | "gsusb" | "gs-usb" => Ok(InterfaceKind::GsUsb),
            "mock" | "virtual" => Ok(InterfaceKind::Mock),
            other => Err(CanDeviceError::new(
                CanDeviceErrorKind::UnsupportedConfig,
                format!("Unknown interface kind '{other}' (expected socketcan, slcan, gs_usb or mock)"),
            )),
        }
    }
}

/// 按 `(interface, channel, bitrate)` 打开适配器
///
/// # 错误
/// - `CanError::Device`: 设备不存在、被占用、权限不足，或该后端未编译进当前构建
/// - `CanError::Io`: 系统调用失败
pub fn open_adapter(
    interface: InterfaceKind,
    channel: &str,
    bitrate: u32,
) -> Result<BoxedAdapter, CanError> {
    debug!("Opening {} adapter on '{}' @ {} bps", interface, channel, bitrate);
    match interface {
        #[cfg(target_os = "linux")]
        InterfaceKind::SocketCan => Ok(Box::new(SocketCanAdapter::new(channel)?)),
        #[cfg(feature = "slcan")]
        InterfaceKind::Slcan => Ok(Box::new(SlcanAdapter::open(channel, bitrate)?)),
        #[cfg(feature = "mock")]
        InterfaceKind::Mock => Ok(Box::new(mock::hub_handle(channel).adapter())),
        other => Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::UnsupportedConfig,
            format!("{other} backend is not available in this build"),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_kind_parse() {
        assert_eq!("socketcan".parse::<InterfaceKind>().unwrap(), InterfaceKind::SocketCan);
        assert_eq!("SLCAN".parse::<InterfaceKind>().unwrap(), InterfaceKind::Slcan);
        assert_eq!("gs_usb".parse::<InterfaceKind>().unwrap(), InterfaceKind::GsUsb);
        assert_eq!("virtual".parse::<InterfaceKind>().unwrap(), InterfaceKind::Mock);

        let err = "pcan".parse::<InterfaceKind>().unwrap_err();
        assert_eq!(err.kind, CanDeviceErrorKind::UnsupportedConfig);
    }

    #[test]
    fn test_interface_kind_display_roundtrip() {
        for kind in [
            InterfaceKind::SocketCan,
            InterfaceKind::Slcan,
            InterfaceKind::GsUsb,
            InterfaceKind::Mock,
        ] {
            assert_eq!(kind.to_string().parse::<InterfaceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_gs_usb_not_available() {
        let err = open_adapter(InterfaceKind::GsUsb, "0", DEFAULT_BITRATE).err().unwrap();
        match err {
            CanError::Device(e) => assert_eq!(e.kind, CanDeviceErrorKind::UnsupportedConfig),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_device_error_fatal() {
        assert!(CanDeviceError::new(CanDeviceErrorKind::NoDevice, "gone").is_fatal());
        assert!(!CanDeviceError::new(CanDeviceErrorKind::Busy, "busy").is_fatal());
        assert!(CanError::BusOff.is_fatal());
        assert!(!CanError::Timeout.is_fatal());
    }
}
