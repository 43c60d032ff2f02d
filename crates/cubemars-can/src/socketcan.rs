//! SocketCAN CAN 适配器实现
//!
//! Linux 内核 SocketCAN 接口（`can0`、`vcan0`）。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **接口配置**：波特率由系统工具配置，不在应用层设置：
//!   `sudo ip link set can0 type can bitrate 1000000 && sudo ip link set up can0`
//! - socket 以非阻塞模式打开，`try_receive` 在没有数据时立即返回

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, CubeFrame};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};
use std::io::ErrorKind;
use tracing::{trace, warn};

/// SocketCAN 适配器
///
/// ```no_run
/// use cubemars_can::{CanAdapter, CubeFrame, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap();
/// adapter.send(CubeFrame::new_extended(0x305, &[0, 0, 1, 0xF4])).unwrap();
/// let _ = adapter.try_receive().unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: Option<CanSocket>,
    interface: String,
}

impl SocketCanAdapter {
    /// 打开 SocketCAN 接口
    ///
    /// # 错误
    /// - `CanError::Device`: 接口不存在或无法打开（会提示启动命令）
    /// - `CanError::Io`: 无法切换为非阻塞模式
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        let socket = CanSocket::open(&interface).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound => CanDeviceErrorKind::NotFound,
                ErrorKind::PermissionDenied => CanDeviceErrorKind::AccessDenied,
                _ => CanDeviceErrorKind::Backend,
            };
            CanError::Device(CanDeviceError::new(
                kind,
                format!(
                    "Failed to open CAN interface '{interface}': {e}. Is it up?\n  sudo ip link set up {interface}"
                ),
            ))
        })?;
        socket.set_nonblocking(true)?;

        trace!("SocketCAN interface '{}' opened (non-blocking)", interface);
        Ok(Self {
            socket: Some(socket),
            interface,
        })
    }

    /// 接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn socket(&self) -> Result<&CanSocket, CanError> {
        self.socket.as_ref().ok_or(CanError::NotStarted)
    }
}

fn to_socketcan_frame(frame: &CubeFrame) -> Result<CanFrame, CanError> {
    let data = frame.data_slice();
    let can_frame = if frame.is_extended {
        ExtendedId::new(frame.id).and_then(|id| CanFrame::new(id, data))
    } else {
        u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .and_then(|id| CanFrame::new(id, data))
    };
    can_frame.ok_or_else(|| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::InvalidFrame,
            format!("Failed to create frame with ID 0x{:X}", frame.id),
        ))
    })
}

fn from_socketcan_frame(frame: &CanFrame) -> CubeFrame {
    if frame.is_extended() {
        CubeFrame::new_extended(frame.raw_id() & cubemars_protocol::CAN_EFF_MASK, frame.data())
    } else {
        // 标准帧 ID 只有 11 位
        CubeFrame::new_standard((frame.raw_id() & 0x7FF) as u16, frame.data())
    }
}

impl CanAdapter for SocketCanAdapter {
    /// 发送帧
    ///
    /// # 错误
    /// - `CanError::BufferOverflow`: 内核发送队列已满（`WouldBlock`）
    /// - `CanError::Io`: 其他发送失败
    fn send(&mut self, frame: CubeFrame) -> Result<(), CanError> {
        let can_frame = to_socketcan_frame(&frame)?;
        match self.socket()?.write_frame(&can_frame) {
            Ok(()) => {
                trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(CanError::BufferOverflow),
            Err(e) => Err(CanError::Io(e)),
        }
    }

    /// 非阻塞接收，自动跳过错误帧和远程帧
    fn try_receive(&mut self) -> Result<Option<CubeFrame>, CanError> {
        loop {
            let can_frame = match self.socket()?.read_frame() {
                Ok(frame) => frame,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(CanError::Io(e)),
            };

            if can_frame.is_error_frame() {
                warn!("Error frame on '{}': 0x{:X}", self.interface, can_frame.raw_id());
                continue;
            }
            if can_frame.is_remote_frame() {
                continue;
            }

            let frame = from_socketcan_frame(&can_frame);
            trace!("Received CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
            return Ok(Some(frame));
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            trace!("SocketCAN interface '{}' closed", self.interface);
        }
    }
}
