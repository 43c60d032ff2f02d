//! # CubeMars Protocol
//!
//! AK 系列电机伺服模式（Servo Mode）CAN 协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 扩展帧 ID 组成规则、命令标签
//! - `control`: 控制帧构建（编码）
//! - `feedback`: 反馈帧解析（解码）
//!
//! ## 字节序
//!
//! 协议使用 Motorola (MSB) 高位在前（大端字节序）。
//!
//! ## 帧 ID
//!
//! 所有帧均为 29-bit 扩展帧：低 8 位为电机 ID，bit 8-10 为命令标签。
//!
//! ```rust
//! use cubemars_protocol::{Command, CommandFrame, encode};
//!
//! let frame = encode(&CommandFrame::new(5, Command::Rpm(500.0)).unwrap()).unwrap();
//! assert_eq!(frame.id(), 5 | (3 << 8));
//! assert!(frame.is_extended);
//! assert_eq!(frame.data_slice(), &500i32.to_be_bytes());
//! ```

pub mod control;
pub mod feedback;
pub mod ids;

// 重新导出常用类型
pub use control::*;
pub use feedback::*;
pub use ids::*;

use thiserror::Error;

/// 扩展帧标志位（与 Linux `CAN_EFF_FLAG` 取值一致）
///
/// `CubeFrame` 使用 `is_extended` 字段表达该标志，
/// 只有需要“原始 ID”形式的后端（如 SocketCAN）才会用到这个常量。
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;

/// 29-bit 扩展帧 ID 掩码
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// CAN 2.0 帧的统一抽象
///
/// `CubeFrame` 是协议层和硬件层之间的中间抽象：
/// - 协议层只构建/解析 `CubeFrame`，不依赖底层 CAN 实现（SocketCAN/SLCAN）
/// - 上层通过 `CanAdapter` trait 使用统一的帧类型
///
/// # 设计特性
///
/// - **Copy trait**：零成本复制，适合 100Hz 重发循环
/// - **固定 8 字节**：避免堆分配
/// - **时间戳支持**：`timestamp_us` 字段，0 表示不可用
///
/// ```rust
/// use cubemars_protocol::CubeFrame;
///
/// let frame = CubeFrame::new_extended(0x305, &[0, 0, 1, 0xF4]);
/// assert_eq!(frame.id(), 0x305);
/// assert_eq!(frame.data_slice(), &[0, 0, 1, 0xF4]);
/// assert_eq!(frame.raw_id(), 0x305 | cubemars_protocol::CAN_EFF_FLAG);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CubeFrame {
    /// CAN ID（不含标志位）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl CubeFrame {
    /// 创建扩展帧
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id & CAN_EFF_MASK, data, true)
    }

    /// 创建标准帧
    ///
    /// 电机不会发送标准帧，此构造器只用于模拟总线上的“其他设备”。
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(u32::from(id) & 0x7FF, data, false)
    }

    fn new(id: u32, data: &[u8], is_extended: bool) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            is_extended,
            timestamp_us: 0,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(8))]
    }

    /// 获取 CAN ID（不含标志位）
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 获取带扩展帧标志位的原始 ID
    pub fn raw_id(&self) -> u32 {
        if self.is_extended {
            self.id | CAN_EFF_FLAG
        } else {
            self.id
        }
    }

    /// 设置时间戳（由接收端后端填充）
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }
}

/// 协议编码/解析错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 参数越界（电机 ID、原点模式、缩放后溢出）
    #[error("Invalid argument `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Not an extended frame: ID 0x{id:X}")]
    NotExtended { id: u32 },

    #[error("Frame 0x{id:X} addressed to motor {actual}, expected {expected}")]
    MotorMismatch { id: u32, expected: u8, actual: u8 },
}

impl ProtocolError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// 是否为参数错误（调用方 bug，需要在调用点立即失败）
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_extended_masks_to_29_bits() {
        let frame = CubeFrame::new_extended(0xFFFF_FFFF, &[1]);
        assert_eq!(frame.id, CAN_EFF_MASK);
        assert!(frame.is_extended);
    }

    #[test]
    fn test_data_longer_than_8_is_truncated() {
        let frame = CubeFrame::new_extended(0x1, &[0u8; 12]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data_slice().len(), 8);
    }

    #[test]
    fn test_raw_id_standard_has_no_flag() {
        let frame = CubeFrame::new_standard(0x123, &[]);
        assert_eq!(frame.raw_id(), 0x123);
        assert!(frame.data_slice().is_empty());
    }

    #[test]
    fn test_with_timestamp() {
        let frame = CubeFrame::new_extended(0x2901, &[0; 8]).with_timestamp(42);
        assert_eq!(frame.timestamp_us, 42);
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = ProtocolError::invalid("origin_mode", "must be 0, 1 or 2 (got 3)");
        assert!(err.is_invalid_argument());
        assert_eq!(
            err.to_string(),
            "Invalid argument `origin_mode`: must be 0, 1 or 2 (got 3)"
        );
    }
}
