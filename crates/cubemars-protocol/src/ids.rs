//! 扩展帧 ID 组成规则
//!
//! ```text
//!  28        11 10   8 7        0
//! +------------+------+----------+
//! |  reserved  | tag  | motor id |
//! +------------+------+----------+
//! ```

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 电机 ID 所在的低 8 位
pub const MOTOR_ID_MASK: u32 = 0xFF;

/// 命令标签在 ID 中的偏移
pub const COMMAND_TAG_SHIFT: u32 = 8;

/// 命令标签掩码（bit 8-10，移位后）
pub const COMMAND_TAG_MASK: u32 = 0x07;

/// 伺服模式命令类型
///
/// 每个类型对应一个固定的数字标签（0-6），打包进扩展帧 ID 的 bit 8-10。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommandKind {
    /// 占空比模式
    Duty = 0,
    /// 电流环模式
    Current = 1,
    /// 电流刹车模式
    Brake = 2,
    /// 速度环模式（eRPM）
    Rpm = 3,
    /// 位置环模式（度）
    Position = 4,
    /// 设置原点（单次命令）
    Origin = 5,
    /// 位置-速度-加速度环模式
    PositionSpeedAccel = 6,
}

impl CommandKind {
    /// 所有命令类型（按标签顺序）
    pub const ALL: [CommandKind; 7] = [
        CommandKind::Duty,
        CommandKind::Current,
        CommandKind::Brake,
        CommandKind::Rpm,
        CommandKind::Position,
        CommandKind::Origin,
        CommandKind::PositionSpeedAccel,
    ];

    /// 协议标签
    pub fn tag(self) -> u8 {
        self.into()
    }

    /// 负载长度（字节）
    pub fn payload_len(self) -> usize {
        match self {
            CommandKind::Origin => 1,
            CommandKind::PositionSpeedAccel => 8,
            CommandKind::Duty
            | CommandKind::Current
            | CommandKind::Brake
            | CommandKind::Rpm
            | CommandKind::Position => 4,
        }
    }

    /// 人类可读的名称（日志 / CLI 使用）
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Duty => "duty",
            CommandKind::Current => "current",
            CommandKind::Brake => "brake",
            CommandKind::Rpm => "rpm",
            CommandKind::Position => "position",
            CommandKind::Origin => "origin",
            CommandKind::PositionSpeedAccel => "position-speed-accel",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 组合扩展帧 ID：`motor_id | (tag << 8)`
pub fn command_id(motor_id: u8, kind: CommandKind) -> u32 {
    u32::from(motor_id) | (u32::from(kind.tag()) << COMMAND_TAG_SHIFT)
}

/// 从帧 ID 中提取电机 ID（低 8 位）
pub fn motor_id_of(id: u32) -> u8 {
    (id & MOTOR_ID_MASK) as u8
}

/// 从帧 ID 中提取命令类型（bit 8-10），非法标签返回 `None`
pub fn command_kind_of(id: u32) -> Option<CommandKind> {
    let tag = ((id >> COMMAND_TAG_SHIFT) & COMMAND_TAG_MASK) as u8;
    CommandKind::try_from(tag).ok()
}

/// 校验外部传入的电机 ID（0-255）
///
/// # Errors
/// - `ProtocolError::InvalidArgument`: `raw > 255`
pub fn validate_motor_id(raw: u32) -> Result<u8, ProtocolError> {
    u8::try_from(raw)
        .map_err(|_| ProtocolError::invalid("motor_id", format!("must be 0..=255 (got {raw})")))
}
