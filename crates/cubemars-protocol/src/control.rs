//! 控制帧构建
//!
//! 负载编码（大端，缩放系数来自控制器协议）：
//!
//! | 类型 | 字节 | 编码 |
//! |---|---|---|
//! | Duty | 4 | int32(duty × 100000) |
//! | Current | 4 | int32(current × 1000) |
//! | Brake | 4 | int32(current × 1000) |
//! | Rpm | 4 | int32(rpm) |
//! | Position | 4 | int32(degrees × 10000) |
//! | Origin | 1 | uint8 mode ∈ {0,1,2} |
//! | PositionSpeedAccel | 8 | int32(degrees × 10000) ‖ int16(speed) ‖ int16(accel) |
//!
//! 浮点值缩放后向零截断（与控制器参考实现的 C 强制转换一致），
//! 超出目标整数宽度时返回 `ProtocolError::InvalidArgument`，不做回绕。

use crate::ids::{CommandKind, command_id, validate_motor_id};
use crate::{CubeFrame, ProtocolError};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 占空比缩放系数
pub const DUTY_SCALE: f64 = 100_000.0;
/// 电流 / 刹车电流缩放系数（A → mA）
pub const CURRENT_SCALE: f64 = 1_000.0;
/// 速度缩放系数（eRPM）
pub const RPM_SCALE: f64 = 1.0;
/// 位置缩放系数（度）
pub const POSITION_SCALE: f64 = 10_000.0;

/// 设置原点模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum OriginMode {
    /// 临时原点（掉电丢失）
    Temporary = 0,
    /// 永久零点
    Permanent = 1,
    /// 恢复默认零点
    RestoreDefault = 2,
}

/// 伺服模式命令
///
/// 每个变体对应一个 `CommandKind`；编码通过穷尽 `match` 完成，
/// 新增命令类型时编译器会检查所有分支。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    /// 占空比（例如 0.5 表示 50%）
    Duty(f32),
    /// 电流（A）
    Current(f32),
    /// 刹车电流（A）
    Brake(f32),
    /// 速度（电气转速 eRPM）
    Rpm(f32),
    /// 位置（度）
    Position(f32),
    /// 设置原点，原始模式值（0/1/2，编码时校验）
    Origin(u8),
    /// 位置（度）+ 速度上限 + 加速度上限（均为 int16 线上宽度，编码时校验）
    PositionSpeedAccel { degrees: f32, speed: i32, accel: i32 },
}

impl Command {
    /// 构建设置原点命令
    pub fn origin(mode: OriginMode) -> Self {
        Command::Origin(mode.into())
    }

    /// 命令类型
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Duty(_) => CommandKind::Duty,
            Command::Current(_) => CommandKind::Current,
            Command::Brake(_) => CommandKind::Brake,
            Command::Rpm(_) => CommandKind::Rpm,
            Command::Position(_) => CommandKind::Position,
            Command::Origin(_) => CommandKind::Origin,
            Command::PositionSpeedAccel { .. } => CommandKind::PositionSpeedAccel,
        }
    }

    /// 停止命令（“发送 0 停止”）
    ///
    /// - Duty / Current / Brake / Rpm：同类型的 0 值
    /// - Position / PositionSpeedAccel：位置 0 会驱动电机回到原点，
    ///   因此使用 `Current(0.0)` 释放力矩
    /// - Origin：单次命令，没有停止帧
    pub fn zero_value(&self) -> Option<Command> {
        match self {
            Command::Duty(_) => Some(Command::Duty(0.0)),
            Command::Current(_) => Some(Command::Current(0.0)),
            Command::Brake(_) => Some(Command::Brake(0.0)),
            Command::Rpm(_) => Some(Command::Rpm(0.0)),
            Command::Position(_) | Command::PositionSpeedAccel { .. } => {
                Some(Command::Current(0.0))
            },
            Command::Origin(_) => None,
        }
    }

    /// 只做参数校验（不关心电机 ID）
    ///
    /// # Errors
    /// - `ProtocolError::InvalidArgument`: 原点模式非法或缩放后溢出
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.encode_payload().map(|_| ())
    }

    /// 编码负载，返回固定 8 字节缓冲区和有效长度
    ///
    /// # Errors
    /// - `ProtocolError::InvalidArgument`: 原点模式非法或缩放后溢出
    pub fn encode_payload(&self) -> Result<([u8; 8], usize), ProtocolError> {
        let mut buf = [0u8; 8];
        let len = match *self {
            Command::Duty(duty) => put_i32(&mut buf, scale_i32("duty", duty, DUTY_SCALE)?),
            Command::Current(current) => {
                put_i32(&mut buf, scale_i32("current", current, CURRENT_SCALE)?)
            },
            Command::Brake(current) => {
                put_i32(&mut buf, scale_i32("brake_current", current, CURRENT_SCALE)?)
            },
            Command::Rpm(rpm) => put_i32(&mut buf, scale_i32("rpm", rpm, RPM_SCALE)?),
            Command::Position(degrees) => {
                put_i32(&mut buf, scale_i32("position", degrees, POSITION_SCALE)?)
            },
            Command::Origin(mode) => {
                let mode = OriginMode::try_from(mode).map_err(|_| {
                    ProtocolError::invalid(
                        "origin_mode",
                        format!("must be 0, 1 or 2 (got {mode})"),
                    )
                })?;
                buf[0] = mode.into();
                1
            },
            Command::PositionSpeedAccel {
                degrees,
                speed,
                accel,
            } => {
                let pos = scale_i32("position", degrees, POSITION_SCALE)?;
                let speed = narrow_i16("speed", speed)?;
                let accel = narrow_i16("accel", accel)?;
                buf[..4].copy_from_slice(&pos.to_be_bytes());
                buf[4..6].copy_from_slice(&speed.to_be_bytes());
                buf[6..8].copy_from_slice(&accel.to_be_bytes());
                8
            },
        };
        debug_assert_eq!(len, self.kind().payload_len());
        Ok((buf, len))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Duty(v) => write!(f, "duty {v:.3}"),
            Command::Current(v) => write!(f, "current {v:.2} A"),
            Command::Brake(v) => write!(f, "brake {v:.2} A"),
            Command::Rpm(v) => write!(f, "rpm {v:.0} eRPM"),
            Command::Position(v) => write!(f, "position {v:.2} deg"),
            Command::Origin(m) => write!(f, "origin mode {m}"),
            Command::PositionSpeedAccel {
                degrees,
                speed,
                accel,
            } => write!(f, "position {degrees:.2} deg (speed {speed}, accel {accel})"),
        }
    }
}

/// 待编码的命令帧
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandFrame {
    pub motor_id: u8,
    pub command: Command,
}

impl CommandFrame {
    /// 创建命令帧，校验电机 ID 范围
    ///
    /// # Errors
    /// - `ProtocolError::InvalidArgument`: `motor_id > 255`
    pub fn new(motor_id: u32, command: Command) -> Result<Self, ProtocolError> {
        Ok(Self {
            motor_id: validate_motor_id(motor_id)?,
            command,
        })
    }

    /// 已知合法电机 ID 时的构造器
    pub fn for_motor(motor_id: u8, command: Command) -> Self {
        Self { motor_id, command }
    }

    /// 命令类型
    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    /// 扩展帧 ID（不含标志位）
    pub fn id(&self) -> u32 {
        command_id(self.motor_id, self.kind())
    }
}

/// 将命令帧编码为扩展 CAN 帧
///
/// # Errors
/// - `ProtocolError::InvalidArgument`: 原点模式非法或缩放后溢出
pub fn encode(frame: &CommandFrame) -> Result<CubeFrame, ProtocolError> {
    let (payload, len) = frame.command.encode_payload()?;
    Ok(CubeFrame::new_extended(frame.id(), &payload[..len]))
}

fn scale_i32(field: &'static str, value: f32, scale: f64) -> Result<i32, ProtocolError> {
    let scaled = f64::from(value) * scale;
    if !scaled.is_finite() {
        return Err(ProtocolError::invalid(
            field,
            format!("must be finite (got {value})"),
        ));
    }
    let truncated = scaled.trunc();
    if truncated < f64::from(i32::MIN) || truncated > f64::from(i32::MAX) {
        return Err(ProtocolError::invalid(
            field,
            format!("{value} overflows int32 after scaling by {scale}"),
        ));
    }
    Ok(truncated as i32)
}

fn narrow_i16(field: &'static str, value: i32) -> Result<i16, ProtocolError> {
    i16::try_from(value).map_err(|_| {
        ProtocolError::invalid(field, format!("{value} does not fit in int16"))
    })
}

fn put_i32(buf: &mut [u8; 8], value: i32) -> usize {
    buf[..4].copy_from_slice(&value.to_be_bytes());
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_for(motor_id: u8, command: Command) -> CubeFrame {
        encode(&CommandFrame::for_motor(motor_id, command)).unwrap()
    }

    #[test]
    fn test_rpm_frame() {
        let frame = encode_for(5, Command::Rpm(500.0));
        assert_eq!(frame.id, 5 | (3 << 8));
        assert!(frame.is_extended);
        assert_eq!(frame.data_slice(), &[0x00, 0x00, 0x01, 0xF4]);
    }

    #[test]
    fn test_duty_scaling() {
        let frame = encode_for(1, Command::Duty(0.5));
        assert_eq!(frame.id, 0x001);
        assert_eq!(frame.data_slice(), &50_000i32.to_be_bytes());
    }

    #[test]
    fn test_current_and_brake_share_scaling() {
        let current = encode_for(2, Command::Current(-1.5));
        let brake = encode_for(2, Command::Brake(-1.5));
        assert_eq!(current.data_slice(), &(-1500i32).to_be_bytes());
        assert_eq!(current.data_slice(), brake.data_slice());
        assert_eq!(current.id, 0x102);
        assert_eq!(brake.id, 0x202);
    }

    #[test]
    fn test_rpm_truncates_toward_zero() {
        let frame = encode_for(1, Command::Rpm(-12.9));
        assert_eq!(frame.data_slice(), &(-12i32).to_be_bytes());
    }

    #[test]
    fn test_position_frame() {
        let frame = encode_for(3, Command::Position(90.0));
        assert_eq!(frame.id, 0x403);
        assert_eq!(frame.data_slice(), &900_000i32.to_be_bytes());
    }

    #[test]
    fn test_origin_frame() {
        let frame = encode_for(7, Command::origin(OriginMode::Permanent));
        assert_eq!(frame.id, 0x507);
        assert_eq!(frame.len, 1);
        assert_eq!(frame.data_slice(), &[1]);
    }

    #[test]
    fn test_origin_mode_out_of_range() {
        let err = encode(&CommandFrame::for_motor(7, Command::Origin(3))).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_position_speed_accel_layout() {
        let frame = encode_for(
            9,
            Command::PositionSpeedAccel {
                degrees: -10.0,
                speed: 1200,
                accel: -400,
            },
        );
        assert_eq!(frame.id, 0x609);
        assert_eq!(frame.len, 8);
        assert_eq!(&frame.data[..4], &(-100_000i32).to_be_bytes());
        assert_eq!(&frame.data[4..6], &1200i16.to_be_bytes());
        assert_eq!(&frame.data[6..8], &(-400i16).to_be_bytes());
    }

    #[test]
    fn test_speed_overflow_rejected() {
        let cmd = Command::PositionSpeedAccel {
            degrees: 0.0,
            speed: 12_000,
            accel: 40_000,
        };
        match cmd.validate().unwrap_err() {
            ProtocolError::InvalidArgument { field, .. } => assert_eq!(field, "accel"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duty_overflow_rejected() {
        // 30000 × 100000 超出 int32
        assert!(Command::Duty(30_000.0).validate().is_err());
        assert!(Command::Rpm(f32::NAN).validate().is_err());
        assert!(Command::Current(f32::INFINITY).validate().is_err());
    }

    #[test]
    fn test_motor_id_out_of_range() {
        let err = CommandFrame::new(256, Command::Rpm(0.0)).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(CommandFrame::new(255, Command::Rpm(0.0)).is_ok());
    }

    #[test]
    fn test_zero_value() {
        assert_eq!(Command::Rpm(500.0).zero_value(), Some(Command::Rpm(0.0)));
        assert_eq!(Command::Duty(0.2).zero_value(), Some(Command::Duty(0.0)));
        assert_eq!(Command::Brake(3.0).zero_value(), Some(Command::Brake(0.0)));
        assert_eq!(
            Command::Position(45.0).zero_value(),
            Some(Command::Current(0.0))
        );
        assert_eq!(Command::Origin(0).zero_value(), None);
    }

    #[test]
    fn test_kind_matches_payload_len() {
        let commands = [
            Command::Duty(0.1),
            Command::Current(1.0),
            Command::Brake(1.0),
            Command::Rpm(100.0),
            Command::Position(1.0),
            Command::Origin(0),
            Command::PositionSpeedAccel {
                degrees: 1.0,
                speed: 1,
                accel: 1,
            },
        ];
        for cmd in commands {
            let (_, len) = cmd.encode_payload().unwrap();
            assert_eq!(len, cmd.kind().payload_len(), "{cmd}");
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_command_serde() {
        let cmd = Command::PositionSpeedAccel {
            degrees: 90.0,
            speed: 1000,
            accel: 500,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let parsed: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cmd);

        let mode: OriginMode = serde_json::from_str("\"Permanent\"").unwrap();
        assert_eq!(Command::origin(mode), Command::Origin(1));
    }
}
