//! 反馈帧解析
//!
//! 电机以扩展帧上报状态，8 字节负载布局：
//!
//! | 字节 | 含义 | 换算 |
//! |---|---|---|
//! | 0-1 | 位置 | int16 × 0.1 度 |
//! | 2-3 | 速度 | int16 × 10.0 eRPM |
//! | 4-5 | 电流 | int16 × 0.01 A |
//! | 6 | 温度 | int8 ℃ |
//! | 7 | 故障码 | uint8 |
//!
//! 共享总线上存在其他设备、误码等情况，不符合条件的帧属于“不是发给我的”，
//! 解析返回 `None` 而不是错误。

use crate::ids::motor_id_of;
use crate::{CubeFrame, ProtocolError};
use num_enum::TryFromPrimitive;

/// 反馈帧负载长度
pub const FEEDBACK_LEN: usize = 8;

/// 位置分辨率（度）
pub const POSITION_RESOLUTION: f32 = 0.1;
/// 速度分辨率（eRPM）
pub const VELOCITY_RESOLUTION: f32 = 10.0;
/// 电流分辨率（A）
pub const CURRENT_RESOLUTION: f32 = 0.01;

/// 电机状态反馈
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeedbackFrame {
    /// 位置（度）
    pub position_deg: f32,
    /// 速度（电气转速 eRPM）
    pub velocity_erpm: f32,
    /// 电流（A）
    pub current_a: f32,
    /// 驱动器温度（℃）
    pub temperature_c: i8,
    /// 故障码（0 表示无故障）
    pub error_code: u8,
}

/// 故障码定义（AK 系列驱动手册）
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MotorFault {
    OverTemperature = 1,
    OverCurrent = 2,
    OverVoltage = 3,
    UnderVoltage = 4,
    EncoderFault = 5,
    MosfetOverTemperature = 6,
    MotorStall = 7,
}

impl FeedbackFrame {
    /// 从原始整数字段构建（与线上编码一一对应）
    pub fn from_raw(position: i16, velocity: i16, current: i16, temperature: i8, error_code: u8) -> Self {
        Self {
            position_deg: f32::from(position) * POSITION_RESOLUTION,
            velocity_erpm: f32::from(velocity) * VELOCITY_RESOLUTION,
            current_a: f32::from(current) * CURRENT_RESOLUTION,
            temperature_c: temperature,
            error_code,
        }
    }

    /// 解析 8 字节负载
    pub fn from_payload(data: &[u8; FEEDBACK_LEN]) -> Self {
        Self::from_raw(
            i16::from_be_bytes([data[0], data[1]]),
            i16::from_be_bytes([data[2], data[3]]),
            i16::from_be_bytes([data[4], data[5]]),
            i8::from_be_bytes([data[6]]),
            data[7],
        )
    }

    /// 编码为 8 字节负载（模拟电机 / 测试使用）
    ///
    /// 各字段按分辨率四舍五入，超出 int16 范围时饱和。
    pub fn encode_payload(&self) -> [u8; FEEDBACK_LEN] {
        let pos = quantize(self.position_deg, POSITION_RESOLUTION);
        let vel = quantize(self.velocity_erpm, VELOCITY_RESOLUTION);
        let cur = quantize(self.current_a, CURRENT_RESOLUTION);

        let mut data = [0u8; FEEDBACK_LEN];
        data[0..2].copy_from_slice(&pos.to_be_bytes());
        data[2..4].copy_from_slice(&vel.to_be_bytes());
        data[4..6].copy_from_slice(&cur.to_be_bytes());
        data[6] = self.temperature_c.to_be_bytes()[0];
        data[7] = self.error_code;
        data
    }

    /// 构建电机上报的反馈帧（模拟电机 / 测试使用）
    pub fn to_frame(&self, motor_id: u8) -> CubeFrame {
        // 控制器状态帧使用 0x29 作为高位标签
        CubeFrame::new_extended((0x29 << 8) | u32::from(motor_id), &self.encode_payload())
    }

    /// 是否无故障
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }

    /// 解析故障码；无故障或未知码返回 `None`
    pub fn fault(&self) -> Option<MotorFault> {
        MotorFault::try_from(self.error_code).ok()
    }
}

impl std::fmt::Display for FeedbackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pos: {:6.1} deg | Vel: {:8.1} eRPM | Cur: {:5.2} A | Temp: {:3} C | Err: {}",
            self.position_deg, self.velocity_erpm, self.current_a, self.temperature_c, self.error_code
        )
    }
}

fn quantize(value: f32, resolution: f32) -> i16 {
    let steps = (value / resolution).round();
    if steps.is_nan() {
        0
    } else {
        // `as` 对浮点转整数是饱和转换
        steps as i16
    }
}

/// 解析反馈帧，返回（电机 ID，反馈）
///
/// 以下情况返回 `None`：
/// - 不是扩展帧
/// - 负载长度不等于 8
pub fn decode_feedback(frame: &CubeFrame) -> Option<(u8, FeedbackFrame)> {
    try_decode_feedback(frame).ok()
}

/// 解析发给指定电机的反馈帧，ID 低字节不匹配时返回 `None`
pub fn decode_feedback_for(frame: &CubeFrame, motor_id: u8) -> Option<FeedbackFrame> {
    match decode_feedback(frame) {
        Some((id, feedback)) if id == motor_id => Some(feedback),
        _ => None,
    }
}

/// 解析反馈帧，返回拒绝原因（诊断用途）
///
/// # Errors
/// - `ProtocolError::NotExtended`: 标准帧
/// - `ProtocolError::InvalidLength`: 负载长度不等于 8
pub fn try_decode_feedback(frame: &CubeFrame) -> Result<(u8, FeedbackFrame), ProtocolError> {
    if !frame.is_extended {
        return Err(ProtocolError::NotExtended { id: frame.id });
    }
    if usize::from(frame.len) != FEEDBACK_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: FEEDBACK_LEN,
            actual: usize::from(frame.len),
        });
    }
    Ok((motor_id_of(frame.id), FeedbackFrame::from_payload(&frame.data)))
}
