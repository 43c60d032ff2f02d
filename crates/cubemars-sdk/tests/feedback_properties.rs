//! 反馈解码的属性测试

use cubemars_sdk::protocol::{
    CommandFrame, CubeFrame, FeedbackFrame, decode_feedback, decode_feedback_for, encode,
};
use cubemars_sdk::{Command, CommandKind};
use proptest::prelude::*;

proptest! {
    /// 任意可表示的物理量经过编码 + 解码后，误差不超过半个分辨率
    #[test]
    fn feedback_roundtrip_within_resolution(
        position in -3276.8f32..3276.7,
        velocity in -327_680.0f32..327_670.0,
        current in -327.68f32..327.67,
        temperature in any::<i8>(),
        error_code in 0u8..=7,
        motor_id in any::<u8>(),
    ) {
        let original = FeedbackFrame {
            position_deg: position,
            velocity_erpm: velocity,
            current_a: current,
            temperature_c: temperature,
            error_code,
        };

        let frame = original.to_frame(motor_id);
        let (id, decoded) = decode_feedback(&frame).unwrap();

        prop_assert_eq!(id, motor_id);
        prop_assert!((decoded.position_deg - position).abs() <= 0.05 + 1e-3);
        prop_assert!((decoded.velocity_erpm - velocity).abs() <= 5.0 + 0.1);
        prop_assert!((decoded.current_a - current).abs() <= 0.005 + 1e-4);
        prop_assert_eq!(decoded.temperature_c, temperature);
        prop_assert_eq!(decoded.error_code, error_code);
    }

    /// 整数字段与线上编码一一对应
    #[test]
    fn raw_fields_are_exact(
        position in any::<i16>(),
        velocity in any::<i16>(),
        current in any::<i16>(),
        temperature in any::<i8>(),
        error_code in any::<u8>(),
    ) {
        let mut payload = [0u8; 8];
        payload[0..2].copy_from_slice(&position.to_be_bytes());
        payload[2..4].copy_from_slice(&velocity.to_be_bytes());
        payload[4..6].copy_from_slice(&current.to_be_bytes());
        payload[6] = temperature.to_be_bytes()[0];
        payload[7] = error_code;

        let frame = CubeFrame::new_extended(0x2901, &payload);
        let decoded = decode_feedback_for(&frame, 1).unwrap();
        prop_assert_eq!(
            decoded,
            FeedbackFrame::from_raw(position, velocity, current, temperature, error_code)
        );
        prop_assert!(decode_feedback_for(&frame, 2).is_none());
    }

    /// 标准帧和长度不等于 8 的帧都会被丢弃
    #[test]
    fn malformed_frames_are_dropped(
        data in proptest::collection::vec(any::<u8>(), 0..8),
        id in 0u16..0x800,
    ) {
        prop_assert!(decode_feedback(&CubeFrame::new_extended(0x2901, &data)).is_none());
        prop_assert!(decode_feedback(&CubeFrame::new_standard(id, &[0u8; 8])).is_none());
    }

    /// 速度命令：ID = 电机 ID | (3 << 8)，负载为大端 int32
    #[test]
    fn rpm_command_layout(motor_id in any::<u8>(), rpm in -100_000i32..100_000) {
        let frame = encode(&CommandFrame::for_motor(motor_id, Command::Rpm(rpm as f32))).unwrap();
        prop_assert_eq!(frame.id, u32::from(motor_id) | (u32::from(CommandKind::Rpm.tag()) << 8));
        prop_assert!(frame.is_extended);
        prop_assert_eq!(frame.data_slice(), &rpm.to_be_bytes()[..]);
    }
}
