//! 控制循环收件箱消息
//!
//! 调用方线程只通过这些消息修改控制循环的状态；同一条连接上的消息按投递顺序（FIFO）处理。

use crate::state::MotorState;
use crossbeam_channel::Sender;
use cubemars_protocol::{Command, CubeFrame};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) enum LoopMessage {
    /// 注册电机，开始分发它的反馈
    Attach { state: Arc<MotorState> },

    /// 替换电机的连续命令，下一个周期开始重发
    Assign {
        motor_id: u8,
        command: Command,
        frame: CubeFrame,
    },

    /// 立即发送一次（取消当前的连续命令）
    SendOnce {
        motor_id: u8,
        command: Command,
        frame: CubeFrame,
    },

    /// 取消连续命令，不发送任何帧
    Cancel { motor_id: u8 },

    /// 发送停止帧（如果有连续命令）并注销电机，处理完成后确认
    Detach { motor_id: u8, ack: Sender<()> },

    /// 关闭适配器并退出循环，处理完成后确认
    Shutdown { ack: Sender<()> },
}

impl LoopMessage {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            LoopMessage::Attach { .. } => "attach",
            LoopMessage::Assign { .. } => "assign",
            LoopMessage::SendOnce { .. } => "send-once",
            LoopMessage::Cancel { .. } => "cancel",
            LoopMessage::Detach { .. } => "detach",
            LoopMessage::Shutdown { .. } => "shutdown",
        }
    }
}
