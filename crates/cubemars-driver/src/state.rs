//! 共享状态
//!
//! 所有状态只由控制循环线程写入，调用方线程通过 `ArcSwap` 无锁读取快照：
//! 读取方要么看到旧值，要么看到新值，不会看到写了一半的反馈或命令。

use crate::metrics::LoopMetrics;
use arc_swap::ArcSwapOption;
use cubemars_protocol::{Command, CubeFrame, FeedbackFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// 带接收时间的反馈快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackSnapshot {
    pub feedback: FeedbackFrame,
    /// 控制循环处理该帧的时间
    pub received_at: Instant,
    /// 适配器提供的时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl FeedbackSnapshot {
    /// 距离收到该帧经过的时间
    pub fn age(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}

/// 正在重发的命令（已预先编码）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveCommand {
    pub command: Command,
    pub frame: CubeFrame,
    pub since: Instant,
}

/// 单个电机的共享状态
///
/// 由 `Motor` 持有，控制循环持有同一个 `Arc` 用于分发反馈。
#[derive(Debug)]
pub struct MotorState {
    motor_id: u8,
    feedback: ArcSwapOption<FeedbackSnapshot>,
    active: ArcSwapOption<ActiveCommand>,
    feedback_count: AtomicU64,
}

impl MotorState {
    pub fn new(motor_id: u8) -> Self {
        Self {
            motor_id,
            feedback: ArcSwapOption::empty(),
            active: ArcSwapOption::empty(),
            feedback_count: AtomicU64::new(0),
        }
    }

    pub fn motor_id(&self) -> u8 {
        self.motor_id
    }

    /// 最新反馈（还没有收到时为 `None`）
    pub fn feedback(&self) -> Option<FeedbackSnapshot> {
        self.feedback.load().as_deref().copied()
    }

    /// 当前正在重发的命令
    pub fn active(&self) -> Option<ActiveCommand> {
        self.active.load().as_deref().copied()
    }

    /// 累计收到的反馈帧数
    pub fn feedback_count(&self) -> u64 {
        self.feedback_count.load(Ordering::Relaxed)
    }

    pub(crate) fn store_feedback(&self, feedback: FeedbackFrame, timestamp_us: u64) {
        self.feedback.store(Some(Arc::new(FeedbackSnapshot {
            feedback,
            received_at: Instant::now(),
            timestamp_us,
        })));
        self.feedback_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_active(&self, active: Option<ActiveCommand>) {
        self.active.store(active.map(Arc::new));
    }
}

/// 最近一次传输错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    pub message: String,
    /// 连接建立以来的累计错误次数
    pub count: u64,
    pub at: Instant,
}

/// 控制循环与 `Bus` 句柄之间共享的上下文
#[derive(Debug, Default)]
pub struct LoopShared {
    pub metrics: LoopMetrics,
    last_error: ArcSwapOption<TransportFault>,
    fault_count: AtomicU64,
}

impl LoopShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次传输错误，返回累计次数
    pub(crate) fn record_fault(&self, message: String) -> u64 {
        let count = self.fault_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_error.store(Some(Arc::new(TransportFault {
            message,
            count,
            at: Instant::now(),
        })));
        count
    }

    pub fn last_error(&self) -> Option<TransportFault> {
        self.last_error.load_full().map(|fault| (*fault).clone())
    }
}
