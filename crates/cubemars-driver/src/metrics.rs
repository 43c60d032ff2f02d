//! 控制循环性能指标
//!
//! 原子计数器，控制循环线程写入，任意线程无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 控制循环实时指标
///
/// ```rust
/// use cubemars_driver::LoopMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = LoopMetrics::default();
/// metrics.tx_frames.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().tx_frames, 1);
/// ```
#[derive(Debug, Default)]
pub struct LoopMetrics {
    /// 已执行的周期数
    pub ticks: AtomicU64,

    /// 发送成功的帧数（包括重发、单次命令和停止帧）
    pub tx_frames: AtomicU64,

    /// 发送失败次数
    pub tx_errors: AtomicU64,

    /// 接收到的总帧数
    pub rx_frames: AtomicU64,

    /// 解析成功并分发给电机的反馈帧数
    pub rx_accepted: AtomicU64,

    /// 被丢弃的帧数（非扩展帧、长度不符、没有匹配的电机）
    pub rx_dropped: AtomicU64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别读取，相互之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            rx_accepted: self.rx_accepted.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.tx_frames.store(0, Ordering::Relaxed);
        self.tx_errors.store(0, Ordering::Relaxed);
        self.rx_frames.store(0, Ordering::Relaxed);
        self.rx_accepted.store(0, Ordering::Relaxed);
        self.rx_dropped.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub tx_frames: u64,
    pub tx_errors: u64,
    pub rx_frames: u64,
    pub rx_accepted: u64,
    pub rx_dropped: u64,
}

impl MetricsSnapshot {
    /// 发送失败率（0.0 - 1.0）
    pub fn tx_error_rate(&self) -> f64 {
        let attempts = self.tx_frames + self.tx_errors;
        if attempts == 0 {
            0.0
        } else {
            self.tx_errors as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = LoopMetrics::new();
        metrics.ticks.fetch_add(3, Ordering::Relaxed);
        metrics.rx_dropped.fetch_add(2, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.ticks, 3);
        assert_eq!(snap.rx_dropped, 2);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_tx_error_rate() {
        let snap = MetricsSnapshot {
            tx_frames: 3,
            tx_errors: 1,
            ..Default::default()
        };
        assert!((snap.tx_error_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(MetricsSnapshot::default().tx_error_rate(), 0.0);
    }
}
