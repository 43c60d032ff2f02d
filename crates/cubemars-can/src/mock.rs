//! 内存总线（Mock 适配器）
//!
//! 不依赖任何硬件，测试和仿真通过 [`MockBusHandle`] 观察/注入总线流量：
//! - 读取驱动层发送的所有帧
//! - 注入任意接收帧（反馈帧、其他设备的帧、畸形帧）
//! - 模拟写失败
//! - 统计适配器被关闭的次数
//!
//! `open_adapter(InterfaceKind::Mock, channel, _)` 通过进程内的 hub 按
//! channel 名称复用同一条总线，测试可以用 [`hub_handle`] 拿到对应的句柄。

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, CubeFrame};
use cubemars_protocol::{FeedbackFrame, motor_id_of};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Default)]
struct MockBusState {
    rx_queue: VecDeque<CubeFrame>,
    sent: Vec<CubeFrame>,
    fail_writes: bool,
    open_count: usize,
    close_count: usize,
    /// 模拟电机：收到发给该 ID 的扩展帧后回复一帧反馈
    simulated: HashMap<u8, FeedbackFrame>,
}

#[derive(Debug, Default)]
struct MockBus {
    state: Mutex<MockBusState>,
    sent_cond: Condvar,
}

/// 内存总线句柄（可克隆，所有克隆指向同一条总线）
#[derive(Debug, Clone, Default)]
pub struct MockBusHandle {
    bus: Arc<MockBus>,
}

impl MockBusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建连接到这条总线的适配器
    pub fn adapter(&self) -> MockCanAdapter {
        self.bus.state.lock().open_count += 1;
        MockCanAdapter {
            bus: self.clone(),
            closed: false,
        }
    }

    /// 注入一帧，适配器下一次 `try_receive` 会读到
    pub fn inject(&self, frame: CubeFrame) {
        self.bus.state.lock().rx_queue.push_back(frame);
    }

    /// 注入一帧电机反馈
    pub fn inject_feedback(&self, motor_id: u8, feedback: &FeedbackFrame) {
        self.inject(feedback.to_frame(motor_id));
    }

    /// 模拟一个在线电机：之后每收到一帧发给它的命令，就回复一帧 `feedback`
    pub fn simulate_motor(&self, motor_id: u8, feedback: FeedbackFrame) {
        self.bus.state.lock().simulated.insert(motor_id, feedback);
    }

    /// 已发送帧的快照
    pub fn sent_frames(&self) -> Vec<CubeFrame> {
        self.bus.state.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.bus.state.lock().sent.len()
    }

    /// 清空已发送帧记录
    pub fn clear_sent(&self) {
        self.bus.state.lock().sent.clear();
    }

    /// 让之后的 `send` 全部失败（模拟总线断开）
    pub fn set_fail_writes(&self, fail: bool) {
        self.bus.state.lock().fail_writes = fail;
    }

    /// 适配器被创建的次数
    pub fn open_count(&self) -> usize {
        self.bus.state.lock().open_count
    }

    /// 适配器被关闭的次数
    pub fn close_count(&self) -> usize {
        self.bus.state.lock().close_count
    }

    /// 等待已发送帧满足条件，超时返回 `false`
    pub fn wait_for_sent<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[CubeFrame]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.bus.state.lock();
        loop {
            if predicate(&state.sent) {
                return true;
            }
            if self.bus.sent_cond.wait_until(&mut state, deadline).timed_out() {
                return predicate(&state.sent);
            }
        }
    }
}

/// 连接到 [`MockBusHandle`] 的适配器
#[derive(Debug)]
pub struct MockCanAdapter {
    bus: MockBusHandle,
    closed: bool,
}

impl MockCanAdapter {
    /// 所属总线句柄
    pub fn handle(&self) -> MockBusHandle {
        self.bus.clone()
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: CubeFrame) -> Result<(), CanError> {
        if self.closed {
            return Err(CanError::NotStarted);
        }

        let mut state = self.bus.bus.state.lock();
        if state.fail_writes {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::Backend,
                "mock bus write failure",
            )));
        }

        state.sent.push(frame);
        if frame.is_extended {
            let reply = state
                .simulated
                .get(&motor_id_of(frame.id))
                .map(|fb| fb.to_frame(motor_id_of(frame.id)));
            if let Some(reply) = reply {
                state.rx_queue.push_back(reply);
            }
        }
        drop(state);

        self.bus.bus.sent_cond.notify_all();
        trace!("Mock bus sent: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<CubeFrame>, CanError> {
        if self.closed {
            return Err(CanError::NotStarted);
        }
        Ok(self.bus.bus.state.lock().rx_queue.pop_front())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.bus.bus.state.lock().close_count += 1;
        }
    }
}

fn hub() -> &'static Mutex<HashMap<String, MockBusHandle>> {
    static HUB: OnceLock<Mutex<HashMap<String, MockBusHandle>>> = OnceLock::new();
    HUB.get_or_init(|| Mutex::new(HashMap::new()))
}

/// 获取（必要时创建）进程内以 `channel` 命名的总线
pub fn hub_handle(channel: &str) -> MockBusHandle {
    hub().lock().entry(channel.to_string()).or_default().clone()
}

/// 丢弃以 `channel` 命名的总线，之后的 `hub_handle` 会得到一条新总线
pub fn reset_hub_channel(channel: &str) {
    hub().lock().remove(channel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_receive() {
        let handle = MockBusHandle::new();
        let mut adapter = handle.adapter();
        assert!(adapter.try_receive().unwrap().is_none());

        handle.inject(CubeFrame::new_extended(0x2901, &[0; 8]));
        let frame = adapter.try_receive().unwrap().unwrap();
        assert_eq!(frame.id, 0x2901);
    }

    #[test]
    fn test_sent_frames_recorded() {
        let handle = MockBusHandle::new();
        let mut adapter = handle.adapter();
        adapter.send(CubeFrame::new_extended(0x305, &[1, 2, 3, 4])).unwrap();
        assert_eq!(handle.sent_count(), 1);
        assert_eq!(handle.sent_frames()[0].id, 0x305);
    }

    #[test]
    fn test_fail_writes() {
        let handle = MockBusHandle::new();
        let mut adapter = handle.adapter();
        handle.set_fail_writes(true);
        assert!(adapter.send(CubeFrame::new_extended(0x1, &[])).is_err());
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    fn test_close_counted_once() {
        let handle = MockBusHandle::new();
        let mut adapter = handle.adapter();
        adapter.close();
        adapter.close();
        assert_eq!(handle.close_count(), 1);
        assert!(matches!(adapter.try_receive(), Err(CanError::NotStarted)));
    }

    #[test]
    fn test_simulated_motor_replies() {
        let handle = MockBusHandle::new();
        let mut adapter = handle.adapter();
        handle.simulate_motor(3, FeedbackFrame::from_raw(900, 0, 0, 30, 0));

        adapter.send(CubeFrame::new_extended(0x303, &[0; 4])).unwrap();
        let reply = adapter.try_receive().unwrap().unwrap();
        assert_eq!(motor_id_of(reply.id), 3);

        // 发给其他电机的命令没有回复
        adapter.send(CubeFrame::new_extended(0x304, &[0; 4])).unwrap();
        assert!(adapter.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_hub_shares_bus_by_channel() {
        let a = hub_handle("mock-hub-test");
        let b = hub_handle("mock-hub-test");
        let mut adapter = a.adapter();
        adapter.send(CubeFrame::new_extended(0x1, &[])).unwrap();
        assert_eq!(b.sent_count(), 1);

        reset_hub_channel("mock-hub-test");
        assert_eq!(hub_handle("mock-hub-test").sent_count(), 0);
    }

    #[test]
    fn test_wait_for_sent_times_out() {
        let handle = MockBusHandle::new();
        assert!(!handle.wait_for_sent(Duration::from_millis(10), |sent| !sent.is_empty()));
    }
}
