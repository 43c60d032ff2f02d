//! 控制循环模块
//!
//! 每条连接一个专用线程，独占 CAN 适配器。每个周期（默认 10ms）依次：
//!
//! 1. 重发所有电机的连续命令（满足控制器看门狗）
//! 2. 取出适配器中已到达的帧（最多 `max_rx_per_tick` 帧），按 ID 低字节分发反馈
//! 3. 处理收件箱消息直到下一个周期开始
//!
//! 发送失败只记录为连接的最近错误，循环继续运行，下一个周期自然重试。

use crate::command::LoopMessage;
use crate::config::LoopConfig;
use crate::state::{ActiveCommand, LoopShared, MotorState};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use cubemars_can::{CanAdapter, CubeFrame};
use cubemars_protocol::{CommandFrame, decode_feedback, encode};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// 单次重发批量（栈上预留 8 个电机）
type FrameBatch = SmallVec<[CubeFrame; 8]>;

struct LoopMotor {
    state: Arc<MotorState>,
    active: Option<ActiveCommand>,
}

impl LoopMotor {
    fn set_active(&mut self, active: Option<ActiveCommand>) {
        self.active = active;
        self.state.set_active(active);
    }
}

enum Flow {
    Continue,
    Exit(Sender<()>),
}

/// 第一次以及之后每 100 次错误打印一次日志
fn should_log(count: u64) -> bool {
    count == 1 || count % 100 == 0
}

/// 控制循环状态（只在循环线程内访问）
pub(crate) struct ControlLoop<A: CanAdapter> {
    can: A,
    motors: BTreeMap<u8, LoopMotor>,
    shared: Arc<LoopShared>,
    config: LoopConfig,
    label: String,
}

impl<A: CanAdapter> ControlLoop<A> {
    pub(crate) fn new(can: A, shared: Arc<LoopShared>, config: LoopConfig, label: String) -> Self {
        Self {
            can,
            motors: BTreeMap::new(),
            shared,
            config,
            label,
        }
    }

    /// 循环主体，收到 `Shutdown` 或所有发送端断开后返回
    pub(crate) fn run(mut self, rx: Receiver<LoopMessage>) {
        // 设置线程优先级（可选 feature）
        #[cfg(feature = "realtime")]
        {
            use thread_priority::*;

            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => info!("[{}] control loop priority set to MAX (realtime)", self.label),
                Err(e) => warn!(
                    "[{}] failed to set control loop priority: {:?}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    self.label, e
                ),
            }
        }

        debug!(
            "[{}] control loop started ({:?} period)",
            self.label, self.config.tick_period
        );

        let mut next_tick = Instant::now();
        let ack = 'run: loop {
            self.transmit_active();
            self.poll_receive();
            self.shared.metrics.ticks.fetch_add(1, Ordering::Relaxed);

            next_tick += self.config.tick_period;
            let now = Instant::now();
            if next_tick < now {
                // 周期超时：跳过错过的周期，不补发
                trace!("[{}] tick overrun by {:?}", self.label, now - next_tick);
                next_tick = now;
            }

            loop {
                match rx.recv_deadline(next_tick) {
                    Ok(message) => {
                        if let Flow::Exit(ack) = self.apply(message) {
                            break 'run Some(ack);
                        }
                    },
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("[{}] command channel disconnected", self.label);
                        break 'run None;
                    },
                }
            }
        };

        self.finish();
        if let Some(ack) = ack {
            // 接收端可能已经超时放弃
            let _ = ack.send(());
        }
    }

    /// 处理一条收件箱消息
    fn apply(&mut self, message: LoopMessage) -> Flow {
        trace!("[{}] applying {} message", self.label, message.name());
        match message {
            LoopMessage::Attach { state } => {
                let motor_id = state.motor_id();
                match self.motors.entry(motor_id) {
                    Entry::Occupied(_) => {
                        // 旧电机的停止帧还没发出，不能覆盖
                        error!("[{}] motor {} is still attached, attach ignored", self.label, motor_id);
                    },
                    Entry::Vacant(slot) => {
                        slot.insert(LoopMotor {
                            state,
                            active: None,
                        });
                        debug!("[{}] motor {} attached", self.label, motor_id);
                    },
                }
            },
            LoopMessage::Assign {
                motor_id,
                command,
                frame,
            } => match self.motors.get_mut(&motor_id) {
                Some(motor) => {
                    motor.set_active(Some(ActiveCommand {
                        command,
                        frame,
                        since: Instant::now(),
                    }));
                    debug!("[{}] motor {}: continuous {}", self.label, motor_id, command);
                },
                None => warn!("[{}] assign for unattached motor {}", self.label, motor_id),
            },
            LoopMessage::SendOnce {
                motor_id,
                command,
                frame,
            } => match self.motors.get_mut(&motor_id) {
                Some(motor) => {
                    motor.set_active(None);
                    debug!("[{}] motor {}: once {}", self.label, motor_id, command);
                    self.transmit(frame);
                },
                None => warn!("[{}] send for unattached motor {}", self.label, motor_id),
            },
            LoopMessage::Cancel { motor_id } => {
                if let Some(motor) = self.motors.get_mut(&motor_id) {
                    if motor.active.is_some() {
                        debug!("[{}] motor {}: continuous command cancelled", self.label, motor_id);
                    }
                    motor.set_active(None);
                }
            },
            LoopMessage::Detach { motor_id, ack } => {
                if let Some(motor) = self.motors.remove(&motor_id) {
                    self.release_motor(motor_id, motor);
                    debug!("[{}] motor {} detached", self.label, motor_id);
                }
                let _ = ack.send(());
            },
            LoopMessage::Shutdown { ack } => return Flow::Exit(ack),
        }
        Flow::Continue
    }

    /// 发送停止帧（如果有连续命令）并清除状态
    fn release_motor(&mut self, motor_id: u8, mut motor: LoopMotor) {
        let zero = motor.active.and_then(|active| active.command.zero_value());
        motor.set_active(None);

        if let Some(zero) = zero {
            match encode(&CommandFrame::for_motor(motor_id, zero)) {
                Ok(frame) => {
                    debug!("[{}] motor {}: stop frame {}", self.label, motor_id, zero);
                    self.transmit(frame);
                },
                Err(e) => error!("[{}] motor {}: cannot encode stop frame: {}", self.label, motor_id, e),
            }
        }
    }

    /// 周期第 1 步：重发所有连续命令
    fn transmit_active(&mut self) {
        let frames: FrameBatch = self
            .motors
            .values()
            .filter_map(|motor| motor.active.map(|active| active.frame))
            .collect();
        for frame in frames {
            self.transmit(frame);
        }
    }

    /// 周期第 2 步：取出已到达的帧并分发
    fn poll_receive(&mut self) {
        for _ in 0..self.config.max_rx_per_tick {
            match self.can.try_receive() {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => break,
                Err(e) => {
                    let count = self.shared.record_fault(format!("receive failed: {e}"));
                    if should_log(count) {
                        warn!("[{}] receive failed ({} faults so far): {}", self.label, count, e);
                    }
                    break;
                },
            }
        }
    }

    fn dispatch(&mut self, frame: CubeFrame) {
        let metrics = &self.shared.metrics;
        metrics.rx_frames.fetch_add(1, Ordering::Relaxed);

        match decode_feedback(&frame) {
            Some((motor_id, feedback)) => match self.motors.get(&motor_id) {
                Some(motor) => {
                    motor.state.store_feedback(feedback, frame.timestamp_us);
                    metrics.rx_accepted.fetch_add(1, Ordering::Relaxed);
                },
                None => {
                    metrics.rx_dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("[{}] feedback for unattached motor {} dropped", self.label, motor_id);
                },
            },
            None => {
                metrics.rx_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("[{}] ignoring frame 0x{:X} (len {})", self.label, frame.id, frame.len);
            },
        }
    }

    fn transmit(&mut self, frame: CubeFrame) {
        match self.can.send(frame) {
            Ok(()) => {
                self.shared.metrics.tx_frames.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                self.shared.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                let count = self
                    .shared
                    .record_fault(format!("send 0x{:X} failed: {e}", frame.id));
                if should_log(count) {
                    warn!(
                        "[{}] send 0x{:X} failed ({} faults so far): {}",
                        self.label, frame.id, count, e
                    );
                }
            },
        }
    }

    /// 退出前：给仍在重发的电机发送停止帧，然后关闭适配器（恰好一次）
    fn finish(&mut self) {
        let motors = std::mem::take(&mut self.motors);
        for (motor_id, motor) in motors {
            self.release_motor(motor_id, motor);
        }
        self.can.close();
        info!("[{}] control loop stopped, transport closed", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubemars_can::{MockBusHandle, MockCanAdapter};
    use cubemars_protocol::{Command, CommandKind, FeedbackFrame, command_kind_of};
    use std::time::Duration;

    fn new_loop() -> (ControlLoop<MockCanAdapter>, MockBusHandle) {
        let handle = MockBusHandle::new();
        let control = ControlLoop::new(
            handle.adapter(),
            Arc::new(LoopShared::new()),
            LoopConfig::default(),
            "test".to_string(),
        );
        (control, handle)
    }

    fn attach(control: &mut ControlLoop<MockCanAdapter>, motor_id: u8) -> Arc<MotorState> {
        let state = Arc::new(MotorState::new(motor_id));
        control.apply(LoopMessage::Attach {
            state: state.clone(),
        });
        state
    }

    fn assign(control: &mut ControlLoop<MockCanAdapter>, motor_id: u8, command: Command) {
        let frame = encode(&CommandFrame::for_motor(motor_id, command)).unwrap();
        control.apply(LoopMessage::Assign {
            motor_id,
            command,
            frame,
        });
    }

    #[test]
    fn test_active_command_resent_every_tick() {
        let (mut control, handle) = new_loop();
        let state = attach(&mut control, 5);
        assign(&mut control, 5, Command::Rpm(500.0));
        assert_eq!(state.active().map(|a| a.command), Some(Command::Rpm(500.0)));

        for _ in 0..3 {
            control.transmit_active();
        }
        let sent = handle.sent_frames();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|f| f.id == 0x305));
    }

    #[test]
    fn test_assign_replaces_previous_command() {
        let (mut control, handle) = new_loop();
        attach(&mut control, 1);
        assign(&mut control, 1, Command::Rpm(100.0));
        assign(&mut control, 1, Command::Duty(0.1));
        control.transmit_active();

        let sent = handle.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(command_kind_of(sent[0].id), Some(CommandKind::Duty));
    }

    #[test]
    fn test_send_once_cancels_continuous() {
        let (mut control, handle) = new_loop();
        let state = attach(&mut control, 2);
        assign(&mut control, 2, Command::Rpm(100.0));

        let origin = Command::Origin(0);
        let frame = encode(&CommandFrame::for_motor(2, origin)).unwrap();
        control.apply(LoopMessage::SendOnce {
            motor_id: 2,
            command: origin,
            frame,
        });
        assert!(state.active().is_none());
        assert_eq!(handle.sent_count(), 1);

        control.transmit_active();
        assert_eq!(handle.sent_count(), 1);
    }

    #[test]
    fn test_cancel_sends_nothing() {
        let (mut control, handle) = new_loop();
        let state = attach(&mut control, 2);
        assign(&mut control, 2, Command::Current(1.0));
        control.apply(LoopMessage::Cancel { motor_id: 2 });
        control.transmit_active();
        assert!(state.active().is_none());
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    fn test_detach_sends_single_zero_frame() {
        let (mut control, handle) = new_loop();
        attach(&mut control, 5);
        assign(&mut control, 5, Command::Rpm(500.0));

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        control.apply(LoopMessage::Detach {
            motor_id: 5,
            ack: ack_tx,
        });
        assert!(ack_rx.try_recv().is_ok());

        let sent = handle.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x305);
        assert_eq!(sent[0].data_slice(), &0i32.to_be_bytes());

        // 第二次 detach 是空操作，但仍然确认
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        control.apply(LoopMessage::Detach {
            motor_id: 5,
            ack: ack_tx,
        });
        assert!(ack_rx.try_recv().is_ok());
        control.transmit_active();
        assert_eq!(handle.sent_count(), 1);
    }

    #[test]
    fn test_duplicate_attach_keeps_existing_motor() {
        let (mut control, handle) = new_loop();
        let original = attach(&mut control, 5);
        assign(&mut control, 5, Command::Rpm(500.0));

        let duplicate = attach(&mut control, 5);
        assert_eq!(original.active().map(|a| a.command), Some(Command::Rpm(500.0)));
        assert!(duplicate.active().is_none());

        // 反馈仍然分发给原来的电机
        handle.inject_feedback(5, &FeedbackFrame::from_raw(100, 0, 0, 25, 0));
        control.poll_receive();
        assert!(original.feedback().is_some());
        assert!(duplicate.feedback().is_none());

        // 原来的连续命令在注销时收到恰好一帧停止命令
        let (ack_tx, _ack_rx) = crossbeam_channel::bounded(1);
        control.apply(LoopMessage::Detach {
            motor_id: 5,
            ack: ack_tx,
        });
        let sent = handle.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x305);
        assert_eq!(sent[0].data_slice(), &0i32.to_be_bytes());
    }

    #[test]
    fn test_detach_position_releases_torque() {
        let (mut control, handle) = new_loop();
        attach(&mut control, 3);
        assign(&mut control, 3, Command::Position(45.0));

        let (ack_tx, _ack_rx) = crossbeam_channel::bounded(1);
        control.apply(LoopMessage::Detach {
            motor_id: 3,
            ack: ack_tx,
        });
        let sent = handle.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(command_kind_of(sent[0].id), Some(CommandKind::Current));
    }

    #[test]
    fn test_detach_without_active_sends_nothing() {
        let (mut control, handle) = new_loop();
        attach(&mut control, 9);
        let (ack_tx, _ack_rx) = crossbeam_channel::bounded(1);
        control.apply(LoopMessage::Detach {
            motor_id: 9,
            ack: ack_tx,
        });
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    fn test_feedback_dispatch() {
        let (mut control, handle) = new_loop();
        let one = attach(&mut control, 1);
        let two = attach(&mut control, 2);

        handle.inject_feedback(2, &FeedbackFrame::from_raw(900, 10, 100, 30, 0));
        // 没有注册的电机
        handle.inject_feedback(7, &FeedbackFrame::from_raw(1, 1, 1, 1, 0));
        // 长度不符
        handle.inject(CubeFrame::new_extended(0x2901, &[0; 6]));
        // 标准帧
        handle.inject(CubeFrame::new_standard(0x001, &[0; 8]));

        control.poll_receive();

        assert!(one.feedback().is_none());
        let fb = two.feedback().unwrap().feedback;
        assert!((fb.position_deg - 90.0).abs() < 1e-3);

        let metrics = control.shared.metrics.snapshot();
        assert_eq!(metrics.rx_frames, 4);
        assert_eq!(metrics.rx_accepted, 1);
        assert_eq!(metrics.rx_dropped, 3);
    }

    #[test]
    fn test_receive_bounded_per_tick() {
        let handle = MockBusHandle::new();
        let config = LoopConfig {
            max_rx_per_tick: 2,
            ..LoopConfig::default()
        };
        let mut control =
            ControlLoop::new(handle.adapter(), Arc::new(LoopShared::new()), config, "t".into());
        for _ in 0..5 {
            handle.inject_feedback(1, &FeedbackFrame::default());
        }
        control.poll_receive();
        assert_eq!(control.shared.metrics.snapshot().rx_frames, 2);
    }

    #[test]
    fn test_write_failure_recorded_and_recovered() {
        let (mut control, handle) = new_loop();
        attach(&mut control, 1);
        assign(&mut control, 1, Command::Rpm(10.0));

        handle.set_fail_writes(true);
        control.transmit_active();
        control.transmit_active();
        let fault = control.shared.last_error().unwrap();
        assert_eq!(fault.count, 2);
        assert!(fault.message.contains("0x301"), "{}", fault.message);

        handle.set_fail_writes(false);
        control.transmit_active();
        let metrics = control.shared.metrics.snapshot();
        assert_eq!(metrics.tx_errors, 2);
        assert_eq!(metrics.tx_frames, 1);
    }

    #[test]
    fn test_run_shutdown_closes_transport_once() {
        let handle = MockBusHandle::new();
        let shared = Arc::new(LoopShared::new());
        let control = ControlLoop::new(
            handle.adapter(),
            shared.clone(),
            LoopConfig::default(),
            "run".into(),
        );
        let (tx, rx) = crossbeam_channel::bounded(16);
        let thread = std::thread::spawn(move || control.run(rx));

        let state = Arc::new(MotorState::new(4));
        tx.send(LoopMessage::Attach { state }).unwrap();
        let frame = encode(&CommandFrame::for_motor(4, Command::Rpm(300.0))).unwrap();
        tx.send(LoopMessage::Assign {
            motor_id: 4,
            command: Command::Rpm(300.0),
            frame,
        })
        .unwrap();

        // 100Hz 重发
        assert!(handle.wait_for_sent(Duration::from_secs(1), |sent| sent.len() >= 5));

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        tx.send(LoopMessage::Shutdown { ack: ack_tx }).unwrap();
        ack_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        thread.join().unwrap();

        assert_eq!(handle.close_count(), 1);
        // 退出时仍在重发的电机收到停止帧
        let last = *handle.sent_frames().last().unwrap();
        assert_eq!(last.id, 0x304);
        assert_eq!(last.data_slice(), &0i32.to_be_bytes());
        assert!(shared.metrics.snapshot().ticks >= 5);
    }

    #[test]
    fn test_run_exits_when_senders_dropped() {
        let handle = MockBusHandle::new();
        let control = ControlLoop::new(
            handle.adapter(),
            Arc::new(LoopShared::new()),
            LoopConfig::default(),
            "drop".into(),
        );
        let (tx, rx) = crossbeam_channel::bounded::<LoopMessage>(1);
        let thread = std::thread::spawn(move || control.run(rx));
        drop(tx);
        thread.join().unwrap();
        assert_eq!(handle.close_count(), 1);
    }
}
