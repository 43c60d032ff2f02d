//! 电机句柄（对外 API）
//!
//! `Motor` 可以在任意线程调用：
//! - `set_*` 先同步校验参数，再把消息投递到控制循环的收件箱，不等待实际发送
//! - `feedback` 读取控制循环写入的最新快照，不阻塞
//! - `close` 是唯一会阻塞的调用，等待控制循环发送停止帧并确认（有上限）

use crate::command::LoopMessage;
use crate::config::BusConfig;
use crate::connection::{Bus, BusRegistry};
use crate::error::DriverError;
use crate::policy::ContinuousPolicy;
use crate::state::{FeedbackSnapshot, MotorState};
use crossbeam_channel::{Sender, TrySendError};
use cubemars_protocol::{Command, CommandFrame, FeedbackFrame, OriginMode, encode, validate_motor_id};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 轮询反馈的间隔
const FEEDBACK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// AK 系列电机句柄
///
/// ```no_run
/// use cubemars_can::InterfaceKind;
/// use cubemars_driver::{BusConfig, Motor};
/// use std::time::Duration;
///
/// let motor = Motor::connect(&BusConfig::new(InterfaceKind::SocketCan, "can0"), 1)?;
/// motor.set_rpm(2000.0)?;
/// let feedback = motor.wait_for_feedback(Duration::from_millis(500))?;
/// println!("{feedback}");
/// motor.close()?; // 发送 Rpm(0) 后注销
/// # Ok::<(), cubemars_driver::DriverError>(())
/// ```
pub struct Motor {
    motor_id: u8,
    state: Arc<MotorState>,
    tx: Sender<LoopMessage>,
    policy: ContinuousPolicy,
    command_capacity: usize,
    label: String,
    /// 电机持有的连接引用，`close` 时释放
    lease: Mutex<Option<Bus>>,
    closed: AtomicBool,
}

impl Motor {
    /// 在已有连接上注册电机
    ///
    /// # 错误
    /// - `DriverError::InvalidArgument`: `motor_id > 255`
    /// - `DriverError::MotorIdInUse`: 同一条总线上已有该 ID
    pub fn attach(bus: &Bus, motor_id: u32) -> Result<Motor, DriverError> {
        let motor_id = validate_motor_id(motor_id)?;
        let lease = bus.register_motor(motor_id)?;
        let state = Arc::new(MotorState::new(motor_id));

        if let Err(e) = lease.post(LoopMessage::Attach {
            state: state.clone(),
        }) {
            lease.forget_motor(motor_id);
            return Err(e);
        }

        let label = format!("{}#{}", lease.key(), motor_id);
        debug!("{} attached (refcount {})", label, lease.refcount());
        Ok(Motor {
            motor_id,
            state,
            tx: lease.sender(),
            policy: lease.policy(),
            command_capacity: lease.loop_config().command_capacity,
            label,
            lease: Mutex::new(Some(lease)),
            closed: AtomicBool::new(false),
        })
    }

    /// 打开（或复用）连接并注册电机
    pub fn connect(config: &BusConfig, motor_id: u32) -> Result<Motor, DriverError> {
        Self::connect_with(BusRegistry::global(), config, motor_id)
    }

    /// 使用指定注册表打开（或复用）连接并注册电机
    pub fn connect_with(
        registry: &BusRegistry,
        config: &BusConfig,
        motor_id: u32,
    ) -> Result<Motor, DriverError> {
        let bus = registry.get_or_create(config)?;
        // 临时句柄在返回时释放，电机保留自己的引用
        Self::attach(&bus, motor_id)
    }

    pub fn id(&self) -> u8 {
        self.motor_id
    }

    /// 电机所在连接的新句柄（已关闭时为 `None`）
    pub fn bus(&self) -> Option<Bus> {
        self.lease.lock().ok().and_then(|lease| lease.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 发送命令
    ///
    /// 连续类型（由连接的 [`ContinuousPolicy`] 决定）替换当前的连续命令并每个周期重发；
    /// 其他类型只发送一次，同时取消当前的连续命令。
    ///
    /// # 错误
    /// - `DriverError::InvalidArgument`: 参数越界，什么都不会发送
    /// - `DriverError::MotorClosed`: 电机已关闭
    /// - `DriverError::ChannelFull` / `DriverError::ChannelClosed`: 收件箱不可用
    pub fn set_command(&self, command: Command) -> Result<(), DriverError> {
        self.ensure_open()?;
        let frame = encode(&CommandFrame::for_motor(self.motor_id, command))?;

        let message = if self.policy.is_continuous(command.kind()) {
            LoopMessage::Assign {
                motor_id: self.motor_id,
                command,
                frame,
            }
        } else {
            LoopMessage::SendOnce {
                motor_id: self.motor_id,
                command,
                frame,
            }
        };
        self.post(message)
    }

    /// 占空比（0.5 表示 50%）
    pub fn set_duty(&self, duty: f32) -> Result<(), DriverError> {
        self.set_command(Command::Duty(duty))
    }

    /// 电流（A）
    pub fn set_current(&self, current: f32) -> Result<(), DriverError> {
        self.set_command(Command::Current(current))
    }

    /// 刹车电流（A）
    pub fn set_brake_current(&self, current: f32) -> Result<(), DriverError> {
        self.set_command(Command::Brake(current))
    }

    /// 速度（eRPM）
    pub fn set_rpm(&self, rpm: f32) -> Result<(), DriverError> {
        self.set_command(Command::Rpm(rpm))
    }

    /// 位置（度）
    pub fn set_position(&self, degrees: f32) -> Result<(), DriverError> {
        self.set_command(Command::Position(degrees))
    }

    /// 位置（度）+ 速度上限 + 加速度上限
    pub fn set_position_speed_accel(
        &self,
        degrees: f32,
        speed: i32,
        accel: i32,
    ) -> Result<(), DriverError> {
        self.set_command(Command::PositionSpeedAccel {
            degrees,
            speed,
            accel,
        })
    }

    /// 设置原点（单次命令）
    pub fn set_origin(&self, mode: OriginMode) -> Result<(), DriverError> {
        self.set_command(Command::origin(mode))
    }

    /// 取消连续命令（不发送停止帧，控制器看门狗随后自行停机）
    pub fn stop(&self) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.post(LoopMessage::Cancel {
            motor_id: self.motor_id,
        })
    }

    /// 最新反馈
    ///
    /// # 错误
    /// - `DriverError::NoFeedbackYet`: 还没有收到有效反馈帧
    pub fn feedback(&self) -> Result<FeedbackFrame, DriverError> {
        self.state
            .feedback()
            .map(|snapshot| snapshot.feedback)
            .ok_or(DriverError::NoFeedbackYet {
                motor_id: self.motor_id,
            })
    }

    /// 带接收时间的最新反馈
    pub fn feedback_snapshot(&self) -> Option<FeedbackSnapshot> {
        self.state.feedback()
    }

    /// 等待第一帧（或下一帧）有效反馈
    ///
    /// 已经收到过反馈时立即返回最新值。
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 超时未收到反馈
    pub fn wait_for_feedback(&self, timeout: Duration) -> Result<FeedbackFrame, DriverError> {
        let start = Instant::now();
        loop {
            if let Some(snapshot) = self.state.feedback() {
                return Ok(snapshot.feedback);
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout);
            }
            spin_sleep::sleep(FEEDBACK_POLL_INTERVAL);
        }
    }

    /// 控制循环当前正在重发的命令
    pub fn active_command(&self) -> Option<Command> {
        self.state.active().map(|active| active.command)
    }

    /// 关闭电机
    ///
    /// 控制循环发送一帧停止命令（如果有连续命令）后注销电机，然后释放连接引用；
    /// 最后一个引用释放时关闭适配器。重复调用（包括并发调用）是空操作。
    ///
    /// # 错误
    /// - `DriverError::ShutdownTimeout`: 控制循环没有在 `close_timeout` 内确认
    pub fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // 标志已经置位，锁被毒化时也必须释放连接引用
        let lease = self
            .lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(bus) = lease else {
            return Ok(());
        };
        let detached = bus.detach_motor(self.motor_id);
        let released = bus.close();
        debug!("{} closed", self.label);
        detached.and(released)
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::MotorClosed {
                motor_id: self.motor_id,
            });
        }
        Ok(())
    }

    fn post(&self, message: LoopMessage) -> Result<(), DriverError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DriverError::ChannelFull {
                capacity: self.command_capacity,
            },
            TrySendError::Disconnected(_) => DriverError::ChannelClosed,
        })
    }
}

impl Drop for Motor {
    fn drop(&mut self) {
        if !self.is_closed()
            && let Err(e) = self.close()
        {
            warn!("{}: close on drop failed: {}", self.label, e);
        }
    }
}

impl std::fmt::Debug for Motor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Motor")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .field("active", &self.active_command())
            .finish()
    }
}
