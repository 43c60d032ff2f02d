//! 连接模块（共享总线）
//!
//! 一个 [`Bus`] 对应一个物理适配器 `(interface, channel)`，由多个电机共享：
//!
//! - 每个 `Bus` 句柄持有一个引用计数（`Clone` +1，`Drop`/`close` -1）
//! - 同一个 `(interface, channel)` 通过 [`BusRegistry`] 复用同一条连接
//! - 计数归零时控制循环退出，并由循环线程关闭适配器（恰好一次）
//!
//! 加锁顺序：先注册表锁，再连接锁。连接锁只保护计数和电机 ID 集合，
//! 从不在持锁期间进行收发。

use crate::command::LoopMessage;
use crate::config::{BusConfig, BusKey, LoopConfig};
use crate::control_loop::ControlLoop;
use crate::error::DriverError;
use crate::metrics::MetricsSnapshot;
use crate::motor::Motor;
use crate::policy::ContinuousPolicy;
use crate::state::{LoopShared, TransportFault};
use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use cubemars_can::{BoxedAdapter, CanError, InterfaceKind, open_adapter};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{debug, error, info};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责 join，超时后继续在后台等待
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 适配器打开函数
type Opener = dyn Fn(InterfaceKind, &str, u32) -> Result<BoxedAdapter, CanError> + Send + Sync;

#[derive(Debug, Default)]
struct Attachment {
    refcount: usize,
    motors: BTreeSet<u8>,
    closed: bool,
}

struct BusInner {
    key: BusKey,
    bitrate: u32,
    loop_config: LoopConfig,
    policy: ContinuousPolicy,
    tx: Sender<LoopMessage>,
    shared: Arc<LoopShared>,
    attachment: Mutex<Attachment>,
    thread: Mutex<Option<JoinHandle<()>>>,
    registry: Weak<RegistryInner>,
}

impl BusInner {
    /// 启动控制循环线程（适配器移动到循环线程）
    fn start(
        adapter: BoxedAdapter,
        config: &BusConfig,
        registry: Weak<RegistryInner>,
    ) -> Result<Arc<Self>, DriverError> {
        let key = config.key();
        let (tx, rx) = crossbeam_channel::bounded(config.loop_config.command_capacity);
        let shared = Arc::new(LoopShared::new());

        let control = ControlLoop::new(adapter, shared.clone(), config.loop_config, key.to_string());
        let thread = std::thread::Builder::new()
            .name(format!("cubemars-{}", key.channel))
            .spawn(move || control.run(rx))
            .map_err(|e| DriverError::IoThread(e.to_string()))?;

        info!("Opened {} @ {} bps (continuous: {})", key, config.bitrate, config.policy);
        Ok(Arc::new(Self {
            key,
            bitrate: config.bitrate,
            loop_config: config.loop_config,
            policy: config.policy,
            tx,
            shared,
            attachment: Mutex::new(Attachment {
                refcount: 1,
                ..Attachment::default()
            }),
            thread: Mutex::new(Some(thread)),
            registry,
        }))
    }

    /// 通知控制循环退出并等待确认
    fn shutdown(&self) -> Result<(), DriverError> {
        let timeout = self.loop_config.close_timeout;
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);

        let acked = match self.tx.send_timeout(LoopMessage::Shutdown { ack: ack_tx }, timeout) {
            Ok(()) => match ack_rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            },
            // 循环已经退出
            Err(SendTimeoutError::Disconnected(_)) => true,
            Err(SendTimeoutError::Timeout(_)) => false,
        };
        if !acked {
            error!("{}: control loop did not stop within {:?}", self.key, timeout);
            return Err(DriverError::ShutdownTimeout { timeout });
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join_timeout(timeout).is_err()
        {
            error!("{}: control loop thread panicked or did not exit", self.key);
        }

        info!("Closed {}", self.key);
        Ok(())
    }
}

struct RegistryInner {
    buses: Mutex<HashMap<BusKey, Arc<BusInner>>>,
    opener: Box<Opener>,
}

/// 连接注册表：同一个 `(interface, channel)` 只打开一次
///
/// 大多数调用方使用进程级的 [`BusRegistry::global`]；测试可以用
/// [`BusRegistry::with_opener`] 注入自定义的适配器打开函数。
#[derive(Clone)]
pub struct BusRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for BusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusRegistry").field("open", &self.len()).finish()
    }
}

impl Default for BusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BusRegistry {
    /// 使用 `cubemars_can::open_adapter` 打开适配器
    pub fn new() -> Self {
        Self::with_opener(open_adapter)
    }

    /// 使用自定义的适配器打开函数
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(InterfaceKind, &str, u32) -> Result<BoxedAdapter, CanError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(RegistryInner {
                buses: Mutex::new(HashMap::new()),
                opener: Box::new(opener),
            }),
        }
    }

    /// 进程级注册表
    pub fn global() -> &'static BusRegistry {
        static GLOBAL: OnceLock<BusRegistry> = OnceLock::new();
        GLOBAL.get_or_init(BusRegistry::new)
    }

    /// 获取已打开的连接（引用计数 +1），或打开新连接
    ///
    /// # 错误
    /// - `DriverError::TransportOpen`: 适配器打开失败（不重试）
    /// - `DriverError::BitrateConflict`: 该通道已按另一个波特率打开
    pub fn get_or_create(&self, config: &BusConfig) -> Result<Bus, DriverError> {
        let key = config.key();
        let mut buses = self.inner.buses.lock()?;

        if let Some(existing) = buses.get(&key) {
            if existing.bitrate != config.bitrate {
                return Err(DriverError::BitrateConflict {
                    interface: key.interface,
                    channel: key.channel,
                    existing: existing.bitrate,
                    requested: config.bitrate,
                });
            }

            let mut attachment = existing.attachment.lock()?;
            if !attachment.closed {
                attachment.refcount += 1;
                debug!("Reusing {} (refcount {})", key, attachment.refcount);
                drop(attachment);
                return Ok(Bus::from_inner(existing.clone()));
            }
        }

        let adapter = (self.inner.opener)(config.interface, &config.channel, config.bitrate)
            .map_err(DriverError::TransportOpen)?;
        let inner = BusInner::start(adapter, config, Arc::downgrade(&self.inner))?;
        buses.insert(key, inner.clone());
        Ok(Bus::from_inner(inner))
    }

    /// 当前打开的连接数
    pub fn len(&self) -> usize {
        self.inner
            .buses
            .lock()
            .map(|buses| buses.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 该通道当前是否打开
    pub fn contains(&self, key: &BusKey) -> bool {
        self.inner
            .buses
            .lock()
            .map(|buses| buses.contains_key(key))
            .unwrap_or_default()
    }
}

/// 共享总线连接句柄
///
/// ```no_run
/// use cubemars_can::InterfaceKind;
/// use cubemars_driver::{Bus, BusConfig};
///
/// let bus = Bus::open(&BusConfig::new(InterfaceKind::SocketCan, "can0"))?;
/// let shoulder = bus.motor(1)?;
/// let elbow = bus.motor(2)?;
/// shoulder.set_rpm(1000.0)?;
/// elbow.set_current(0.5)?;
/// # Ok::<(), cubemars_driver::DriverError>(())
/// ```
pub struct Bus {
    inner: Arc<BusInner>,
    released: bool,
}

impl Bus {
    fn from_inner(inner: Arc<BusInner>) -> Self {
        Self {
            inner,
            released: false,
        }
    }

    /// 通过进程级注册表打开（或复用）连接
    pub fn open(config: &BusConfig) -> Result<Bus, DriverError> {
        BusRegistry::global().get_or_create(config)
    }

    /// 使用默认循环配置和重发策略打开连接
    pub fn connect(interface: InterfaceKind, channel: &str, bitrate: u32) -> Result<Bus, DriverError> {
        Self::open(&BusConfig::new(interface, channel).bitrate(bitrate))
    }

    /// 在这条总线上注册一个电机
    ///
    /// 电机持有自己的连接引用，`Bus` 句柄本身可以随后释放。
    pub fn motor(&self, motor_id: u32) -> Result<Motor, DriverError> {
        Motor::attach(self, motor_id)
    }

    pub fn key(&self) -> &BusKey {
        &self.inner.key
    }

    pub fn bitrate(&self) -> u32 {
        self.inner.bitrate
    }

    pub fn policy(&self) -> ContinuousPolicy {
        self.inner.policy
    }

    pub fn loop_config(&self) -> LoopConfig {
        self.inner.loop_config
    }

    /// 当前引用计数（`Bus` 句柄数，每个电机持有一个）
    pub fn refcount(&self) -> usize {
        self.lock_attachment().refcount
    }

    /// 已注册的电机 ID
    pub fn attached_motors(&self) -> Vec<u8> {
        self.lock_attachment().motors.iter().copied().collect()
    }

    /// 两个句柄是否指向同一条连接
    pub fn is_same(&self, other: &Bus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 最近一次传输错误
    pub fn last_error(&self) -> Option<TransportFault> {
        self.inner.shared.last_error()
    }

    /// 控制循环指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.shared.metrics.snapshot()
    }

    /// 显式释放这个句柄，返回关闭结果
    ///
    /// 如果这是最后一个引用，会等待控制循环关闭适配器。
    ///
    /// # 错误
    /// - `DriverError::ShutdownTimeout`: 控制循环没有在 `close_timeout` 内退出
    pub fn close(mut self) -> Result<(), DriverError> {
        self.released = true;
        self.release()
    }

    fn lock_attachment(&self) -> std::sync::MutexGuard<'_, Attachment> {
        self.inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn sender(&self) -> Sender<LoopMessage> {
        self.inner.tx.clone()
    }

    pub(crate) fn post(&self, message: LoopMessage) -> Result<(), DriverError> {
        self.inner.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DriverError::ChannelFull {
                capacity: self.inner.loop_config.command_capacity,
            },
            TrySendError::Disconnected(_) => DriverError::ChannelClosed,
        })
    }

    /// 注册电机 ID，返回电机持有的新引用
    pub(crate) fn register_motor(&self, motor_id: u8) -> Result<Bus, DriverError> {
        let mut attachment = self.inner.attachment.lock()?;
        if attachment.closed {
            return Err(DriverError::ChannelClosed);
        }
        if !attachment.motors.insert(motor_id) {
            return Err(DriverError::MotorIdInUse {
                motor_id,
                channel: self.inner.key.to_string(),
            });
        }
        attachment.refcount += 1;
        Ok(Bus::from_inner(self.inner.clone()))
    }

    pub(crate) fn forget_motor(&self, motor_id: u8) {
        self.lock_attachment().motors.remove(&motor_id);
    }

    /// 注销电机：控制循环发送停止帧后确认
    ///
    /// 电机 ID 在控制循环处理完 `Detach` 之后才释放，之前同一 ID 不能重新注册。
    ///
    /// # 错误
    /// - `DriverError::ShutdownTimeout`: 控制循环没有在 `close_timeout` 内确认
    pub(crate) fn detach_motor(&self, motor_id: u8) -> Result<(), DriverError> {
        let result = self.request_detach(motor_id);
        self.forget_motor(motor_id);
        result
    }

    fn request_detach(&self, motor_id: u8) -> Result<(), DriverError> {
        let timeout = self.inner.loop_config.close_timeout;
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let message = LoopMessage::Detach {
            motor_id,
            ack: ack_tx,
        };

        match self.inner.tx.send_timeout(message, timeout) {
            Ok(()) => {},
            Err(SendTimeoutError::Disconnected(_)) => return Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                error!("{}: motor {} detach not delivered within {:?}", self.inner.key, motor_id, timeout);
                return Err(DriverError::ShutdownTimeout { timeout });
            },
        }

        match ack_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                error!("{}: motor {} detach not acknowledged within {:?}", self.inner.key, motor_id, timeout);
                Err(DriverError::ShutdownTimeout { timeout })
            },
        }
    }

    /// 引用计数 -1，归零时从注册表移除并关闭
    fn release(&self) -> Result<(), DriverError> {
        let registry = self.inner.registry.upgrade();
        let mut buses = registry
            .as_ref()
            .map(|registry| registry.buses.lock().unwrap_or_else(PoisonError::into_inner));

        let last = {
            let mut attachment = self.lock_attachment();
            attachment.refcount = attachment.refcount.saturating_sub(1);
            if attachment.refcount == 0 && !attachment.closed {
                attachment.closed = true;
                true
            } else {
                false
            }
        };
        if !last {
            return Ok(());
        }

        if let Some(buses) = buses.as_mut()
            && buses
                .get(&self.inner.key)
                .is_some_and(|bus| Arc::ptr_eq(bus, &self.inner))
        {
            buses.remove(&self.inner.key);
        }
        drop(buses);

        self.inner.shutdown()
    }
}

impl Clone for Bus {
    fn clone(&self) -> Self {
        self.lock_attachment().refcount += 1;
        Bus::from_inner(self.inner.clone())
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.release() {
            error!("Failed to close {}: {}", self.inner.key, e);
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("key", &self.inner.key)
            .field("bitrate", &self.inner.bitrate)
            .field("refcount", &self.refcount())
            .finish()
    }
}
