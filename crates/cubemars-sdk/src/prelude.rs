//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use cubemars_sdk::prelude::*;
//! ```

// 驱动层
pub use crate::driver::{
    Bus, BusConfig, BusRegistry, ContinuousPolicy, FeedbackSnapshot, LoopConfig, Motor,
};

// 协议层
pub use crate::protocol::{Command, CommandKind, FeedbackFrame, MotorFault, OriginMode};

// CAN 层
pub use crate::can::{CanAdapter, InterfaceKind};

// 错误类型
pub use crate::can::CanError;
pub use crate::driver::DriverError;
pub use crate::protocol::ProtocolError;
