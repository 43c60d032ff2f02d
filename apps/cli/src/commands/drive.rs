//! 运动命令
//!
//! 连续类命令在 `--duration` 秒内（或直到 Ctrl+C）由控制循环周期重发，
//! 退出时关闭电机，控制循环发送一帧停止命令。

use super::ConnectArgs;
use super::config::CliConfig;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use cubemars_sdk::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 状态输出间隔
const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// 运行时长参数
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// 持续时间（秒），不指定时运行到 Ctrl+C
    #[arg(short, long)]
    pub duration: Option<f64>,
}

/// 运动命令
#[derive(Subcommand, Debug)]
pub enum DriveCommand {
    /// 占空比模式（0.5 表示 50%）
    Duty {
        #[arg(allow_negative_numbers = true)]
        duty: f32,
        #[command(flatten)]
        run: RunArgs,
    },

    /// 电流模式（A）
    Current {
        #[arg(allow_negative_numbers = true)]
        amps: f32,
        #[command(flatten)]
        run: RunArgs,
    },

    /// 刹车电流模式（A）
    Brake {
        amps: f32,
        #[command(flatten)]
        run: RunArgs,
    },

    /// 速度模式（eRPM）
    Rpm {
        #[arg(allow_negative_numbers = true)]
        rpm: f32,
        #[command(flatten)]
        run: RunArgs,
    },

    /// 位置模式（度）
    Position {
        #[arg(allow_negative_numbers = true)]
        degrees: f32,
        #[command(flatten)]
        run: RunArgs,
    },

    /// 位置 + 速度 + 加速度模式
    PositionSpeed {
        #[arg(allow_negative_numbers = true)]
        degrees: f32,
        /// 速度上限（eRPM / 10）
        #[arg(long)]
        speed: i32,
        /// 加速度上限（eRPM/s / 10）
        #[arg(long)]
        accel: i32,
        #[command(flatten)]
        run: RunArgs,
    },
}

impl DriveCommand {
    /// 对应的协议命令
    pub fn command(&self) -> Command {
        match *self {
            DriveCommand::Duty { duty, .. } => Command::Duty(duty),
            DriveCommand::Current { amps, .. } => Command::Current(amps),
            DriveCommand::Brake { amps, .. } => Command::Brake(amps),
            DriveCommand::Rpm { rpm, .. } => Command::Rpm(rpm),
            DriveCommand::Position { degrees, .. } => Command::Position(degrees),
            DriveCommand::PositionSpeed {
                degrees,
                speed,
                accel,
                ..
            } => Command::PositionSpeedAccel {
                degrees,
                speed,
                accel,
            },
        }
    }

    fn run_args(&self) -> &RunArgs {
        match self {
            DriveCommand::Duty { run, .. }
            | DriveCommand::Current { run, .. }
            | DriveCommand::Brake { run, .. }
            | DriveCommand::Rpm { run, .. }
            | DriveCommand::Position { run, .. }
            | DriveCommand::PositionSpeed { run, .. } => run,
        }
    }

    pub fn execute(self) -> Result<()> {
        let command = self.command();
        // 在打开硬件之前校验参数
        command.validate().with_context(|| format!("无效的命令 {command}"))?;

        let run = self.run_args();
        let settings = run.connect.resolve(&CliConfig::load()?)?;
        let motors = settings.connect()?;

        let outcome = drive(&motors, command, run.duration);
        let closed = super::close_all(&motors);
        println!("🛑 已停止");
        outcome.and(closed)
    }
}

fn drive(motors: &[Motor], command: Command, duration: Option<f64>) -> Result<()> {
    for motor in motors {
        motor
            .set_command(command)
            .with_context(|| format!("电机 {} 发送 {} 失败", motor.id(), command))?;
    }
    println!("▶️  {} ({} 个电机)", command, motors.len());

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    match deadline {
        Some(_) => println!("运行 {:.1} 秒，按 Ctrl+C 提前停止\n", duration.unwrap_or_default()),
        None => println!("按 Ctrl+C 停止\n"),
    }

    let running = interrupt_flag()?;
    let mut next_status = Instant::now();
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        if Instant::now() >= next_status {
            print_status(motors);
            next_status += STATUS_INTERVAL;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

/// 设置原点（单次命令）
#[derive(Args, Debug)]
pub struct OriginCommand {
    /// 0 = 临时原点，1 = 永久零点，2 = 恢复默认零点
    pub mode: u8,

    #[command(flatten)]
    pub connect: ConnectArgs,
}

impl OriginCommand {
    pub fn execute(self) -> Result<()> {
        let command = Command::Origin(self.mode);
        command.validate().context("无效的原点模式")?;

        let settings = self.connect.resolve(&CliConfig::load()?)?;
        let motors = settings.connect()?;

        let outcome = motors.iter().try_for_each(|motor| {
            motor
                .set_command(command)
                .with_context(|| format!("电机 {} 设置原点失败", motor.id()))
        });
        if outcome.is_ok() {
            // 等待控制循环发出命令
            std::thread::sleep(Duration::from_millis(50));
            println!("✅ 已发送 {}", command);
        }
        outcome.and(super::close_all(&motors))
    }
}

/// Ctrl+C 时清除的运行标志
pub fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
        println!("\n收到退出信号，正在关闭...");
    })
    .context("安装 Ctrl+C 处理器失败")?;
    Ok(running)
}

pub fn print_status(motors: &[Motor]) {
    for motor in motors {
        match motor.feedback() {
            Ok(feedback) => println!("[{:3}] {}", motor.id(), feedback),
            Err(_) => println!("[{:3}] (等待反馈)", motor.id()),
        }
    }
}
