//! 多电机共享总线演示
//!
//! 同一个 CAN 通道上的多个电机共享一个适配器：每个 `Motor` 持有连接的一份引用，
//! 最后一个电机关闭时适配器才真正关闭。`Motor` 是 `Send + Sync`，可以直接在线程间共享。

use clap::Parser;
use cubemars_sdk::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "multi_motor")]
#[command(about = "多电机共享总线演示 - 所有电机以相同速度运行，然后停止")]
struct Args {
    /// 接口类型（socketcan, slcan, mock）
    #[arg(long, default_value = "socketcan")]
    interface: InterfaceKind,

    /// 通道名称
    #[arg(long, default_value = "can0")]
    channel: String,

    /// 电机数量（ID 从 1 开始）
    #[arg(long, default_value = "4")]
    motors: u32,

    /// 速度（eRPM）
    #[arg(long, default_value = "2000")]
    rpm: f32,

    /// 运行时长（秒）
    #[arg(long, default_value = "3")]
    duration_sec: u64,
}

fn main() -> anyhow::Result<()> {
    cubemars_sdk::init_logger();
    let args = Args::parse();

    println!("⚙️  CubeMars SDK - 多电机演示");
    println!("=========================\n");

    let config = BusConfig::new(args.interface, args.channel.clone());
    let motors = (1..=args.motors)
        .map(|id| Motor::connect(&config, id).map(Arc::new))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(bus) = motors.first().and_then(|motor| motor.bus()) {
        println!("📡 {} 个电机共享连接 {} (refcount {})\n", motors.len(), bus.key(), bus.refcount());
    }

    // 每个电机一个线程发送命令，控制循环负责重发
    let workers: Vec<_> = motors
        .iter()
        .map(|motor| {
            let motor = motor.clone();
            let rpm = args.rpm;
            thread::spawn(move || motor.set_rpm(rpm))
        })
        .collect();
    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("command thread panicked"))??;
    }

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(args.duration_sec) {
        let line: Vec<String> = motors
            .iter()
            .map(|motor| match motor.feedback() {
                Ok(fb) => format!("M{}: {:7.0} eRPM", motor.id(), fb.velocity_erpm),
                Err(_) => format!("M{}: -------", motor.id()),
            })
            .collect();
        println!("{}", line.join(" | "));
        thread::sleep(Duration::from_millis(100));
    }

    println!("\n🛑 停止所有电机...");
    for motor in &motors {
        motor.close()?;
    }
    println!("✅ 完成");
    Ok(())
}
