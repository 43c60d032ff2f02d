//! 反馈监控命令
//!
//! 只注册电机、不发送任何命令，按固定频率打印最新反馈和连接统计。

use super::ConnectArgs;
use super::config::CliConfig;
use super::drive::{interrupt_flag, print_status};
use anyhow::{Result, bail};
use clap::Args;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// 监控命令参数
#[derive(Args, Debug)]
pub struct MonitorCommand {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// 刷新频率（Hz）
    #[arg(short, long, default_value_t = 10)]
    pub rate: u32,

    /// 持续时间（秒），不指定时运行到 Ctrl+C
    #[arg(short, long)]
    pub duration: Option<f64>,
}

impl MonitorCommand {
    pub fn execute(self) -> Result<()> {
        if self.rate == 0 || self.rate > 1000 {
            bail!("刷新频率必须在 1-1000 Hz 之间 (got {})", self.rate);
        }

        let settings = self.connect.resolve(&CliConfig::load()?)?;
        let motors = settings.connect()?;
        let bus = motors.first().and_then(|motor| motor.bus());

        println!("📊 监控中 ({} Hz)...", self.rate);
        println!("按 Ctrl+C 停止\n");

        let running = interrupt_flag()?;
        let period = Duration::from_secs_f64(1.0 / f64::from(self.rate));
        let deadline = self
            .duration
            .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));

        while running.load(Ordering::SeqCst) {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            print_status(&motors);
            std::thread::sleep(period);
        }

        if let Some(bus) = bus {
            let metrics = bus.metrics();
            println!(
                "\n统计: ticks={} tx={} tx_err={} rx={} accepted={} dropped={}",
                metrics.ticks,
                metrics.tx_frames,
                metrics.tx_errors,
                metrics.rx_frames,
                metrics.rx_accepted,
                metrics.rx_dropped
            );
            if let Some(fault) = bus.last_error() {
                println!("最近错误 (共 {} 次): {}", fault.count, fault.message);
            }
            bus.close()?;
        }

        super::close_all(&motors)
    }
}
