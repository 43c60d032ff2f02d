//! 串口 CAN 适配器（Lawicel SLCAN 协议）
//!
//! 适用于 CANable、USBtin 等 USB-CDC 网关，命令以 ASCII 行传输，`\r` 结尾：
//!
//! | 命令 | 含义 |
//! |---|---|
//! | `C` | 关闭通道 |
//! | `S0`..`S8` | 设置波特率（10k..1M） |
//! | `O` | 打开通道 |
//! | `tIIIL<data>` | 标准帧 |
//! | `TIIIIIIIIL<data>` | 扩展帧 |
//!
//! 网关以 `\r` 应答成功，以 `\x07`（BEL）应答失败。

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, CubeFrame};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 串口波特率（USB-CDC 网关忽略该值，保留给真实 UART 网关）
pub const SERIAL_BAUDRATE: u32 = 115_200;

/// 串口读写超时
const SERIAL_TIMEOUT: Duration = Duration::from_millis(10);

/// 接收缓冲区上限：超过后丢弃（防止没有 `\r` 的垃圾数据无限累积）
const MAX_PENDING_BYTES: usize = 4096;

/// SLCAN 波特率代码
///
/// # 错误
/// - `CanDeviceErrorKind::UnsupportedConfig`: 不在标准表中的波特率
pub fn bitrate_code(bitrate: u32) -> Result<char, CanDeviceError> {
    let code = match bitrate {
        10_000 => '0',
        20_000 => '1',
        50_000 => '2',
        100_000 => '3',
        125_000 => '4',
        250_000 => '5',
        500_000 => '6',
        800_000 => '7',
        1_000_000 => '8',
        other => {
            return Err(CanDeviceError::new(
                CanDeviceErrorKind::UnsupportedConfig,
                format!("SLCAN does not support bitrate {other}"),
            ));
        },
    };
    Ok(code)
}

/// 编码一帧为 SLCAN 命令（含结尾 `\r`）
pub fn encode_slcan(frame: &CubeFrame) -> String {
    let data = hex::encode_upper(frame.data_slice());
    if frame.is_extended {
        format!("T{:08X}{}{}\r", frame.id, frame.len, data)
    } else {
        format!("t{:03X}{}{}\r", frame.id, frame.len, data)
    }
}

/// 解析一行 SLCAN 数据（不含 `\r`），非数据帧返回 `None`
pub fn parse_slcan_line(line: &[u8]) -> Option<CubeFrame> {
    let (&kind, rest) = line.split_first()?;
    let id_len = match kind {
        b'T' => 8,
        b't' => 3,
        _ => return None,
    };
    let id_field = rest.get(..id_len)?;
    if !id_field.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    // 已确认全部是 ASCII 十六进制字符
    let id = u32::from_str_radix(std::str::from_utf8(id_field).ok()?, 16).ok()?;

    let dlc = match *rest.get(id_len)? {
        digit @ b'0'..=b'8' => usize::from(digit - b'0'),
        _ => return None,
    };
    let hex_data = rest.get(id_len + 1..id_len + 1 + dlc * 2)?;
    let data = hex::decode(hex_data).ok()?;

    if kind == b'T' {
        Some(CubeFrame::new_extended(id, &data))
    } else {
        Some(CubeFrame::new_standard(u16::try_from(id).ok()?, &data))
    }
}

/// SLCAN 适配器
pub struct SlcanAdapter {
    port: Option<Box<dyn SerialPort>>,
    path: String,
    pending: Vec<u8>,
}

impl std::fmt::Debug for SlcanAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlcanAdapter")
            .field("path", &self.path)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SlcanAdapter {
    /// 打开串口并初始化通道：`C` → `S<n>` → `O`
    ///
    /// # 错误
    /// - `CanError::Device`: 串口不存在/被占用，或波特率不受支持
    /// - `CanError::Io`: 写入初始化命令失败
    pub fn open(path: &str, bitrate: u32) -> Result<Self, CanError> {
        let code = bitrate_code(bitrate)?;

        let port = serialport::new(path, SERIAL_BAUDRATE)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| {
                let kind = match e.kind() {
                    serialport::ErrorKind::NoDevice => CanDeviceErrorKind::NoDevice,
                    serialport::ErrorKind::Io(ErrorKind::NotFound) => CanDeviceErrorKind::NotFound,
                    serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                        CanDeviceErrorKind::AccessDenied
                    },
                    _ => CanDeviceErrorKind::Backend,
                };
                CanError::Device(CanDeviceError::new(
                    kind,
                    format!("Failed to open serial port '{path}': {e}"),
                ))
            })?;

        let mut adapter = Self {
            port: Some(port),
            path: path.to_string(),
            pending: Vec::with_capacity(64),
        };

        // 先关闭（上次进程可能没有正常退出）
        adapter.write_command("C")?;
        adapter.write_command(&format!("S{code}"))?;
        adapter.write_command("O")?;
        // 丢弃初始化应答
        adapter.drain_input()?;

        debug!("SLCAN channel opened on '{}' @ {} bps", path, bitrate);
        Ok(adapter)
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, CanError> {
        self.port.as_mut().ok_or(CanError::NotStarted)
    }

    fn write_command(&mut self, command: &str) -> Result<(), CanError> {
        let port = self.port()?;
        port.write_all(command.as_bytes())?;
        port.write_all(b"\r")?;
        port.flush()?;
        Ok(())
    }

    /// 把串口中已到达的字节全部读入 `pending`（不阻塞）
    fn drain_input(&mut self) -> Result<(), CanError> {
        let port = self.port()?;
        let available = port.bytes_to_read().map_err(|e| {
            CanError::Device(CanDeviceError::new(CanDeviceErrorKind::Backend, e.to_string()))
        })? as usize;
        if available == 0 {
            return Ok(());
        }

        let mut buf = vec![0u8; available];
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) => return Err(CanError::Io(e)),
        };
        self.pending.extend_from_slice(&buf[..n]);

        if self.pending.len() > MAX_PENDING_BYTES {
            warn!("SLCAN '{}': discarding {} unterminated bytes", self.path, self.pending.len());
            self.pending.clear();
        }
        Ok(())
    }

    /// 从 `pending` 中取出下一帧，跳过应答和无法解析的行
    fn next_pending_frame(&mut self) -> Option<CubeFrame> {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\r' || b == 0x07) {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            match parse_slcan_line(line) {
                Some(frame) => return Some(frame),
                None => trace!("SLCAN '{}': skipping line {:?}", self.path, line),
            }
        }
        None
    }
}

impl CanAdapter for SlcanAdapter {
    fn send(&mut self, frame: CubeFrame) -> Result<(), CanError> {
        let command = encode_slcan(&frame);
        let port = self.port()?;
        match port.write_all(command.as_bytes()) {
            Ok(()) => {
                trace!("Sent SLCAN frame: {}", command.trim_end());
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(CanError::BufferOverflow),
            Err(e) => Err(CanError::Io(e)),
        }
    }

    fn try_receive(&mut self) -> Result<Option<CubeFrame>, CanError> {
        if let Some(frame) = self.next_pending_frame() {
            return Ok(Some(frame));
        }
        self.drain_input()?;
        Ok(self.next_pending_frame())
    }

    fn close(&mut self) {
        if self.port.is_some() {
            if let Err(e) = self.write_command("C") {
                warn!("SLCAN '{}': failed to close channel: {}", self.path, e);
            }
            self.port = None;
            debug!("SLCAN channel on '{}' closed", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_codes() {
        assert_eq!(bitrate_code(1_000_000).unwrap(), '8');
        assert_eq!(bitrate_code(500_000).unwrap(), '6');
        assert_eq!(bitrate_code(10_000).unwrap(), '0');
        let err = bitrate_code(333_333).unwrap_err();
        assert_eq!(err.kind, CanDeviceErrorKind::UnsupportedConfig);
    }

    #[test]
    fn test_encode_extended() {
        let frame = CubeFrame::new_extended(0x305, &[0x00, 0x00, 0x01, 0xF4]);
        assert_eq!(encode_slcan(&frame), "T0000030540000001F4\r");
    }

    #[test]
    fn test_encode_standard() {
        let frame = CubeFrame::new_standard(0x123, &[0xAB]);
        assert_eq!(encode_slcan(&frame), "t1231AB\r");
    }

    #[test]
    fn test_parse_extended_line() {
        let frame = parse_slcan_line(b"T0000290180384FF6A00192300").unwrap();
        assert!(frame.is_extended);
        assert_eq!(frame.id, 0x2901);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data_slice(), &[0x03, 0x84, 0xFF, 0x6A, 0x00, 0x19, 0x23, 0x00]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_slcan_line(b"").is_none());
        assert!(parse_slcan_line(b"z").is_none());
        assert!(parse_slcan_line(b"T00002901").is_none());
        // DLC 声明 8 字节但数据不足
        assert!(parse_slcan_line(b"T000029018AABB").is_none());
        assert!(parse_slcan_line(b"T000029019").is_none());
        // 串口噪声：ID 字段中的多字节 UTF-8 字符
        assert!(parse_slcan_line("T0000029é80000000000000000".as_bytes()).is_none());
        assert!(parse_slcan_line("té1".as_bytes()).is_none());
        assert!(parse_slcan_line(b"T\xFF\xFE000029018").is_none());
        // `+` 不是合法的 ID 字符
        assert!(parse_slcan_line(b"T+00029018AABBCCDDEEFF0011").is_none());
        assert!(parse_slcan_line(b"T00002901x").is_none());
    }

    #[test]
    fn test_encode_then_parse_preserves_frame() {
        let frame = CubeFrame::new_extended(0x6FF, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let line = encode_slcan(&frame);
        let parsed = parse_slcan_line(line.trim_end().as_bytes()).unwrap();
        assert_eq!(parsed, frame);
    }
}
