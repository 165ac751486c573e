//! 遥测转发
//!
//! 每个周期发送一个定长 20 字节的小包（尽力而为，发送失败直接忽略）。
//!
//! ```text
//! 0          4                8                12               16    20
//! | sequence | count_received | motor_position | joint_position | iq |
//! ```
//!
//! 数值取自第 0 号设备，全部 little-endian。

use crate::history::HistoryRecord;
use bytes::{BufMut, BytesMut};
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{info, trace};

pub const TELEMETRY_PACKET_SIZE: usize = 20;

/// 遥测输出
pub trait TelemetrySink: Send {
    /// 发送一个周期的遥测包，失败必须被实现方吞掉
    fn send(&mut self, record: &HistoryRecord);
}

/// 编码遥测包
pub fn encode_packet(record: &HistoryRecord) -> [u8; TELEMETRY_PACKET_SIZE] {
    let status = record.statuses().first().copied().unwrap_or_default();

    let mut buf = BytesMut::with_capacity(TELEMETRY_PACKET_SIZE);
    buf.put_u32_le(record.sequence);
    buf.put_u32_le(record.count_received);
    buf.put_f32_le(status.motor_position);
    buf.put_f32_le(status.joint_position);
    buf.put_f32_le(status.iq);

    let mut packet = [0u8; TELEMETRY_PACKET_SIZE];
    packet.copy_from_slice(&buf);
    packet
}

/// TCP 遥测：连接一次，之后以非阻塞方式发送
pub struct TcpTelemetry {
    stream: TcpStream,
    dropped: u64,
}

impl TcpTelemetry {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("Telemetry connected to {}", peer);
        }
        Ok(Self { stream, dropped: 0 })
    }

    /// 发送失败（或缓冲区满）被丢弃的包数
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl TelemetrySink for TcpTelemetry {
    fn send(&mut self, record: &HistoryRecord) {
        let packet = encode_packet(record);
        match self.stream.write(&packet) {
            Ok(TELEMETRY_PACKET_SIZE) => {},
            Ok(_) | Err(_) => {
                self.dropped += 1;
                trace!("Telemetry packet {} dropped", record.sequence);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motor_protocol::{Command, Status};
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Instant;

    fn sample_record() -> HistoryRecord {
        let mut record = HistoryRecord::new(Instant::now());
        record.sequence = 7;
        record.count_received = 6;
        let status = Status {
            motor_position: 1.0,
            joint_position: 2.0,
            iq: 3.0,
            ..Default::default()
        };
        record.fill(&[status], &[Command::default()]);
        record
    }

    #[test]
    fn test_packet_layout() {
        let packet = encode_packet(&sample_record());
        assert_eq!(&packet[0..4], &7u32.to_le_bytes());
        assert_eq!(&packet[4..8], &6u32.to_le_bytes());
        assert_eq!(&packet[8..12], &1.0f32.to_le_bytes());
        assert_eq!(&packet[12..16], &2.0f32.to_le_bytes());
        assert_eq!(&packet[16..20], &3.0f32.to_le_bytes());
    }

    #[test]
    fn test_packet_without_motors_is_zeroed() {
        let record = HistoryRecord::new(Instant::now());
        assert_eq!(encode_packet(&record), [0u8; TELEMETRY_PACKET_SIZE]);
    }

    #[test]
    fn test_tcp_telemetry_delivers_packet() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut sink = TcpTelemetry::connect(addr).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        sink.send(&sample_record());

        let mut buf = [0u8; TELEMETRY_PACKET_SIZE];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(buf, encode_packet(&sample_record()));
        assert_eq!(sink.dropped(), 0);
    }
}
