//! JBOD 的网络传输: 一个基于字节流的请求/应答协议.
//!
//! 每个数据包由 5 字节的包头和可选的一个块的负载组成:
//!
//! ```text
//! +----------------------+-----------+---------------------------+
//! | opcode (u32, 大端)   | info (u8) | payload (BLOCK_SIZE, 可选) |
//! +----------------------+-----------+---------------------------+
//! ```
//!
//! - info 的第 0 位 (只在应答中使用): 命令执行失败
//! - info 的第 1 位: 包头之后跟着一个块的负载
//!
//! 请求中只有 WriteBlock 带负载, 应答中只有成功的 ReadBlock 带负载.
//! 客户端一次只有一个未完成的请求, 应答的操作码必须和请求的操作码一致.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
};

use log::{debug, info, warn};

use super::{Block, Command, JbodError, Opcode, Result, Transport, BLOCK_SIZE};

pub const HEADER_LEN: usize = 5;
const INFO_FAILED: u8 = 0b01;
const INFO_PAYLOAD: u8 = 0b10;

struct Packet {
    op: Opcode,
    info: u8,
    payload: Option<Block>,
}

fn write_packet(w: &mut impl Write, op: Opcode, info: u8, payload: Option<&Block>) -> Result<()> {
    let mut packet = Vec::with_capacity(HEADER_LEN + BLOCK_SIZE);
    packet.extend_from_slice(&op.raw().to_be_bytes());
    match payload {
        Some(block) => {
            packet.push(info | INFO_PAYLOAD);
            packet.extend_from_slice(block);
        }
        None => packet.push(info & !INFO_PAYLOAD),
    }
    w.write_all(&packet)?;
    w.flush()?;
    Ok(())
}

/// 对端在包头之前 (或者包头中间) 关闭连接时返回 None
fn read_packet(r: &mut impl Read) -> Result<Option<Packet>> {
    let mut header = [0u8; HEADER_LEN];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let op = Opcode::from_raw(u32::from_be_bytes([
        header[0], header[1], header[2], header[3],
    ]));
    let info = header[4];
    let payload = if info & INFO_PAYLOAD != 0 {
        let mut block = [0u8; BLOCK_SIZE];
        r.read_exact(&mut block)?;
        Some(block)
    } else {
        None
    };
    Ok(Some(Packet { op, info, payload }))
}

/// 通过 TCP 连接访问远端的 JBOD
pub struct JbodClient {
    stream: TcpStream,
}

impl JbodClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        info!("connected to JBOD server {}", stream.peer_addr()?);
        Ok(Self { stream })
    }
}

impl Transport for JbodClient {
    fn execute(&mut self, op: Opcode, block: Option<&mut Block>) -> Result<()> {
        let command = op.command();
        let payload = match command {
            Some(Command::WriteBlock) => Some(
                block
                    .as_deref()
                    .ok_or_else(|| JbodError::Protocol(format!("{} without a block", op)))?,
            ),
            _ => None,
        };
        write_packet(&mut self.stream, op, 0, payload)?;

        let response = read_packet(&mut self.stream)?
            .ok_or_else(|| JbodError::Protocol("server closed the connection".into()))?;
        if response.op != op {
            return Err(JbodError::Protocol(format!(
                "response to {} carries opcode {}",
                op, response.op
            )));
        }
        if response.info & INFO_FAILED != 0 {
            return Err(JbodError::Rejected {
                op,
                reason: "remote JBOD reported failure",
            });
        }
        match (command, response.payload, block) {
            (Some(Command::ReadBlock), Some(data), Some(buf)) => buf.copy_from_slice(&data),
            (Some(Command::ReadBlock), None, _) => {
                return Err(JbodError::Protocol(format!("{} answered without data", op)))
            }
            _ => {}
        }
        Ok(())
    }
}

/// JBOD 服务端: 在本地的 JBOD 上执行客户端发来的命令.
///
/// 一次只服务一个连接, 前一个客户端断开之后才接受下一个.
pub struct JbodServer {
    listener: TcpListener,
}

impl JbodServer {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!("JBOD server listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 处理一个连接, 直到客户端断开
    pub fn serve_one(&self, device: &mut impl Transport) -> Result<()> {
        let (stream, peer) = self.listener.accept()?;
        Self::handle(stream, peer, device)
    }

    /// 依次处理所有连接. 单个连接上的错误只会断开这个连接,
    /// accept 本身失败时返回错误.
    pub fn serve(&self, device: &mut impl Transport) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept()?;
            if let Err(err) = Self::handle(stream, peer, device) {
                warn!("connection with {} dropped: {}", peer, err);
            }
        }
    }

    fn handle(stream: TcpStream, peer: SocketAddr, device: &mut impl Transport) -> Result<()> {
        info!("client {} connected", peer);
        serve_connection(stream, device)?;
        info!("client {} disconnected", peer);
        Ok(())
    }
}

fn serve_connection(mut stream: impl Read + Write, device: &mut impl Transport) -> Result<()> {
    while let Some(request) = read_packet(&mut stream)? {
        let op = request.op;
        let mut block = request.payload.unwrap_or([0u8; BLOCK_SIZE]);
        let command = op.command();
        let result = match command {
            Some(Command::ReadBlock) | Some(Command::WriteBlock) => {
                device.execute(op, Some(&mut block))
            }
            _ => device.execute(op, None),
        };
        match result {
            Ok(()) if command == Some(Command::ReadBlock) => {
                write_packet(&mut stream, op, 0, Some(&block))?
            }
            Ok(()) => write_packet(&mut stream, op, 0, None)?,
            Err(err) => {
                debug!("{} failed: {}", op, err);
                write_packet(&mut stream, op, INFO_FAILED, None)?
            }
        }
    }
    Ok(())
}
