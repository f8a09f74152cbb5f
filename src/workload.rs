//! 工作负载: 从文本 trace 中解析出一系列卷操作并依次执行, 或者随机生成一个工作负载.
//!
//! trace 每行一个操作, `#` 开头的行和空行被忽略:
//!
//! ```text
//! MOUNT
//! WRITE_PERMIT
//! WRITE 1024 300 171      # 地址 长度 填充字节
//! READ 1000 64            # 地址 长度
//! WRITE_PERMIT_REVOKE
//! UNMOUNT
//! ```

use log::{debug, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::jbod::{JbodError, Result, Transport, Volume, BLOCK_SIZE, MAX_IO_LEN};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TraceOp {
    Mount,
    Unmount,
    WritePermit,
    WritePermitRevoke,
    Read { addr: u32, len: usize },
    Write { addr: u32, len: usize, byte: u8 },
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceOp>> {
    let mut ops = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let bad = |detail: String| JbodError::Trace {
            line: idx + 1,
            detail,
        };
        let mut fields = line.split_whitespace();
        let name = fields.next().unwrap_or("");
        let args = fields
            .map(|field| {
                field
                    .parse::<u32>()
                    .map_err(|_| bad(format!("{:?} is not a number", field)))
            })
            .collect::<Result<Vec<u32>>>()?;
        let op = match (name, args.as_slice()) {
            ("MOUNT", []) => TraceOp::Mount,
            ("UNMOUNT", []) => TraceOp::Unmount,
            ("WRITE_PERMIT", []) => TraceOp::WritePermit,
            ("WRITE_PERMIT_REVOKE", []) => TraceOp::WritePermitRevoke,
            ("READ", [addr, len]) => TraceOp::Read {
                addr: *addr,
                len: *len as usize,
            },
            ("WRITE", [addr, len, byte]) => TraceOp::Write {
                addr: *addr,
                len: *len as usize,
                byte: u8::try_from(*byte)
                    .map_err(|_| bad(format!("fill byte {} does not fit in a byte", byte)))?,
            },
            _ => return Err(bad(format!("unrecognised operation {:?}", line))),
        };
        ops.push(op);
    }
    Ok(ops)
}

/// 执行一个工作负载的结果
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Report {
    pub ops: usize,
    /// 失败的操作数. trace 中可以有意包含会失败的操作, 失败不会中止执行
    pub failures: usize,
    pub bytes_read: usize,
    pub bytes_written: usize,
}

pub fn replay<T: Transport>(volume: &mut Volume<T>, ops: &[TraceOp]) -> Report {
    let mut report = Report::default();
    let mut buf = vec![0u8; MAX_IO_LEN];
    for op in ops {
        report.ops += 1;
        let result = match *op {
            TraceOp::Mount => volume.mount().map(|_| 0),
            TraceOp::Unmount => volume.unmount().map(|_| 0),
            TraceOp::WritePermit => volume.grant_write().map(|_| 0),
            TraceOp::WritePermitRevoke => volume.revoke_write().map(|_| 0),
            TraceOp::Read { addr, len } => {
                if len > buf.len() {
                    buf.resize(len, 0);
                }
                volume.read(addr, &mut buf[..len]).map(|n| {
                    report.bytes_read += n;
                    n
                })
            }
            TraceOp::Write { addr, len, byte } => {
                if len > buf.len() {
                    buf.resize(len, 0);
                }
                buf[..len].fill(byte);
                volume.write(addr, &buf[..len]).map(|n| {
                    report.bytes_written += n;
                    n
                })
            }
        };
        match result {
            Ok(n) => debug!("{:?}: {} bytes", op, n),
            Err(err) => {
                warn!("{:?} failed: {}", op, err);
                report.failures += 1;
            }
        }
    }
    report
}

/// 随机生成的工作负载: 大部分访问落在前 hot_blocks 个块上, 让缓存有机会命中.
///
/// hot_blocks 和 capacity 都不能为 0.
pub fn random_trace(
    ops: usize,
    capacity: u64,
    hot_blocks: u32,
    seed: u64,
) -> Result<Vec<TraceOp>> {
    if hot_blocks == 0 {
        return Err(JbodError::Geometry("hot set needs at least one block".into()));
    }
    if capacity == 0 {
        return Err(JbodError::Geometry("empty address space".into()));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let hot_span = (hot_blocks as u64 * BLOCK_SIZE as u64).min(capacity);
    let mut trace = vec![TraceOp::Mount, TraceOp::WritePermit];
    for _ in 0..ops {
        let span = if rng.gen_bool(0.8) { hot_span } else { capacity };
        let len = rng.gen_range(1..=MAX_IO_LEN.min(span as usize));
        let addr = rng.gen_range(0..=span - len as u64) as u32;
        if rng.gen_bool(0.7) {
            trace.push(TraceOp::Read { addr, len });
        } else {
            trace.push(TraceOp::Write {
                addr,
                len,
                byte: rng.gen(),
            });
        }
    }
    trace.push(TraceOp::WritePermitRevoke);
    trace.push(TraceOp::Unmount);
    Ok(trace)
}
