//! 控制台日志: 每条日志输出为 `[时间戳] 级别: 内容`, 输出到 stderr.

use chrono::Local;
use lazy_static::*;
use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

struct ConsoleLogger {
    /// 避免多条日志交错输出
    record_lock: Mutex<()>,
}

lazy_static! {
    static ref LOGGER: ConsoleLogger = ConsoleLogger {
        record_lock: Mutex::new(()),
    };
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let _guard = self.record_lock.lock();
        eprintln!("[{}] {:<5}: {}", timestamp, record.level(), record.args());
    }

    fn flush(&self) {}
}

/// 安装日志. 重复调用时保留第一次安装的日志, 只更新级别.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&*LOGGER);
    log::set_max_level(level);
}
