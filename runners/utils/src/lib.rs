//! 训练与评估入口共享的通用组件.

use anyhow::Result;
use log::LevelFilter;
use simple_logger::SimpleLogger;

pub mod config;
pub mod loader;

pub use config::RunConfig;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 初始化日志. `level` 为 `error`, `warn`, `info`, `debug`, `trace` 之一,
/// 可被环境变量 `RUST_LOG` 覆盖.
pub fn init_logger(level: &str) -> Result<()> {
    let level: LevelFilter = level.parse()?;
    SimpleLogger::new().with_level(level).env().init()?;
    Ok(())
}

/// 当前本地时间, 形如 `10-16-09-30-00`, 用于保存目录名.
pub fn timestamp() -> String {
    chrono::Local::now().format("%m-%d-%H-%M-%S").to_string()
}
