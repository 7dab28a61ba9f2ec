//! patch 生命周期实验: 一轮队列采样, 以及逐 subject 的
//! 补零 -> 顺序采样 -> 聚合 (union) -> 去补零 往返重建.

mod phantom;
mod result;
mod runner;

use log::LevelFilter;
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .expect("Logger initialization error");

    runner::run().analyze();
}
