use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::println;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // red
            Level::Warn => 93,  // bright yellow
            Level::Info => 34,  // blue
            Level::Debug => 32, // green
            Level::Trace => 90, // dark gray
        };
        println!(
            "\x1b[{}m[{:>5}] [{}] {}\x1b[0m",
            color,
            record.level(),
            record.target(),
            record.args(),
        );
    }

    fn flush(&self) {}
}

pub fn init() {
    log::set_logger(&LOGGER).expect("logger: already set");
    let level = if cfg!(feature = "trap-debug") || cfg!(feature = "fs-debug") {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    log::set_max_level(level);
}
