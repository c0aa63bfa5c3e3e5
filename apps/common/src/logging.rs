use ansi_term::Color::{Blue, Cyan, Green, Red, Yellow};
use log::{Level, Log, Metadata, Record};
use once_cell::sync::Lazy;
use web_time::Instant;

static START: Lazy<Instant> = Lazy::new(Instant::now);

/// Console logger shared by the apps. Lines carry the time since start,
/// the thread name and the source location.
pub struct CommonLogger;

impl CommonLogger {
    /// Installs the logger and sets the max level. Safe to call more than once.
    pub fn init(level: log::LevelFilter) {
        Lazy::force(&START);
        if log::set_logger(&CommonLogger).is_ok() {
            log::set_max_level(level);
        }
    }
}

fn colored_level(level: Level) -> ansi_term::Colour {
    match level {
        Level::Error => Red,
        Level::Warn => Yellow,
        Level::Info => Green,
        Level::Debug => Blue,
        Level::Trace => Cyan,
    }
}

impl Log for CommonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let elapsed = format!("{:>10.3}s", START.elapsed().as_secs_f64());

            println!(
                "[{}][{:>19}][{:>14}]: {} [{}:{}]",
                Cyan.paint(elapsed),
                Yellow
                    .paint(std::thread::current().name().unwrap_or("main"))
                    .to_string(),
                colored_level(record.level())
                    .paint(record.level().to_string())
                    .to_string(),
                record.args(),
                Green.paint(record.file().unwrap_or("unknown")),
                Green.paint(record.line().unwrap_or(0).to_string())
            );
        }
    }

    fn flush(&self) {}
}
