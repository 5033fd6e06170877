//! Log output for the simulator, written to standard error.

use std::io::{self, Write};

use log::LevelFilter;
use spin::Once;

pub struct Console {
    level: LevelFilter,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger, showing records up to `level`.
    pub fn init(level: LevelFilter) -> &'static Self {
        let console = DEFAULT.call_once(|| Console { level });
        console.install();
        console
    }

    fn install(&'static self) {
        if log::set_logger(self).is_ok() {
            log::set_max_level(self.level);
        }
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = io::stderr().lock();
        // Nowhere left to report a failed write to stderr.
        let _ = write_log_entry_to(&mut stderr, record);
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> io::Result<()> {
    #[cfg(debug_assertions)]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(debug_assertions))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
