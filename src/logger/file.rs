/// File sink for the logger: one file per process start under the logs directory
use chrono::Local;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

static LOG_FILE: Lazy<Mutex<Option<BufWriter<File>>>> = Lazy::new(|| Mutex::new(None));

pub fn init_file_logging(log_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let name = format!("hyperion_guard_{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(name))?;
    *LOG_FILE.lock() = Some(BufWriter::new(file));
    Ok(())
}

pub fn write_to_file(line: &str) {
    if !super::config::get_logger_config().file_logging {
        return;
    }
    let mut guard = LOG_FILE.lock();
    if let Some(writer) = guard.as_mut() {
        let _ = writeln!(writer, "{}", line);
    }
}

pub fn flush_file_logging() {
    if let Some(writer) = LOG_FILE.lock().as_mut() {
        let _ = writer.flush();
    }
}
