//! Logger setup shared by the binaries.

use chrono::Local;
use log::LevelFilter;
use std::io::Write;

/// Log to stderr as `YYYY-mm-ddTHH:MM:SS [LEVEL] - message`, at Info, or
/// Debug when `verbose`.
pub fn init_log(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .try_init();
}
