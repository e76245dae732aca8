//! Byte-based progress tracking for the dump input.
//!
//! `ProgressReader` sits between the dump file and the decompressor, so the
//! count it reports is in compressed bytes and lines up with the file size.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;

/// A reader wrapper that tracks bytes read and calls a progress callback.
///
/// The callback must be `Send` because the wrapped reader is consumed on the
/// thread that feeds the restore tool.
pub struct ProgressReader<R: Read> {
    reader: R,
    callback: Box<dyn Fn(u64) + Send>,
    bytes_read: u64,
}

impl<R: Read> ProgressReader<R> {
    /// Create a new ProgressReader wrapping the given reader.
    ///
    /// The callback will be called with the total bytes read so far
    /// after each successful read operation.
    pub fn new<F>(reader: R, callback: F) -> Self
    where
        F: Fn(u64) + Send + 'static,
    {
        Self {
            reader,
            callback: Box::new(callback),
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.bytes_read += n as u64;
        (self.callback)(self.bytes_read);
        Ok(n)
    }
}

/// Progress bar sized to the compressed dump, drawn on stderr.
pub fn dump_progress_bar(total_bytes: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_bytes);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▓▒░  ")
    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    pb.set_style(style);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("Restoring dump...");
    pb
}
