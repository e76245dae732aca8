//! Line rewriter for `pg_restore` output.
//!
//! Turns a data-only restore stream into one that can be replayed over an
//! existing schema:
//! - the whole load runs in one transaction with deferred constraints
//! - every `COPY` is preceded by a `DELETE FROM <table> WHERE 1=1;`
//! - the restore tool's first `SET search_path` is dropped so it cannot
//!   override the caller's schema

mod patterns;

pub use patterns::{classify, LineKind};

use serde::Serialize;
use std::io::{self, BufRead, Write};

pub const DEFAULT_SCHEMA: &str = "sde";

const EPILOGUE: &[&str] = &["COMMIT;", "VACUUM FULL;"];
const ROLLBACK: &str = "ROLLBACK;";

/// Statistics from a rewrite run
#[derive(Debug, Default, Clone, Serialize)]
pub struct RewriteStats {
    /// Lines read from the restore stream
    pub lines_read: u64,
    /// Lines emitted, framing included
    pub lines_written: u64,
    /// Bytes read from the restore stream
    pub bytes_read: u64,
    /// Tables emptied before their COPY, in stream order
    pub tables_truncated: Vec<String>,
    /// Whether the restore tool's own search_path line was dropped
    pub search_path_suppressed: bool,
}

pub struct StreamRewriter {
    schema: String,
    search_path_suppressed: bool,
    stats: RewriteStats,
}

impl StreamRewriter {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            search_path_suppressed: false,
            stats: RewriteStats::default(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    pub fn into_stats(self) -> RewriteStats {
        self.stats
    }

    /// Statements emitted before the first input line.
    pub fn prologue(&self) -> Vec<String> {
        vec![
            format!("SET search_path TO {}, public;", self.schema),
            "BEGIN;".to_string(),
            "SET CONSTRAINTS ALL DEFERRED;".to_string(),
        ]
    }

    pub fn write_prologue<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        for stmt in self.prologue() {
            self.write_generated(writer, &stmt)?;
        }
        Ok(())
    }

    /// Commit and vacuum, written once the restore stream ended cleanly.
    pub fn write_epilogue<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        for stmt in EPILOGUE {
            self.write_generated(writer, stmt)?;
        }
        Ok(())
    }

    /// Written in place of the epilogue when an upstream stage failed.
    pub fn write_rollback<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.write_generated(writer, ROLLBACK)
    }

    fn write_generated<W: Write>(&mut self, writer: &mut W, stmt: &str) -> io::Result<()> {
        writer.write_all(stmt.as_bytes())?;
        writer.write_all(b"\n")?;
        self.stats.lines_written += 1;
        Ok(())
    }

    /// Lazily rewrite the body of a restore stream.
    ///
    /// Each item is one output line including its terminator. The input is
    /// consumed exactly once; framing is not included.
    pub fn body<R: BufRead>(&mut self, input: R) -> Body<'_, R> {
        Body {
            rewriter: self,
            input,
            pending: None,
        }
    }

    /// Rewrite the body of `input` into `writer`, returning bytes written.
    pub fn rewrite_body<R: BufRead, W: Write>(
        &mut self,
        input: R,
        writer: &mut W,
    ) -> io::Result<u64> {
        let mut written = 0u64;
        for line in self.body(input) {
            let line = line?;
            writer.write_all(&line)?;
            written += line.len() as u64;
        }
        Ok(written)
    }

    /// Prologue, rewritten body and epilogue in one go.
    pub fn rewrite_all<R: BufRead, W: Write>(&mut self, input: R, writer: &mut W) -> io::Result<()> {
        self.write_prologue(writer)?;
        self.rewrite_body(input, writer)?;
        self.write_epilogue(writer)
    }

    /// Apply the rewrite rules to one input line. Returns the DELETE to emit
    /// ahead of the line (if any) and whether the line itself is kept.
    fn apply(&mut self, line: &[u8]) -> (Option<Vec<u8>>, bool) {
        match classify(line) {
            LineKind::CopyStart { table } => {
                let mut delete = Vec::with_capacity(table.len() + 24);
                delete.extend_from_slice(b"DELETE FROM ");
                delete.extend_from_slice(table);
                delete.extend_from_slice(b" WHERE 1=1;\n");

                let name = String::from_utf8_lossy(table).into_owned();
                log::debug!("emptying table {} before COPY", name);
                self.stats.tables_truncated.push(name);
                (Some(delete), true)
            }
            LineKind::SearchPath if !self.search_path_suppressed => {
                log::debug!(
                    "dropping restore search_path: {}",
                    String::from_utf8_lossy(line).trim_end()
                );
                self.search_path_suppressed = true;
                self.stats.search_path_suppressed = true;
                (None, false)
            }
            _ => (None, true),
        }
    }
}

/// Iterator over the rewritten body lines of a restore stream.
pub struct Body<'a, R: BufRead> {
    rewriter: &'a mut StreamRewriter,
    input: R,
    pending: Option<Vec<u8>>,
}

impl<R: BufRead> Iterator for Body<'_, R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(line) = self.pending.take() {
            self.rewriter.stats.lines_written += 1;
            return Some(Ok(line));
        }

        loop {
            let mut line = Vec::new();
            match self.input.read_until(b'\n', &mut line) {
                Ok(0) => return None,
                Ok(n) => {
                    self.rewriter.stats.lines_read += 1;
                    self.rewriter.stats.bytes_read += n as u64;
                }
                Err(e) => return Some(Err(e)),
            }

            if !line.ends_with(b"\n") {
                line.push(b'\n');
            }

            match self.rewriter.apply(&line) {
                (Some(delete), _) => {
                    self.pending = Some(line);
                    self.rewriter.stats.lines_written += 1;
                    return Some(Ok(delete));
                }
                (None, true) => {
                    self.rewriter.stats.lines_written += 1;
                    return Some(Ok(line));
                }
                (None, false) => continue,
            }
        }
    }
}
