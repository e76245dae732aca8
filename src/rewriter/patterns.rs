//! Classification of `pg_restore` output lines.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

// ASCII mode: `\s`/`\S` work on raw bytes so non-UTF-8 identifiers still match.
static COPY_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)^COPY\s+(\S+)").expect("COPY pattern is valid")
});

static SEARCH_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)^SET search_path").expect("search_path pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `COPY <table> ...` starting a bulk load
    CopyStart { table: &'a [u8] },
    /// `SET search_path ...`
    SearchPath,
    Other,
}

/// Classify a single line. Both patterns are anchored at the start of the line.
pub fn classify(line: &[u8]) -> LineKind<'_> {
    if let Some(caps) = COPY_START_RE.captures(line) {
        if let Some(m) = caps.get(1) {
            return LineKind::CopyStart {
                table: &line[m.start()..m.end()],
            };
        }
    }

    if SEARCH_PATH_RE.is_match(line) {
        return LineKind::SearchPath;
    }

    LineKind::Other
}
