//! Integration tests for the update-sde binary.
//!
//! `cat` stands in for pg_restore so the dumps can be plain SQL.

#![cfg(unix)]

use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn update_sde() -> Command {
    Command::new(env!("CARGO_BIN_EXE_update-sde"))
}

const RESTORE_OUTPUT: &str = "\
--
-- PostgreSQL database dump
--

SET statement_timeout = 0;
SET search_path = public, pg_catalog;

--
-- Data for Name: invTypes; Type: TABLE DATA; Schema: public; Owner: -
--

COPY \"invTypes\" (\"typeID\", \"typeName\") FROM stdin;
34\tTritanium
35\tPyerite
\\.


--
-- Data for Name: mapRegions; Type: TABLE DATA; Schema: public; Owner: -
--

COPY public.\"mapRegions\" (\"regionID\") FROM stdin;
10000002
\\.

SET search_path = other;
";

const AFTER_SCRIPT: &str = "UPDATE \"mapDenormalize\" SET geom = NULL;\nSELECT 'done';\n";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("after.sql"), AFTER_SCRIPT).unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "restore:\n  program: cat\n  args: []\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn gzip_dump(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        fs::write(&path, encoder.finish().unwrap()).unwrap();
        path
    }

    fn command(&self, dump: &Path) -> Command {
        let mut cmd = update_sde();
        cmd.arg(dump)
            .arg("--config")
            .arg(self.path("config.yaml"))
            .arg("--after-script")
            .arg(self.path("after.sql"));
        cmd
    }
}

#[test]
fn test_full_run_default_schema() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", RESTORE_OUTPUT);

    let output = fx.command(&dump).output().unwrap();
    assert!(output.status.success(), "Command failed: {:?}", output);

    let sql = String::from_utf8(output.stdout).unwrap();
    assert!(sql.starts_with(
        "SET search_path TO sde, public;\nBEGIN;\nSET CONSTRAINTS ALL DEFERRED;\n--\n"
    ));
    assert!(sql.contains(
        "DELETE FROM \"invTypes\" WHERE 1=1;\nCOPY \"invTypes\" (\"typeID\", \"typeName\") FROM stdin;\n34\tTritanium\n"
    ));
    assert!(sql.contains(
        "DELETE FROM public.\"mapRegions\" WHERE 1=1;\nCOPY public.\"mapRegions\""
    ));
    // first restore search_path dropped, the later one kept
    assert!(!sql.contains("SET search_path = public, pg_catalog;"));
    assert!(sql.contains("SET search_path = other;\n"));
    assert!(sql.ends_with(&format!("COMMIT;\nVACUUM FULL;\n{}", AFTER_SCRIPT)));
}

#[test]
fn test_schema_argument() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", "SELECT 1;\n");

    let output = fx.command(&dump).arg("myschema").output().unwrap();
    assert!(output.status.success(), "Command failed: {:?}", output);

    let sql = String::from_utf8(output.stdout).unwrap();
    assert_eq!(
        sql,
        format!(
            "SET search_path TO myschema, public;\nBEGIN;\nSET CONSTRAINTS ALL DEFERRED;\nSELECT 1;\nCOMMIT;\nVACUUM FULL;\n{}",
            AFTER_SCRIPT
        )
    );
}

#[test]
fn test_schema_from_config_file() {
    let fx = Fixture::new();
    fs::write(
        fx.path("config.yaml"),
        "schema: eve\nrestore:\n  program: cat\n  args: []\n",
    )
    .unwrap();
    let dump = fx.gzip_dump("sde.dmp.gz", "SELECT 1;\n");

    let output = fx.command(&dump).output().unwrap();
    assert!(output.status.success(), "Command failed: {:?}", output);
    let sql = String::from_utf8(output.stdout).unwrap();
    assert!(sql.starts_with("SET search_path TO eve, public;\n"));
}

#[test]
fn test_output_file() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", "COPY t (id) FROM stdin;\n1\n\\.\n");
    let out_path = fx.path("out/update.sql");

    let output = fx
        .command(&dump)
        .arg("-o")
        .arg(&out_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "Command failed: {:?}", output);
    assert!(output.stdout.is_empty());

    let sql = fs::read_to_string(&out_path).unwrap();
    assert!(sql.contains("DELETE FROM t WHERE 1=1;\nCOPY t (id) FROM stdin;\n"));
}

#[test]
fn test_compression_override() {
    let fx = Fixture::new();
    let dump = fx.path("sde.dump");
    fs::write(&dump, "SELECT 2;\n").unwrap();

    let output = fx
        .command(&dump)
        .args(["--compression", "none"])
        .output()
        .unwrap();
    assert!(output.status.success(), "Command failed: {:?}", output);
    assert!(String::from_utf8(output.stdout)
        .unwrap()
        .contains("\nSELECT 2;\nCOMMIT;\n"));

    let output = fx
        .command(&dump)
        .args(["--compression", "rar"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_restore_failure_exits_nonzero_with_rollback() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", RESTORE_OUTPUT);

    let output = fx
        .command(&dump)
        .args(["--restore-program", "false"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let sql = String::from_utf8(output.stdout).unwrap();
    assert!(sql.ends_with("ROLLBACK;\n"));
    assert!(!sql.contains("COMMIT;"));
    assert!(!sql.contains("SELECT 'done'"));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("restore tool `false` failed"), "stderr: {}", stderr);
}

#[test]
fn test_corrupt_dump_exits_nonzero() {
    let fx = Fixture::new();
    let dump = fx.path("sde.dmp.gz");
    fs::write(&dump, b"this is not gzip data").unwrap();

    let output = fx.command(&dump).output().unwrap();

    assert!(!output.status.success());
    let sql = String::from_utf8(output.stdout).unwrap();
    assert!(!sql.contains("COMMIT;"));
    assert!(sql.ends_with("ROLLBACK;\n"));
}

#[test]
fn test_missing_after_script_produces_no_output() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", RESTORE_OUTPUT);

    let output = update_sde()
        .arg(&dump)
        .arg("--config")
        .arg(fx.path("config.yaml"))
        .arg("--after-script")
        .arg(fx.path("does-not-exist.sql"))
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("does-not-exist.sql"), "stderr: {}", stderr);
}

#[test]
fn test_missing_after_script_leaves_output_file_alone() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", RESTORE_OUTPUT);
    let existing = fx.path("previous.sql");
    fs::write(&existing, "-- previous update\n").unwrap();
    let fresh = fx.path("fresh/update.sql");

    for out_path in [&existing, &fresh] {
        let output = update_sde()
            .arg(&dump)
            .arg("--config")
            .arg(fx.path("config.yaml"))
            .arg("--after-script")
            .arg(fx.path("does-not-exist.sql"))
            .arg("-o")
            .arg(out_path)
            .output()
            .unwrap();
        assert!(!output.status.success());
    }

    assert_eq!(fs::read_to_string(&existing).unwrap(), "-- previous update\n");
    assert!(!fresh.exists());
    assert!(!fx.path("fresh").exists());
}

#[test]
fn test_bzip2_detected_from_content() {
    let fx = Fixture::new();
    let dump = fx.path("sde-latest.dmp");
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(b"SELECT 3;\n").unwrap();
    fs::write(&dump, encoder.finish().unwrap()).unwrap();

    let output = fx.command(&dump).output().unwrap();
    assert!(output.status.success(), "Command failed: {:?}", output);
    assert!(String::from_utf8(output.stdout)
        .unwrap()
        .contains("DEFERRED;\nSELECT 3;\nCOMMIT;\n"));
}

/// Run with a restore tool that lingers after echoing its input, send
/// `signal`, and return (exit code, stdout, time from signal to exit).
fn interrupt_lingering_restore(script: &str, signal: &str) -> (Option<i32>, String, Duration) {
    let fx = Fixture::new();
    fs::write(
        fx.path("config.yaml"),
        format!("restore:\n  program: sh\n  args: [\"-c\", \"{}\"]\n", script),
    )
    .unwrap();
    let dump = fx.gzip_dump("sde.dmp.gz", RESTORE_OUTPUT);

    let child = fx
        .command(&dump)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // Let the handler install and the dump stream through.
    thread::sleep(Duration::from_secs(1));
    let status = Command::new("kill")
        .args([signal, &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let sent = Instant::now();
    let output = child.wait_with_output().unwrap();
    (
        output.status.code(),
        String::from_utf8(output.stdout).unwrap(),
        sent.elapsed(),
    )
}

#[test]
fn test_sigterm_while_streaming() {
    let (code, sql, elapsed) = interrupt_lingering_restore("cat; exec sleep 30", "-TERM");

    assert_eq!(code, Some(143));
    assert!(!sql.contains("COMMIT;"), "output: {}", sql);
    assert!(!sql.contains("SELECT 'done'"));
    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
}

#[test]
fn test_sigint_while_streaming() {
    let (code, sql, elapsed) = interrupt_lingering_restore("cat; exec sleep 30", "-INT");

    assert_eq!(code, Some(130));
    assert!(!sql.contains("COMMIT;"), "output: {}", sql);
    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
}

#[test]
fn test_sigterm_while_waiting_for_restore_exit() {
    // stdout is closed early, so the run is already waiting on the exit status
    let (code, sql, elapsed) =
        interrupt_lingering_restore("cat; exec 1>&-; exec sleep 30", "-TERM");

    assert_eq!(code, Some(143));
    assert!(!sql.contains("COMMIT;"), "output: {}", sql);
    assert!(!sql.contains("VACUUM FULL;"));
    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
}

#[test]
fn test_missing_dump_file() {
    let fx = Fixture::new();
    let output = fx.command(&fx.path("missing.dmp.bz2")).output().unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_missing_dumpfile_argument() {
    let output = update_sde().output().unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_empty_schema_rejected() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", "SELECT 1;\n");

    let output = fx.command(&dump).arg("").output().unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_json_stats_on_stderr() {
    let fx = Fixture::new();
    let dump = fx.gzip_dump("sde.dmp.gz", RESTORE_OUTPUT);

    let output = fx.command(&dump).arg("--json").output().unwrap();
    assert!(output.status.success(), "Command failed: {:?}", output);

    let json: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(json["schema"], "sde");
    assert_eq!(json["restore_command"], "cat");
    assert_eq!(
        json["statistics"]["tables_truncated"],
        serde_json::json!(["\"invTypes\"", "public.\"mapRegions\""])
    );
    assert_eq!(json["statistics"]["search_path_suppressed"], true);
}

#[test]
fn test_completions() {
    let output = update_sde().args(["--completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout).unwrap().contains("update-sde"));
}
