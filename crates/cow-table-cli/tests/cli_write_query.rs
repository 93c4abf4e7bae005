//! Integration tests for the `cowtab` binary.
#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cowtab"))
}

fn write_options(tmp: &TempDir, table: &Path) -> std::io::Result<PathBuf> {
    let path = tmp.path().join("options.json");
    let doc = serde_json::json!({
        "table.name": "people",
        "table.basePath": table.to_string_lossy(),
        "write.recordkey.field": "name",
        "write.partitionpath.field": "date",
        "write.precombine.field": "checkin",
        "write.parallelism": 2,
    });
    std::fs::write(&path, doc.to_string())?;
    Ok(path)
}

fn write_rows(tmp: &TempDir, file: &str, lines: &[&str]) -> std::io::Result<PathBuf> {
    let path = tmp.path().join(file);
    std::fs::write(&path, lines.join("\n"))?;
    Ok(path)
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

#[test]
fn write_then_query_joe_and_don() -> TestResult {
    let tmp = TempDir::new()?;
    let table = tmp.path().join("people");
    let options = write_options(&tmp, &table)?;
    let rows = write_rows(
        &tmp,
        "first.jsonl",
        &[
            r#"{"name":"Joe","cost":69.0,"date":"2000-01-01","checkin":5}"#,
            r#"{"name":"Don","cost":36.5,"date":"2000-01-02","checkin":5}"#,
            r#"{"name":"Amy","cost":12.0,"date":"2000-01-01","checkin":5}"#,
        ],
    )?;

    cli()
        .args(["write", "--options", &path_arg(&options), "--input", &path_arg(&rows)])
        .assert()
        .success()
        .stdout(contains("Committed version 1"))
        .stdout(contains("3 inserted"));

    cli()
        .args([
            "query",
            "--table",
            &path_arg(&table),
            "--sql",
            "SELECT name, cost FROM snapshot WHERE cost > 35.0 ORDER BY name",
        ])
        .assert()
        .success()
        .stdout(contains("Joe"))
        .stdout(contains("Don"))
        .stdout(contains("Amy").not())
        .stdout(contains("(2 rows)"));

    // A lower precombine value loses against the stored row.
    let stale = write_rows(
        &tmp,
        "stale.jsonl",
        &[r#"{"name":"Joe","cost":10.0,"date":"2000-01-01","checkin":1}"#],
    )?;
    cli()
        .args(["write", "--options", &path_arg(&options), "--input", &path_arg(&stale)])
        .assert()
        .success()
        .stdout(contains("Committed version 2"))
        .stdout(contains("1 ignored"));

    cli()
        .args([
            "query",
            "--table",
            &path_arg(&table),
            "--sql",
            "SELECT cost FROM snapshot WHERE name = 'Joe'",
        ])
        .assert()
        .success()
        .stdout(contains("69.0"))
        .stdout(contains("10.0").not());

    Ok(())
}

#[test]
fn log_and_show_describe_the_table() -> TestResult {
    let tmp = TempDir::new()?;
    let table = tmp.path().join("people");
    let options = write_options(&tmp, &table)?;
    let first = write_rows(
        &tmp,
        "first.jsonl",
        &[
            r#"{"name":"Joe","cost":69.0,"date":"2000-01-01","checkin":5}"#,
            r#"{"name":"Don","cost":36.5,"date":"2000-01-02","checkin":5}"#,
        ],
    )?;
    let update = write_rows(
        &tmp,
        "update.jsonl",
        &[r#"{"name":"Don","cost":40.0,"date":"2000-01-02","checkin":7}"#],
    )?;

    for input in [&first, &update] {
        cli()
            .args(["write", "--options", &path_arg(&options), "--input", &path_arg(input)])
            .assert()
            .success();
    }

    cli()
        .args(["log", "--table", &path_arg(&table)])
        .assert()
        .success()
        .stdout(contains("version 1"))
        .stdout(contains("version 2"))
        .stdout(contains("2000-01-02: +1 -1"));

    cli()
        .args(["show", "--table", &path_arg(&table), "--as-of", "1"])
        .assert()
        .success()
        .stdout(contains("Table people at version 1"))
        .stdout(contains("2 rows in 2 files"))
        .stdout(contains("2000-01-01"));

    cli()
        .args([
            "query",
            "--table",
            &path_arg(&table),
            "--as-of",
            "1",
            "--sql",
            "SELECT cost FROM snapshot WHERE name = 'Don'",
        ])
        .assert()
        .success()
        .stdout(contains("36.5"));

    Ok(())
}

#[test]
fn option_overrides_and_csv_input() -> TestResult {
    let tmp = TempDir::new()?;
    let table = tmp.path().join("csv_table");
    let rows = tmp.path().join("rows.csv");
    std::fs::write(&rows, "name,cost\nJoe,69.0\nDon,36.5\n")?;

    cli()
        .args([
            "write",
            "--option",
            "table.name=csv",
            "--option",
            &format!("table.basePath={}", path_arg(&table)),
            "--option",
            "write.recordkey.field=name",
            "--input",
            &path_arg(&rows),
        ])
        .assert()
        .success()
        .stdout(contains("2 inserted"));

    cli()
        .args([
            "query",
            "--table",
            &path_arg(&table),
            "--name",
            "people",
            "--max-rows",
            "1",
            "--sql",
            "SELECT name FROM people ORDER BY name",
        ])
        .assert()
        .success()
        .stdout(contains("(2 rows, showing first 1)"))
        .stdout(contains("Don"));

    Ok(())
}

#[test]
fn errors_exit_non_zero() -> TestResult {
    let tmp = TempDir::new()?;
    let missing = tmp.path().join("nope");

    cli()
        .args(["query", "--table", &path_arg(&missing), "--sql", "SELECT 1"])
        .assert()
        .failure()
        .stderr(contains("Failed to open table"));

    let rows = write_rows(&tmp, "rows.jsonl", &[r#"{"name":"Joe"}"#])?;
    cli()
        .args([
            "write",
            "--option",
            "table.name=t",
            "--option",
            &format!("table.basePath={}", path_arg(&missing)),
            "--option",
            "write.recordkey.field=name",
            "--option",
            "write.colour=blue",
            "--input",
            &path_arg(&rows),
        ])
        .assert()
        .failure()
        .stderr(contains("Invalid table options"))
        .stderr(contains("write.colour"));

    Ok(())
}
