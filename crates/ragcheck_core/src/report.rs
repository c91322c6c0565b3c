use std::io::{self, Write};

use chrono::Local;

use crate::eval::EvalSummary;
use crate::model::TestResult;

/// Human-readable, append-only result log. Every line carries a local
/// timestamp prefix.
pub struct Reporter<W> {
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn message(&mut self, message: &str) -> io::Result<()> {
        self.write_block(&[message.to_string()], false)
    }

    pub fn result(&mut self, result: &TestResult) -> io::Result<()> {
        let lines = [
            format!("Test: {}", result.name),
            format!("Result: {}", if result.passed { "PASS" } else { "FAIL" }),
            format!("Response Time: {:.2} seconds", result.response_time_s),
            format!("Similarity Score: {:.2}%", result.similarity * 100.0),
            format!("Expected: {}", result.expected),
            format!("Actual: {}", result.actual),
        ];
        self.write_block(&lines, true)
    }

    pub fn failure(&mut self, name: &str, error: &str) -> io::Result<()> {
        self.write_block(&[format!("Test Case: {name} | Error: {error}")], false)
    }

    pub fn summary(&mut self, summary: &EvalSummary) -> io::Result<()> {
        let lines = [format!(
            "Summary: total={} passed={} failed={} errored={} pass_rate={:.2}%",
            summary.total,
            summary.passed,
            summary.failed,
            summary.errored,
            summary.pass_rate * 100.0
        )];
        self.write_block(&lines, false)
    }

    // A block is always a single write_all.
    fn write_block(&mut self, lines: &[String], trailing_blank: bool) -> io::Result<()> {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S,%3f");
        let mut block = String::new();
        for line in lines {
            block.push_str(&format!("{ts} - {line}\n"));
        }
        if trailing_blank {
            block.push('\n');
        }
        self.out.write_all(block.as_bytes())?;
        self.out.flush()
    }
}
