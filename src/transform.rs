use std::io::Write;
use std::str::FromStr;

use anyhow::Context;
use tracing::info;

use crate::pipeline::{Pipeline, Sink};

/// How the normalizing stage uppercases text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaseMode {
    /// Full Unicode case mapping. Output may be longer than input (`ß` -> `SS`).
    #[default]
    Unicode,
    /// ASCII letters only; every other character passes through unchanged.
    Ascii,
}

impl FromStr for CaseMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unicode" => Ok(CaseMode::Unicode),
            "ascii" => Ok(CaseMode::Ascii),
            other => anyhow::bail!("unknown uppercase mode '{other}' (expected unicode or ascii)"),
        }
    }
}

pub fn uppercase(text: &str, mode: CaseMode) -> String {
    match mode {
        CaseMode::Unicode => text.to_uppercase(),
        CaseMode::Ascii => text.to_ascii_uppercase(),
    }
}

pub fn processed_line(value: &str) -> String {
    format!("Processed message: {value}")
}

/// Reports each value as a `Processed message: ...` line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    fn report(&self, value: &str) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", processed_line(value)).context("Failed to write to stdout")?;
        out.flush().context("Failed to flush stdout")?;

        info!(
            event = "message_processed",
            bytes = value.len(),
            "Processed message"
        );
        Ok(())
    }
}

/// The consumer's pipeline: uppercase, then report to `sink`.
pub fn normalizing_pipeline(mode: CaseMode, sink: impl Sink + 'static) -> Pipeline {
    Pipeline::builder()
        .map("uppercase", move |text| Ok(uppercase(&text, mode)))
        .sink(sink)
}
