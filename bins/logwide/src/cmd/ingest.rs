use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;

use logwide_api::EventRecord;
use logwide_engine::{EventOutput, OutputConfig};
use storage_memory::MemoryStore;

use crate::config::IngestArgs;
use crate::error::CliError;

/// Per-run counters.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

pub fn run(args: IngestArgs) -> Result<(), CliError> {
    let config = OutputConfig::load(&args.config)?;
    tracing::info!(config = %args.config.display(), table = %config.table, "loaded config");
    let output = EventOutput::new(config, Arc::new(MemoryStore::new()))?;

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.input).map_err(|source| CliError::Input {
            path: args.input.clone(),
            source,
        })?;
        Box::new(BufReader::new(file))
    };

    let stdout = io::stdout();
    let summary = ingest(&output, reader, &mut stdout.lock(), args.readback)?;
    tracing::info!(
        written = summary.written,
        skipped = summary.skipped,
        failed = summary.failed,
        "ingest finished"
    );
    if summary.failed > 0 {
        return Err(CliError::Failed {
            failed: summary.failed,
            total: summary.total(),
        });
    }
    Ok(())
}

/// Write every non-blank line of `reader` through `output`.
///
/// Prints the primary id (or `skipped`) per event. A line that fails to
/// parse or write is logged and counted, and the run continues.
pub fn ingest<R: BufRead, W: Write>(
    output: &EventOutput,
    reader: R,
    out: &mut W,
    readback: bool,
) -> Result<Summary, CliError> {
    let mut summary = Summary::default();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = n + 1;
        let record = match EventRecord::from_json(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "malformed event");
                summary.failed += 1;
                continue;
            }
        };
        match output.receive(&record) {
            Ok(Some(id)) => {
                summary.written += 1;
                writeln!(out, "{id}")?;
                if readback {
                    if let Some(row) = output.fetch(&id.to_string())? {
                        writeln!(out, "{}", serde_json::to_string(&row)?)?;
                    }
                }
            }
            Ok(None) => {
                summary.skipped += 1;
                writeln!(out, "skipped")?;
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "event not written");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
