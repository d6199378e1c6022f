// ABOUTME: Progress reporting for long table transfers
// ABOUTME: Terminal progress bar via indicatif, or silent for scripts and tests

use indicatif::{ProgressBar, ProgressStyle};

/// Receives row-level progress of one table transfer at a time.
pub trait ProgressSink {
    /// A table transfer begins; `expected` is the row estimate if known
    fn start(&mut self, label: &str, expected: Option<u64>);
    /// `rows` have been processed so far for the current table
    fn update(&mut self, rows: u64);
    fn finish(&mut self);
}

/// Draws a bar when the row count is known and a spinner otherwise.
#[derive(Default)]
pub struct IndicatifProgress {
    bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for IndicatifProgress {
    fn start(&mut self, label: &str, expected: Option<u64>) {
        let bar = match expected {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} rows ({per_sec}, {eta})",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg} {pos} rows ({per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.set_message(label.to_string());
        self.bar = Some(bar);
    }

    fn update(&mut self, rows: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(rows);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn start(&mut self, _label: &str, _expected: Option<u64>) {}
    fn update(&mut self, _rows: u64) {}
    fn finish(&mut self) {}
}
