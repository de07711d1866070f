//! Progress reporting for long-running ingest operations
//!
//! Ingest entrypoints take an explicit `&mut dyn Progress` handle instead
//! of reporting through a process-wide logger instance. Routine
//! diagnostics still go through the `log` facade.

/// Receiver for coarse progress updates during ingestion.
pub trait Progress {
    /// A new named phase of work has begun.
    fn begin(&mut self, label: &str);

    /// Fraction of the current phase completed, in [0, 1].
    fn update(&mut self, fraction: f64);
}

/// Progress reporter that emits log records at 10% increments.
#[derive(Default)]
pub struct LogProgress {
    label: String,
    last_decile: i32,
}

impl Progress for LogProgress {
    fn begin(&mut self, label: &str) {
        self.label = label.to_string();
        self.last_decile = -1;
        log::info!("{}...", label);
    }

    fn update(&mut self, fraction: f64) {
        let decile = (fraction.clamp(0.0, 1.0) * 10.0) as i32;
        if decile > self.last_decile {
            self.last_decile = decile;
            log::info!("{}: {}%", self.label, decile * 10);
        }
    }
}

/// Progress reporter that discards all updates. Useful in tests.
#[derive(Default)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn begin(&mut self, _label: &str) {}
    fn update(&mut self, _fraction: f64) {}
}
