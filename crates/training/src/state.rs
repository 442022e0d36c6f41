use std::time::{Duration, Instant};

use models::{Diagnostics, LossBreakdown};

/// What one optimization step reports back to the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    pub loss: f32,
    pub losses: LossBreakdown,
    pub diagnostics: Diagnostics,
}

/// Running accumulators since the last display reset, plus the current step and rate.
#[derive(Debug, Clone)]
pub struct TrainingState {
    pub step: u64,
    pub learning_rate: f64,
    pub loss_sum: f64,
    pub tp: usize,
    pub tn: usize,
    pub fg: usize,
    pub bg: usize,
    pub steps_since_reset: u64,
    /// Per-head losses of the most recent step.
    pub last_losses: LossBreakdown,
    timer: Instant,
}

impl TrainingState {
    pub fn new(start_step: u64, learning_rate: f64) -> Self {
        Self {
            step: start_step,
            learning_rate,
            loss_sum: 0.0,
            tp: 0,
            tn: 0,
            fg: 0,
            bg: 0,
            steps_since_reset: 0,
            last_losses: LossBreakdown::default(),
            timer: Instant::now(),
        }
    }

    pub fn record(&mut self, report: &StepReport, debug: bool) {
        if debug {
            self.tp += report.diagnostics.tp;
            self.tn += report.diagnostics.tn;
            self.fg += report.diagnostics.fg;
            self.bg += report.diagnostics.bg;
        }
        self.loss_sum += f64::from(report.loss);
        self.steps_since_reset += 1;
        self.last_losses = report.losses;
    }

    pub fn mean_loss(&self) -> f64 {
        if self.steps_since_reset == 0 {
            0.0
        } else {
            self.loss_sum / self.steps_since_reset as f64
        }
    }

    /// Percentage of foreground RoIs classified correctly.
    pub fn tp_rate(&self) -> f64 {
        percent(self.tp, self.fg)
    }

    /// Percentage of background RoIs classified correctly.
    pub fn tn_rate(&self) -> f64 {
        percent(self.tn, self.bg)
    }

    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    /// Steps per second since the last reset.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64().max(1e-9);
        self.steps_since_reset as f64 / secs
    }

    pub fn is_clear(&self) -> bool {
        self.loss_sum == 0.0
            && self.tp == 0
            && self.tn == 0
            && self.fg == 0
            && self.bg == 0
            && self.steps_since_reset == 0
    }

    /// Zero the accumulators and restart the throughput timer.
    pub fn reset(&mut self) {
        self.loss_sum = 0.0;
        self.tp = 0;
        self.tn = 0;
        self.fg = 0;
        self.bg = 0;
        self.steps_since_reset = 0;
        self.timer = Instant::now();
    }
}

fn percent(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}
