use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Spinner that tracks records loaded; silent when `quiet`.
pub struct LoadProgress {
    pb: Option<ProgressBar>,
    start: Instant,
}

impl LoadProgress {
    pub fn new(label: &str, quiet: bool) -> Self {
        let pb = if quiet {
            None
        } else {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {prefix} {msg}") {
                pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            pb.set_prefix(label.to_string());
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        };
        Self {
            pb,
            start: Instant::now(),
        }
    }

    pub fn update(&self, records: u64) {
        if let Some(pb) = &self.pb {
            pb.set_message(format!("{records} records"));
        }
    }

    pub fn finish(mut self) -> Duration {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
        self.start.elapsed()
    }
}

impl Drop for LoadProgress {
    fn drop(&mut self) {
        if let Some(pb) = self.pb.take() {
            pb.abandon_with_message(format!(
                "interrupted after {}",
                format_duration(self.start.elapsed())
            ));
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs_f64() >= 1.0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{:.0}ms", duration.as_secs_f64() * 1_000.0)
    }
}
