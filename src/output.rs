//! Structured, leveled console output (ambient logging, A3).
//!
//! The crate has no `tracing`/`log` dependency; output is rendered
//! directly the way the rest of this pack's CLI tools do it — leveled,
//! emoji-prefixed lines, with quiet/verbose toggles and a couple of
//! layout helpers (`section`, `progress_bar`) the executor's progress
//! tree renders through.

use std::io::{self, Write};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct OutputManager {
    pub verbose: bool,
    quiet: bool,
    start_time: Instant,
}

impl OutputManager {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("🐛 DEBUG: {message}");
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("ℹ️  {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("✅ {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("⚠️  WARNING: {message}");
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("❌ ERROR: {message}");
    }

    pub fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n🔧 {title}");
            println!("{}", "=".repeat(title.len() + 3));
        }
    }

    pub fn step(&self, step: &str) {
        if !self.quiet {
            println!("  🚀 {step}");
        }
    }

    pub fn detail(&self, detail: &str) {
        if self.verbose && !self.quiet {
            println!("    📋 {detail}");
        }
    }

    /// Renders a step's current progress against its total weight; used
    /// by the executor's progress-allocation tree (C7 §4.7).
    pub fn progress_bar(&self, current: u64, total: u64, operation: &str, width: usize) {
        if self.quiet {
            return;
        }
        let percentage = if total > 0 {
            (current as f64 / total as f64) * 100.0
        } else {
            100.0
        };
        let filled = (width as f64 * (percentage / 100.0)) as usize;
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(width - filled));
        print!(
            "\r📊 {operation}: [{bar}] {percentage:.1}% ({}/{})",
            self.format_size(current),
            self.format_size(total)
        );
        let _ = io::stdout().flush();
        if current >= total {
            println!();
        }
    }

    pub fn format_size(&self, bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;
        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }
        if unit_index == 0 {
            format!("{bytes} {}", UNITS[unit_index])
        } else {
            format!("{size:.1} {}", UNITS[unit_index])
        }
    }

    pub fn format_duration(&self, duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;
        if hours > 0 {
            format!("{hours}h {minutes}m {seconds}s")
        } else if minutes > 0 {
            format!("{minutes}m {seconds}s")
        } else {
            format!("{seconds}s")
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
