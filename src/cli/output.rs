//! Output formatting for azrm
//!
//! Colored human output or JSON, selected by `--output`.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use azrm::sls::{RunSummary, StateRun};
use azrm::states::StateStatus;

/// Colored label of a state status
fn colored_status(status: StateStatus) -> String {
    let label = status.to_string();
    match status {
        StateStatus::Ok => label.green().to_string(),
        StateStatus::Changed => label.yellow().to_string(),
        StateStatus::Pending => label.cyan().to_string(),
        StateStatus::Failed => label.red().bold().to_string(),
        StateStatus::Skipped => label.bright_black().to_string(),
    }
}

/// Output formatter for different output modes
pub struct OutputFormatter {
    use_color: bool,
    json_mode: bool,
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        Self {
            use_color,
            json_mode,
            start_time: Instant::now(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a serializable value: pretty JSON in JSON mode, YAML otherwise.
    pub fn value<T: Serialize>(&self, value: &T) {
        let rendered = if self.json_mode {
            serde_json::to_string_pretty(value).map_err(|e| e.to_string())
        } else {
            serde_yaml::to_string(value).map_err(|e| e.to_string())
        };
        match rendered {
            Ok(text) => println!("{}", text.trim_end()),
            Err(err) => self.error(&format!("Unable to render output: {}", err)),
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print a plain list entry
    pub fn item(&self, text: &str) {
        println!("  {}", text);
    }

    /// Print one state result
    pub fn state_result(&self, run: &StateRun) {
        let status = if self.use_color {
            colored_status(run.status)
        } else {
            run.status.to_string()
        };
        let id = if self.use_color {
            run.id.bright_white().bold().to_string()
        } else {
            run.id.clone()
        };

        println!("{}: [{}] {}", status, id, run.function);
        println!("    {}", run.ret.comment);
        if !run.ret.changes.is_empty() {
            let changes = Value::Object(run.ret.changes.clone());
            if let Ok(text) = serde_yaml::to_string(&changes) {
                for line in text.lines() {
                    if self.use_color {
                        println!("      {}", line.bright_black());
                    } else {
                        println!("      {}", line);
                    }
                }
            }
        }
    }

    /// Print a state run: every result followed by the summary.
    pub fn state_runs(&self, runs: &[StateRun], summary: &RunSummary) {
        if self.json_mode {
            self.value(&serde_json::json!({ "states": runs, "summary": summary }));
            return;
        }

        for run in runs {
            self.state_result(run);
        }
        self.recap(summary);
    }

    /// Print the summary line
    pub fn recap(&self, summary: &RunSummary) {
        let line = format!(
            "ok={} changed={} pending={} failed={} skipped={}",
            summary.ok, summary.changed, summary.pending, summary.failed, summary.skipped
        );
        let duration = format_duration(self.start_time.elapsed());

        if self.use_color {
            println!("\n{} {}", "SUMMARY".bright_white().bold(), line);
            println!("{} {}", "Run took".bright_black(), duration.bright_white());
            if summary.unsuccessful() > 0 {
                println!("{}", "Some states failed.".red().bold());
            } else {
                println!("{}", "All states succeeded.".green().bold());
            }
        } else {
            println!("\nSUMMARY {}", line);
            println!("Run took {}", duration);
            if summary.unsuccessful() > 0 {
                println!("Some states failed.");
            } else {
                println!("All states succeeded.");
            }
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            let err = serde_json::json!({
                "type": "error",
                "message": message
            });
            eprintln!("{}", err);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            let warn = serde_json::json!({
                "type": "warning",
                "message": message
            });
            eprintln!("{}", warn);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }
}

/// Format a duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:03}s", secs, duration.subsec_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
