use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Dev Server Benchmark - measure cold-start and hot-reload latency of a dev server
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Which measurement to take
    #[clap(value_enum, help_heading = "Core Options")]
    pub variant: Variant,

    /// Launch command variant (legacy or turbo)
    #[clap(value_enum, help_heading = "Core Options")]
    pub mode: LaunchMode,

    /// Opaque run label, echoed in logs and results
    #[clap(help_heading = "Core Options")]
    pub run_id: String,

    /// Server project root, used as the working directory of the launch command
    #[clap(long, default_value = crate::defaults::APP_DIR)]
    pub app_dir: PathBuf,

    /// Shell command that starts the server (overrides the mode's npm script)
    #[clap(long)]
    pub command: Option<String>,

    /// File to mutate for hot-reload (skips discovery)
    #[clap(long)]
    pub target_file: Option<PathBuf>,

    /// Overall deadline (defaults to 60s for cold-start, 30s for hot-reload)
    #[clap(short = 't', long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Wait between warm-up and the file mutation [default: 3000ms]
    #[clap(long, value_parser = parse_duration)]
    pub stabilization_delay: Option<Duration>,

    /// URL fetched once after the server is ready (hot-reload)
    #[clap(long, default_value = crate::defaults::WARMUP_URL)]
    pub warmup_url: String,

    /// Append the run record to this file as one JSON line
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Increase console log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print the summary line and errors
    #[clap(short = 'q', long, default_value_t = false)]
    pub quiet: bool,
}

/// The two harness variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Time from launch to the ready signal
    #[clap(name = "cold-start")]
    ColdStart,

    /// Time from a file edit to the compiled signal
    #[clap(name = "hot-reload")]
    HotReload,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::ColdStart => write!(f, "Cold Start"),
            Variant::HotReload => write!(f, "Hot Reload"),
        }
    }
}

impl Variant {
    /// Deadline used when `--timeout` is not given
    pub fn default_timeout(self) -> Duration {
        match self {
            Variant::ColdStart => crate::defaults::COLD_START_TIMEOUT,
            Variant::HotReload => crate::defaults::HOT_RELOAD_TIMEOUT,
        }
    }
}

/// Which dev-server launch script to run
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    #[clap(name = "legacy")]
    Legacy,

    #[clap(name = "turbo")]
    Turbo,
}

impl std::fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchMode::Legacy => write!(f, "legacy"),
            LaunchMode::Turbo => write!(f, "turbo"),
        }
    }
}

impl LaunchMode {
    /// Shell command for this mode
    pub fn launch_command(self) -> String {
        let script = match self {
            LaunchMode::Legacy => "dev:legacy",
            LaunchMode::Turbo => "dev:turbo",
        };
        format!("npm run {}", script)
    }
}

/// Parse duration from string (e.g., "500ms", "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs).map_err(|e| format!("Duration out of range: {} ({})", s, e))
}
