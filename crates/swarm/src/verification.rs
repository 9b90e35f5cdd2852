#![forbid(unsafe_code)]

//! Pre-close verification: type-check and test commands with a wall-clock limit each.

use crate::collaborators::ToolLocator;
use crate::config::VerificationConfig;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_TAIL_LINES: usize = 40;

pub trait Verifier {
    fn verify(&mut self, cell_id: &str, files_touched: &[String]) -> VerificationReport;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped(String),
}

impl StepStatus {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorLocation {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file, self.line, column),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub command: Vec<String>,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub output_tail: String,
    pub location: Option<ErrorLocation>,
}

impl StepReport {
    fn skipped(name: &str, command: &[String], reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_vec(),
            status: StepStatus::Skipped(reason.into()),
            exit_code: None,
            duration_ms: 0,
            output_tail: String::new(),
            location: None,
        }
    }

    pub fn rerun(&self) -> String {
        self.command.join(" ")
    }
}

/// Something the agent has to fix before the gate lets the cell close.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Blocker {
    pub step: String,
    pub message: String,
    pub rerun: String,
    pub location: Option<ErrorLocation>,
    pub hint: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    pub steps: Vec<StepReport>,
}

impl VerificationReport {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            steps: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        !self.steps.iter().any(|step| step.status.is_blocking())
    }

    pub fn blockers(&self) -> Vec<Blocker> {
        self.steps
            .iter()
            .filter(|step| step.status.is_blocking())
            .map(blocker_for)
            .collect()
    }
}

fn blocker_for(step: &StepReport) -> Blocker {
    let rerun = step.rerun();
    let (message, hint) = match &step.status {
        StepStatus::TimedOut => (
            format!("{} exceeded its time limit after {}ms", step.name, step.duration_ms),
            format!(
                "Look for a hang or an unbounded loop, run `{rerun}` locally, or raise verification.timeout_ms"
            ),
        ),
        _ => {
            let exit = step
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let message = format!("{} failed (exit={exit})", step.name);
            let hint = match (&step.location, step.name.as_str()) {
                (Some(location), "typecheck") => {
                    format!("Fix the type error at {location}, then re-run `{rerun}`")
                }
                (Some(location), _) => {
                    format!("Fix the failure reported at {location}, then re-run `{rerun}`")
                }
                (None, _) => format!("Re-run `{rerun}` and fix the reported failures"),
            };
            (message, hint)
        }
    };
    Blocker {
        step: step.name.clone(),
        message,
        rerun,
        location: step.location.clone(),
        hint,
    }
}

/// Runs the configured commands as child processes. A command whose program is not
/// installed is skipped, not failed.
pub struct CommandVerifier {
    config: VerificationConfig,
    tools: Box<dyn ToolLocator>,
    capture_dir: PathBuf,
}

impl CommandVerifier {
    pub fn new(config: VerificationConfig, tools: Box<dyn ToolLocator>) -> Self {
        Self {
            config,
            tools,
            capture_dir: std::env::temp_dir().join("cellmind-verify"),
        }
    }

    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }

    fn run_step(&self, cell_id: &str, name: &str, argv: &[String]) -> StepReport {
        let Some((program, args)) = argv.split_first() else {
            return StepReport::skipped(name, argv, "no command configured");
        };
        if !self.tools.is_tool_available(program) {
            tracing::warn!(cell_id, step = name, program = %program, "verification tool not found, skipping step");
            return StepReport::skipped(name, argv, format!("`{program}` is not available"));
        }

        let capture_path = self.capture_path(cell_id, name);
        let started = Instant::now();
        let outcome = spawn_and_wait(
            program,
            args,
            self.config.working_dir.as_deref(),
            &capture_path,
            Duration::from_millis(self.config.timeout_ms),
        );
        let duration_ms = started.elapsed().as_millis() as u64;
        let raw = std::fs::read(&capture_path)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default();
        let _ = std::fs::remove_file(&capture_path);

        let (status, exit_code, output) = match outcome {
            Ok(WaitOutcome::Exited(code)) if code == Some(0) => (StepStatus::Passed, code, raw),
            Ok(WaitOutcome::Exited(code)) => (StepStatus::Failed, code, raw),
            Ok(WaitOutcome::Killed) => (StepStatus::TimedOut, None, raw),
            Err(err) => (
                StepStatus::Failed,
                None,
                format!("spawn failed: {err}\n{raw}"),
            ),
        };
        let location = if status == StepStatus::Failed {
            first_error_location(&output)
        } else {
            None
        };
        tracing::info!(cell_id, step = name, ?status, duration_ms, "verification step finished");

        StepReport {
            name: name.to_string(),
            command: argv.to_vec(),
            status,
            exit_code,
            duration_ms,
            output_tail: tail_lines(&output, OUTPUT_TAIL_LINES),
            location,
        }
    }

    fn capture_path(&self, cell_id: &str, step: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let safe_id = cell_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect::<String>();
        self.capture_dir
            .join(format!("{safe_id}_{step}_{}_{nanos}.log", std::process::id()))
    }
}

impl Verifier for CommandVerifier {
    fn verify(&mut self, cell_id: &str, files_touched: &[String]) -> VerificationReport {
        if files_touched.is_empty() {
            return VerificationReport::skipped("no files touched");
        }
        let steps = [
            ("typecheck", self.config.typecheck.clone()),
            ("tests", self.config.tests.clone()),
        ];
        let mut report = VerificationReport::default();
        for (name, argv) in steps {
            let step = self.run_step(cell_id, name, &argv);
            let blocking = step.status.is_blocking();
            report.steps.push(step);
            // Tests against code that does not type-check only add noise.
            if blocking {
                break;
            }
        }
        report
    }
}

enum WaitOutcome {
    Exited(Option<i32>),
    Killed,
}

fn spawn_and_wait(
    program: &str,
    args: &[String],
    working_dir: Option<&Path>,
    capture_path: &Path,
    timeout: Duration,
) -> std::io::Result<WaitOutcome> {
    if let Some(parent) = capture_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let stdout_file = File::create(capture_path)?;
    let stderr_file = stdout_file.try_clone()?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file));
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }
    let mut child = command.spawn()?;

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(status.code()));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(WaitOutcome::Killed);
        }
        sleep(POLL_INTERVAL);
    }
}

fn tail_lines(raw: &str, max_lines: usize) -> String {
    let lines = raw.lines().collect::<Vec<_>>();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// First `file:line[:col]` or `file(line,col)` reference in tool output. Lines that mention
/// an error, or directly follow one (rustc puts the location on the next line), win.
pub fn first_error_location(output: &str) -> Option<ErrorLocation> {
    let lines = output.lines().collect::<Vec<_>>();
    let mentions_error = |index: usize| {
        lines
            .get(index)
            .is_some_and(|line| line.to_ascii_lowercase().contains("error"))
    };
    let scan = |prefer_errors: bool| {
        lines
            .iter()
            .enumerate()
            .filter(|(index, _)| {
                !prefer_errors
                    || mentions_error(*index)
                    || index.checked_sub(1).is_some_and(|prev| mentions_error(prev))
            })
            .flat_map(|(_, line)| line.split_whitespace())
            .find_map(parse_location_token)
    };
    scan(true).or_else(|| scan(false))
}

fn parse_location_token(token: &str) -> Option<ErrorLocation> {
    let token = token
        .trim_start_matches("-->")
        .trim_start_matches(['(', '[', '\'', '"'])
        .trim_end_matches([':', ',', ';', ')', ']', '\'', '"']);

    // tsc: src/a.ts(12,5
    if let Some((file, rest)) = token.split_once('(') {
        let mut numbers = rest.split(',');
        let line = numbers.next().and_then(parse_line_number)?;
        let column = numbers.next().and_then(parse_line_number);
        return looks_like_path(file).then(|| ErrorLocation {
            file: file.to_string(),
            line,
            column,
        });
    }

    let mut parts = token.split(':');
    let file = parts.next()?;
    let line = parts.next().and_then(parse_line_number)?;
    let column = parts.next().and_then(parse_line_number);
    looks_like_path(file).then(|| ErrorLocation {
        file: file.to_string(),
        line,
        column,
    })
}

fn parse_line_number(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|n| *n > 0)
}

fn looks_like_path(raw: &str) -> bool {
    if raw.is_empty() || raw.contains("//") {
        return false;
    }
    let file_name = raw.rsplit('/').next().unwrap_or(raw);
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '@' | '+'))
}
