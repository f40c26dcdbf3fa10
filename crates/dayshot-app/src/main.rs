#![warn(missing_docs)]
//! # dayshot binary
//!
//! Console front-end: starts one run, renders its status and reads `stop`,
//! `status` and `help` commands from stdin.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use clap::Parser;
use dayshot_app::config::STOP_TIMEOUT;
use dayshot_app::{
    APP_VERSION, AppError, ParameterOverrides, RestoreStatus, RunCoordinator, RunDependencies,
    RunOutcome, RunReport, RunSettings, StopOutcome, init_logging, load_profile,
    log_dir_from_env, output_dir_from_env, resolve_parameters,
};
use dayshot_capture::{
    CaptureConfig, CaptureService, DEFAULT_JPEG_QUALITY, FrameSource, HostStorage,
    PrimaryDisplaySource, ScreenshotFormat, SyntheticFrameSource,
};
use dayshot_core::{StartMode, TargetApplication, parse_hhmm};
use dayshot_system::{
    ClockController, DesktopFocuser, HostClock, SimulatedClock, SimulatedFocuser, WindowFocuser,
};
use dayshot_timing::PollingTimer;
use dayshot_ui::{Escalation, FixedAnswer, RunStage, StatusBoard, UiStatus, project_status};
use tracing::{error, info};

use console::{Command, ConsoleInput, ConsolePrompt};

const RENDER_INTERVAL: Duration = Duration::from_millis(250);

/// Captures one screenshot per simulated day of a course.
#[derive(Debug, Parser)]
#[command(name = "dayshot", version = APP_VERSION)]
struct Cli {
    /// Course duration in hours (1-24).
    #[arg(long)]
    hours: Option<u32>,
    /// Number of screenshots, one per simulated day (1-60).
    #[arg(long)]
    slots: Option<u32>,
    /// Window to focus before each capture: zoom, teams, chrome or desktop.
    #[arg(long)]
    app: Option<TargetApplication>,
    /// Start at this local time (HH:MM) instead of immediately.
    #[arg(long, value_parser = parse_hhmm)]
    at: Option<NaiveTime>,
    /// Repeat the run every day at `--at` until stopped.
    #[arg(long, requires = "at")]
    daily: bool,
    /// JSON run profile; explicit flags override its fields.
    #[arg(long)]
    profile: Option<PathBuf>,
    /// Screenshot root directory [env: DAYSHOT_OUTPUT_DIR].
    #[arg(long)]
    output: Option<PathBuf>,
    /// Image format: png or jpg.
    #[arg(long, default_value = "png")]
    format: ScreenshotFormat,
    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,
    /// Log directory [env: DAYSHOT_LOG_DIR].
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Use an in-memory clock, simulated windows and synthetic frames.
    #[arg(long)]
    simulate: bool,
    /// Continue automatically when a slot cannot be captured.
    #[arg(long)]
    assume_yes: bool,
}

impl Cli {
    fn overrides(&self) -> ParameterOverrides {
        ParameterOverrides {
            hours: self.hours,
            slots: self.slots,
            target: self.app,
            start_mode: self.at.map(|at| {
                if self.daily {
                    StartMode::ScheduledDaily(at)
                } else {
                    StartMode::ScheduledOnce(at)
                }
            }),
        }
    }
}

/// CLI entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(log_dir_from_env);
    let logging = match init_logging(&log_dir) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("dayshot: {error}");
            return ExitCode::FAILURE;
        }
    };
    info!(version = APP_VERSION, log = %logging.path().display(), "dayshot starting");

    match run(&cli) {
        Ok(report) => summarize(&report),
        Err(error) => {
            error!(%error, "run not started");
            eprintln!("dayshot: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<RunReport, AppError> {
    let profile = cli.profile.as_deref().map(load_profile).transpose()?;
    let params = resolve_parameters(profile, cli.overrides())?;

    let input = ConsoleInput::spawn()?;
    let escalation: Arc<dyn Escalation> = if cli.assume_yes {
        Arc::new(FixedAnswer(true))
    } else {
        Arc::new(ConsolePrompt::new(Arc::clone(&input)))
    };
    let board = Arc::new(StatusBoard::new(APP_VERSION));
    let coordinator = RunCoordinator::new(dependencies(cli, Arc::clone(&board), escalation)?);

    coordinator.start_run(params)?;
    println!(
        "dayshot {APP_VERSION}: {} screenshot(s) over {}h of {}, one every {}s. Type 'stop' to end.",
        params.slot_count(),
        params.total_hours(),
        params.target(),
        params.interval_seconds()
    );

    let mut last_line = String::new();
    let report = loop {
        if let Some(report) = coordinator.wait(RENDER_INTERVAL) {
            break report;
        }
        render(&board.snapshot(), &mut last_line);

        match input.poll_command() {
            Some(Command::Stop) => match coordinator.stop_run(STOP_TIMEOUT) {
                StopOutcome::Abandoned => {
                    println!("\nStill unwinding; waiting for the date to be restored...");
                }
                StopOutcome::Stopped | StopOutcome::NotRunning => {}
            },
            Some(Command::Status) => {
                println!("\n{:?}", coordinator.snapshot());
            }
            Some(Command::Help) => println!("\ncommands: stop, status, help"),
            Some(Command::Unknown(line)) => {
                println!("\nunknown command '{line}'; type 'help'");
            }
            None => {}
        }
    };

    render(&board.snapshot(), &mut last_line);
    println!();
    Ok(report)
}

fn dependencies(
    cli: &Cli,
    board: Arc<StatusBoard>,
    escalation: Arc<dyn Escalation>,
) -> Result<RunDependencies, AppError> {
    let output_root = cli.output.clone().unwrap_or_else(output_dir_from_env);
    let config = CaptureConfig::new(output_root, cli.format, cli.jpeg_quality)?;
    info!(
        root = %config.output_root().display(),
        format = ?config.format(),
        jpeg_quality = config.jpeg_quality(),
        "capture output configured"
    );

    let clock: Arc<dyn ClockController>;
    let focuser: Arc<dyn WindowFocuser>;
    let source: Box<dyn FrameSource>;
    if cli.simulate {
        info!("simulated run: the system clock is not touched");
        clock = Arc::new(SimulatedClock::live());
        focuser = Arc::new(SimulatedFocuser::with_windows(
            TargetApplication::ALL
                .iter()
                .filter_map(|target| target.window_title()),
        ));
        source = Box::new(SyntheticFrameSource::default());
    } else {
        clock = Arc::new(HostClock::new());
        focuser = Arc::new(DesktopFocuser::new());
        source = Box::new(PrimaryDisplaySource::new());
    }

    Ok(RunDependencies {
        clock,
        focuser,
        capture: Arc::new(CaptureService::new(config, source, Box::new(HostStorage))),
        timer: Arc::new(PollingTimer::default()),
        reporter: board,
        escalation,
        settings: RunSettings::default(),
    })
}

fn render(status: &UiStatus, last_line: &mut String) {
    let line = project_status(status);
    if line == *last_line {
        return;
    }

    let mut stdout = io::stdout().lock();
    if matches!(status.stage, RunStage::Countdown | RunStage::Waiting) {
        let _ = write!(stdout, "\r{line}\x1b[K");
    } else {
        let _ = writeln!(stdout, "\r{line}\x1b[K");
    }
    let _ = stdout.flush();
    *last_line = line;
}

fn summarize(report: &RunReport) -> ExitCode {
    println!(
        "{} of {} slot(s) captured in {} cycle(s).",
        report.captured,
        report.slots.len(),
        report.cycles
    );

    let mut code = ExitCode::SUCCESS;
    if let RunOutcome::Failed(failure) = &report.outcome {
        eprintln!("dayshot: run failed: {failure}");
        code = ExitCode::FAILURE;
    }
    if let RestoreStatus::Failed(reason) = &report.restore {
        eprintln!("dayshot: the system date could not be restored ({reason}); fix it manually");
        code = ExitCode::FAILURE;
    }
    code
}

mod console {
    //! Line-based stdin handling shared by the command loop and the
    //! escalation prompt.

    use std::io::{self, BufRead, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use dayshot_ui::Escalation;

    /// Command typed while a run is active.
    pub enum Command {
        Stop,
        Status,
        Help,
        Unknown(String),
    }

    impl Command {
        fn parse(line: &str) -> Option<Self> {
            match line.trim().to_ascii_lowercase().as_str() {
                "" => None,
                "stop" | "q" | "quit" => Some(Command::Stop),
                "status" | "s" => Some(Command::Status),
                "help" | "?" => Some(Command::Help),
                _ => Some(Command::Unknown(line.trim().to_string())),
            }
        }
    }

    /// Stdin lines, read on a background thread.
    pub struct ConsoleInput {
        lines: Mutex<Receiver<String>>,
        answering: AtomicBool,
    }

    impl ConsoleInput {
        pub fn spawn() -> io::Result<Arc<Self>> {
            let (sender, receiver) = mpsc::channel();
            thread::Builder::new()
                .name("dayshot-stdin".to_string())
                .spawn(move || {
                    for line in io::stdin().lock().lines() {
                        let Ok(line) = line else { break };
                        if sender.send(line).is_err() {
                            break;
                        }
                    }
                })?;

            Ok(Arc::new(Self {
                lines: Mutex::new(receiver),
                answering: AtomicBool::new(false),
            }))
        }

        /// Next pending command; `None` while a prompt owns stdin.
        pub fn poll_command(&self) -> Option<Command> {
            if self.answering.load(Ordering::SeqCst) {
                return None;
            }
            let line = self.lines.try_lock().ok()?.try_recv().ok()?;
            Command::parse(&line)
        }
    }

    /// Asks escalation questions on the console.
    pub struct ConsolePrompt {
        input: Arc<ConsoleInput>,
    }

    impl ConsolePrompt {
        pub fn new(input: Arc<ConsoleInput>) -> Self {
            Self { input }
        }
    }

    impl Escalation for ConsolePrompt {
        fn confirm(&self, question: &str) -> bool {
            self.input.answering.store(true, Ordering::SeqCst);
            {
                let mut stdout = io::stdout().lock();
                let _ = write!(stdout, "\n{question} [y/N] ");
                let _ = stdout.flush();
            }

            let answer = self
                .input
                .lines
                .lock()
                .ok()
                .and_then(|lines| lines.recv().ok())
                .unwrap_or_default();
            self.input.answering.store(false, Ordering::SeqCst);

            let answer = answer.trim().to_ascii_lowercase();
            answer == "y" || answer == "yes"
        }
    }
}
