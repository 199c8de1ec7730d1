//! Proprio CLI - Command-line interface for Proprio Flux
//!
//! Commands:
//! - calibrate: Compute hand sizes from recorded frames
//! - assess: Run an assessment session over recorded frames
//! - settings: Save impaired hand, severity and demographics
//! - stats: Show historical session statistics
//! - doctor: Diagnose store health and calibration status

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proprio_flux::calibration::DEFAULT_CALIBRATION_SAMPLES;
use proprio_flux::config::{AssessmentConfig, MetricKind};
use proprio_flux::pipeline::{AssessmentEvent, CalibrationEvent, FrameLoop, LoopExit};
use proprio_flux::statistics::{SessionHistory, StatsFilter};
use proprio_flux::storage::GUEST_ID;
use proprio_flux::{
    AssessmentProcessor, CalibrationProcessor, FileStore, Handedness, NdjsonDetector, ProprioError, ProprioStore,
    SpasticitySeverity, UserPreference, PRODUCER_NAME, PROPRIO_VERSION,
};

/// Proprio - Hand-tracking proprioception assessment engine
#[derive(Parser)]
#[command(name = "proprio")]
#[command(version = PROPRIO_VERSION)]
#[command(about = "Score upper-limb proprioception from hand landmarks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute target and pointing hand sizes from recorded frames
    Calibrate {
        /// NDJSON detection frames (use - for stdin)
        #[arg(short, long)]
        frames: PathBuf,

        /// Store directory
        #[arg(short, long)]
        store: PathBuf,

        /// User identifier
        #[arg(long, default_value = GUEST_ID)]
        user: String,

        /// Override the stored impaired hand
        #[arg(long)]
        impaired_hand: Option<HandArg>,

        /// Override the stored spasticity severity
        #[arg(long)]
        severity: Option<SeverityArg>,

        /// Target-hand samples needed to finish
        #[arg(long, default_value_t = DEFAULT_CALIBRATION_SAMPLES)]
        samples: usize,
    },

    /// Run one assessment session and print events as NDJSON
    Assess {
        /// NDJSON detection frames (use - for stdin)
        #[arg(short, long)]
        frames: PathBuf,

        /// Store directory
        #[arg(short, long)]
        store: PathBuf,

        /// JSON configuration file, applied before the flags below
        #[arg(long)]
        config: Option<PathBuf>,

        /// User identifier
        #[arg(long)]
        user: Option<String>,

        /// Assessment name used in storage keys
        #[arg(long)]
        assessment: Option<String>,

        /// Trials per session
        #[arg(long)]
        tasks: Option<usize>,

        /// Completion threshold
        #[arg(long)]
        threshold: Option<f64>,

        /// Score unit
        #[arg(long)]
        metric: Option<MetricArg>,

        /// Canvas width in pixels
        #[arg(long)]
        width: Option<f64>,

        /// Canvas height in pixels
        #[arg(long)]
        height: Option<f64>,
    },

    /// Save assessment preferences for a user
    Settings {
        /// Store directory
        #[arg(short, long)]
        store: PathBuf,

        /// User identifier
        #[arg(long, default_value = GUEST_ID)]
        user: String,

        #[arg(long)]
        impaired_hand: Option<HandArg>,

        #[arg(long)]
        severity: Option<SeverityArg>,

        #[arg(long)]
        age: Option<u32>,

        #[arg(long)]
        sex: Option<String>,
    },

    /// Show mean error per stored session
    Stats {
        /// Store directory
        #[arg(short, long)]
        store: PathBuf,

        /// User identifier
        #[arg(long, default_value = GUEST_ID)]
        user: String,

        /// Assessment name used in storage keys
        #[arg(long, default_value = proprio_flux::config::DEFAULT_ASSESSMENT_NAME)]
        assessment: String,

        /// Time window
        #[arg(long, default_value = "all")]
        filter: FilterArg,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose store health and calibration status
    Doctor {
        /// Store directory
        #[arg(short, long)]
        store: PathBuf,

        /// User identifier
        #[arg(long, default_value = GUEST_ID)]
        user: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HandArg {
    Left,
    Right,
}

impl From<HandArg> for Handedness {
    fn from(arg: HandArg) -> Self {
        match arg {
            HandArg::Left => Handedness::Left,
            HandArg::Right => Handedness::Right,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SeverityArg {
    Fingertips,
    Midknuckles,
    Knuckles,
}

impl From<SeverityArg> for SpasticitySeverity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Fingertips => SpasticitySeverity::Fingertips,
            SeverityArg::Midknuckles => SpasticitySeverity::Midknuckles,
            SeverityArg::Knuckles => SpasticitySeverity::Knuckles,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    /// Fingertip distance in canvas pixels
    Px,
    /// Fingertip distance in centimeters
    Cm,
}

impl From<MetricArg> for MetricKind {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Px => MetricKind::FingertipDistancePx,
            MetricArg::Cm => MetricKind::FingertipDistanceCm,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Day,
    Week,
    Month,
}

impl From<FilterArg> for StatsFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => StatsFilter::All,
            FilterArg::Day => StatsFilter::Day,
            FilterArg::Week => StatsFilter::Week,
            FilterArg::Month => StatsFilter::Month,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ProprioCliError> {
    match cli.command {
        Commands::Calibrate {
            frames,
            store,
            user,
            impaired_hand,
            severity,
            samples,
        } => cmd_calibrate(&frames, &store, &user, impaired_hand, severity, samples),

        Commands::Assess {
            frames,
            store,
            config,
            user,
            assessment,
            tasks,
            threshold,
            metric,
            width,
            height,
        } => {
            let mut cfg = match config {
                Some(path) => AssessmentConfig::from_json(&fs::read_to_string(path)?)?,
                None => AssessmentConfig::default(),
            };
            if let Some(user) = user {
                cfg.user_id = user;
            }
            if let Some(assessment) = assessment {
                cfg.assessment_name = assessment;
            }
            if let Some(tasks) = tasks {
                cfg.total_number_of_tasks = tasks;
            }
            if let Some(threshold) = threshold {
                cfg.completion_threshold = threshold;
            }
            if let Some(metric) = metric {
                cfg.metric = metric.into();
            }
            if let Some(width) = width {
                cfg.frame_width = width;
            }
            if let Some(height) = height {
                cfg.frame_height = height;
            }
            cmd_assess(&frames, &store, cfg)
        }

        Commands::Settings {
            store,
            user,
            impaired_hand,
            severity,
            age,
            sex,
        } => cmd_settings(&store, &user, impaired_hand, severity, age, sex),

        Commands::Stats {
            store,
            user,
            assessment,
            filter,
            json,
        } => cmd_stats(&store, &user, &assessment, filter.into(), json),

        Commands::Doctor { store, user, json } => cmd_doctor(&store, &user, json),
    }
}

fn open_frames(path: &Path) -> Result<NdjsonDetector<Box<dyn BufRead>>, ProprioCliError> {
    let reader: Box<dyn BufRead> = if path.to_string_lossy() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(path)?))
    };
    Ok(NdjsonDetector::new(reader))
}

fn cmd_calibrate(
    frames: &Path,
    store_dir: &Path,
    user: &str,
    impaired_hand: Option<HandArg>,
    severity: Option<SeverityArg>,
    samples: usize,
) -> Result<(), ProprioCliError> {
    let store = ProprioStore::new(FileStore::open(store_dir)?);
    let stored = store.load_profile(user)?.preference();
    let preference = UserPreference {
        impaired_hand: impaired_hand.map(Into::into).unwrap_or(stored.impaired_hand),
        spasticity_severity: severity.map(Into::into).unwrap_or(stored.spasticity_severity),
    };

    let mut detector = open_frames(frames)?;
    let mut processor = CalibrationProcessor::new(user, preference, samples, store);
    processor.start();

    let mut warnings = Vec::new();
    FrameLoop::default().run(&mut detector, |frame| {
        for event in processor.process_frame(frame) {
            if let CalibrationEvent::PersistenceWarning { message } = event {
                warnings.push(message);
            }
        }
        if processor.is_computed() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    let Some(calibration) = processor.engine().result() else {
        return Err(ProprioCliError::CalibrationIncomplete {
            collected: processor.engine().progress(),
            required: processor.engine().sample_target(),
        });
    };
    if let Some(message) = warnings.into_iter().next() {
        return Err(ProprioCliError::Core(ProprioError::Storage(message)));
    }

    println!("{}", serde_json::to_string_pretty(&calibration)?);
    Ok(())
}

fn cmd_assess(frames: &Path, store_dir: &Path, config: AssessmentConfig) -> Result<(), ProprioCliError> {
    let store = ProprioStore::new(FileStore::open(store_dir)?);
    let mut processor = AssessmentProcessor::from_store(config, store)?;
    let mut detector = open_frames(frames)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut write_error = None;

    let report = FrameLoop::default().run(&mut detector, |frame| {
        for event in processor.process_frame(frame) {
            if matches!(event, AssessmentEvent::FrameSkipped { .. }) {
                continue;
            }
            let line = serde_json::to_string(&event).map_err(io::Error::from);
            if let Err(e) = line.and_then(|line| writeln!(out, "{line}")) {
                write_error = Some(e);
                return ControlFlow::Break(());
            }
        }
        if processor.is_finished() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    if let Some(e) = write_error {
        return Err(e.into());
    }
    out.flush()?;

    if report.exit == LoopExit::EndOfStream && !processor.is_finished() {
        info!(
            frames = report.frames,
            completed = processor.snapshot().scores.len(),
            "frames ended before the session finished"
        );
    }
    Ok(())
}

fn cmd_settings(
    store_dir: &Path,
    user: &str,
    impaired_hand: Option<HandArg>,
    severity: Option<SeverityArg>,
    age: Option<u32>,
    sex: Option<String>,
) -> Result<(), ProprioCliError> {
    let mut store = ProprioStore::new(FileStore::open(store_dir)?);
    let profile = store.load_profile(user)?;

    let preference = UserPreference {
        impaired_hand: impaired_hand.map(Into::into).unwrap_or(profile.impaired_hand),
        spasticity_severity: severity.map(Into::into).unwrap_or(profile.spasticity_severity),
    };
    let age = age.unwrap_or(profile.age);
    let sex = sex.unwrap_or(profile.sex);

    store.write_preferences(user, &preference, age, &sex)?;
    println!("{}", serde_json::to_string_pretty(&store.load_profile(user)?)?);
    Ok(())
}

fn cmd_stats(
    store_dir: &Path,
    user: &str,
    assessment: &str,
    filter: StatsFilter,
    json: bool,
) -> Result<(), ProprioCliError> {
    let store = ProprioStore::new(FileStore::open(store_dir)?);
    let history = SessionHistory::load(&store, user, assessment)?;
    let sessions = history.filter(filter, Utc::now());

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    println!("Sessions for {} / {} ({})", user, assessment, filter);
    println!("==================================");
    if sessions.is_empty() {
        println!("No sessions recorded");
        return Ok(());
    }
    for stat in &sessions {
        println!(
            "  {}  {:>8.2}  ({} trials)  {}",
            stat.timestamp.format("%Y-%m-%d %H:%M"),
            stat.mean_error,
            stat.trials,
            stat.session_id
        );
    }
    println!("\nOverall mean: {:.2}", SessionHistory::overall_mean(&sessions));
    Ok(())
}

fn cmd_doctor(store_dir: &Path, user: &str, json: bool) -> Result<(), ProprioCliError> {
    let mut checks = Vec::new();

    match FileStore::open(store_dir) {
        Ok(file_store) => {
            let store = ProprioStore::new(file_store);
            checks.push(DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Ok,
                message: format!("Store directory {} is usable", store_dir.display()),
            });

            match store.read_profile(user) {
                Ok(Some(profile)) => {
                    checks.push(DoctorCheck {
                        name: "profile".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Impaired hand {}, severity {}",
                            profile.impaired_hand, profile.spasticity_severity
                        ),
                    });
                    checks.push(match profile.calibration() {
                        Some(c) => DoctorCheck {
                            name: "calibration".to_string(),
                            status: CheckStatus::Ok,
                            message: format!(
                                "Target hand {:.1} cm, pointing hand {:.1} cm",
                                c.target_hand_size, c.pointing_hand_size
                            ),
                        },
                        None => DoctorCheck {
                            name: "calibration".to_string(),
                            status: CheckStatus::Warning,
                            message: "No calibration recorded; run 'proprio calibrate'".to_string(),
                        },
                    });
                }
                Ok(None) => checks.push(DoctorCheck {
                    name: "profile".to_string(),
                    status: CheckStatus::Warning,
                    message: format!("No profile for user '{user}'; defaults will be used"),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "profile".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read profile: {e}"),
                }),
            }
        }
        Err(e) => checks.push(DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot open store directory: {e}"),
        }),
    }

    checks.push(stdin_check(atty::is(atty::Stream::Stdin)));

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PROPRIO_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Proprio Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ProprioCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// `--frames -` needs frames piped in; an interactive terminal has none to give
fn stdin_check(stdin_is_tty: bool) -> DoctorCheck {
    if stdin_is_tty {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Warning,
            message: "stdin is a TTY; pipe frames in or pass --frames <file>".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--frames - ready)".to_string(),
        }
    }
}

// Error types

#[derive(Debug)]
enum ProprioCliError {
    Io(io::Error),
    Core(ProprioError),
    Json(serde_json::Error),
    CalibrationIncomplete { collected: usize, required: usize },
    DoctorFailed,
}

impl From<io::Error> for ProprioCliError {
    fn from(e: io::Error) -> Self {
        ProprioCliError::Io(e)
    }
}

impl From<ProprioError> for ProprioCliError {
    fn from(e: ProprioError) -> Self {
        ProprioCliError::Core(e)
    }
}

impl From<serde_json::Error> for ProprioCliError {
    fn from(e: serde_json::Error) -> Self {
        ProprioCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ProprioCliError> for CliError {
    fn from(e: ProprioCliError) -> Self {
        match e {
            ProprioCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ProprioCliError::Core(e) => {
                let (code, hint) = match &e {
                    ProprioError::CalibrationNotFound { .. } => {
                        ("CALIBRATION_REQUIRED", "Run 'proprio calibrate' for this user first")
                    }
                    ProprioError::InvalidConfig(_) => ("INVALID_CONFIG", "Check the configuration values"),
                    ProprioError::InvalidFrame(_) => {
                        ("INVALID_FRAME", "Each line must be one JSON detection frame")
                    }
                    ProprioError::Storage(_) => ("STORAGE_ERROR", "Check the store directory"),
                    ProprioError::Detector(_) => ("DETECTOR_ERROR", "Check the frame source"),
                    ProprioError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    ProprioError::IoError(_) => ("IO_ERROR", "Check file paths and permissions"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            ProprioCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ProprioCliError::CalibrationIncomplete { collected, required } => CliError {
                code: "CALIBRATION_INCOMPLETE".to_string(),
                message: format!("Collected {collected} of {required} target-hand samples"),
                hint: Some("Record more bimanual frames or lower --samples".to_string()),
            },
            ProprioCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
