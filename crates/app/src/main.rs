mod demo;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use services::{
    Clock, HttpTrailApi, StoreConfig, TrailApi, TrailServiceConfig, TrailSnapshot, TrailStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use trail_core::model::{
    GenerateTrailRequest, LessonId, LessonProgressPatch, ModuleStatus, ParseIdError, Trail,
    TrailId, TrailSummary,
};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingOperand { command: &'static str, what: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidId(ParseIdError),
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingOperand { command, what } => {
                write!(f, "{command} requires a {what}")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidId(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn require_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let raw = require_value(args, flag)?;
    match raw.parse() {
        Ok(value) => Ok(value),
        Err(_) => Err(ArgsError::InvalidNumber { flag, raw }),
    }
}

fn parse_id<T: FromStr<Err = ParseIdError>>(raw: &str) -> Result<T, ArgsError> {
    raw.parse().map_err(ArgsError::InvalidId)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  trails [options] list");
    eprintln!("  trails [options] show <trail-id>");
    eprintln!("  trails [options] generate <language-code> [--force]");
    eprintln!("  trails [options] archive <trail-id>");
    eprintln!("  trails [options] complete <lesson-id> [--score <0-100>] [--seconds <n>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --base-url <url>   trail service base URL");
    eprintln!("  --token <token>    bearer token for the trail service");
    eprintln!("  --poll-ms <ms>     generation status poll interval");
    eprintln!("  --demo             use built-in sample data instead of a service");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TRAILS_API_BASE_URL, TRAILS_API_TOKEN, TRAILS_POLL_INTERVAL_MS,");
    eprintln!("  TRAILS_REQUEST_TIMEOUT_SECS, RUST_LOG");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List,
    Show(TrailId),
    Generate { language: String, force: bool },
    Archive(TrailId),
    Complete {
        lesson: LessonId,
        score: Option<u8>,
        seconds: Option<u32>,
    },
}

#[derive(Debug)]
struct Args {
    command: Command,
    demo: bool,
    /// `TRAILS_*` values given on the command line; they win over the environment.
    overrides: HashMap<&'static str, String>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut args = args.into_iter();
        let mut demo = false;
        let mut overrides = HashMap::new();
        let mut force = false;
        let mut score = None;
        let mut seconds = None;
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--base-url" => {
                    let value = require_value(&mut args, "--base-url")?;
                    overrides.insert("TRAILS_API_BASE_URL", value);
                }
                "--token" => {
                    let value = require_value(&mut args, "--token")?;
                    overrides.insert("TRAILS_API_TOKEN", value);
                }
                "--poll-ms" => {
                    let ms: u64 = require_number(&mut args, "--poll-ms")?;
                    overrides.insert("TRAILS_POLL_INTERVAL_MS", ms.to_string());
                }
                "--demo" => demo = true,
                "--force" => force = true,
                "--score" => score = Some(require_number(&mut args, "--score")?),
                "--seconds" => seconds = Some(require_number(&mut args, "--seconds")?),
                "--help" | "-h" => return Ok(None),
                _ if arg.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let Some(name) = positional.next() else {
            return Ok(None);
        };
        let mut operand = |command: &'static str, what: &'static str| {
            positional
                .next()
                .ok_or(ArgsError::MissingOperand { command, what })
        };

        let command = match name.as_str() {
            "list" => Command::List,
            "show" => Command::Show(parse_id(&operand("show", "trail id")?)?),
            "generate" => Command::Generate {
                language: operand("generate", "language code")?,
                force,
            },
            "archive" => Command::Archive(parse_id(&operand("archive", "trail id")?)?),
            "complete" => Command::Complete {
                lesson: parse_id(&operand("complete", "lesson id")?)?,
                score,
                seconds,
            },
            _ => return Err(ArgsError::UnknownCommand(name)),
        };
        if let Some(extra) = positional.next() {
            return Err(ArgsError::UnknownArg(extra));
        }

        Ok(Some(Self {
            command,
            demo,
            overrides,
        }))
    }

    fn store_config(
        &self,
    ) -> Result<(Arc<dyn TrailApi>, StoreConfig), Box<dyn std::error::Error>> {
        if self.demo {
            let mut config = StoreConfig::default();
            if let Some(ms) = self.overrides.get("TRAILS_POLL_INTERVAL_MS") {
                config.poll_interval = Duration::from_millis(ms.parse()?);
            } else {
                config.poll_interval = Duration::from_millis(500);
            }
            let api = demo::backend(Clock::default())?;
            return Ok((Arc::new(api), config));
        }

        let config = TrailServiceConfig::from_lookup(|key| {
            self.overrides
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })?;
        let api = HttpTrailApi::new(&config)?;
        Ok((Arc::new(api), config.store_config()))
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

// ─── Output ────────────────────────────────────────────────────────────────

fn print_summary(summary: &TrailSummary) {
    println!(
        "{:<8} {:<12} {:<4} {:<11} {:>3}/{:<3} {:>3}%",
        summary.id,
        summary.language.language_name,
        summary.language.level_code,
        format!("{:?}", summary.status),
        summary.lessons_completed,
        summary.total_lessons,
        summary.progress_percentage,
    );
}

fn print_trail(trail: &Trail) {
    let language = trail.language();
    println!(
        "{} {} {} ({:?})",
        trail.id(),
        language.language_name,
        language.level_name,
        trail.status()
    );
    for module in trail.modules() {
        let marker = match module.status() {
            ModuleStatus::Ready => "",
            ModuleStatus::Pending => " [generating]",
        };
        println!(
            "  {}. {} ({}){marker}",
            module.order_index() + 1,
            module.title(),
            module.competency_name()
        );
        for lesson in module.lessons() {
            let check = if lesson.is_completed() { "x" } else { " " };
            let score = lesson
                .score()
                .map(|s| format!(" score {s}"))
                .unwrap_or_default();
            println!("     [{check}] {} {}{score}", lesson.id(), lesson.title());
        }
    }
    let progress = trail.progress();
    println!(
        "progress {}% ({}/{} lessons, {} min)",
        progress.progress_percentage,
        progress.lessons_completed,
        progress.total_lessons,
        progress.time_spent_minutes
    );
}

fn print_overall(snapshot: &TrailSnapshot) {
    let overall = snapshot.overall_progress();
    let average = overall
        .average_score
        .map(|avg| format!(", average score {avg:.0}"))
        .unwrap_or_default();
    println!(
        "{} active, {}/{} lessons completed{average}",
        snapshot.active_trails().len(),
        overall.lessons_completed,
        overall.total_lessons
    );
}

// ─── Commands ──────────────────────────────────────────────────────────────

async fn list(store: &TrailStore) -> Result<(), Box<dyn std::error::Error>> {
    store.load_active_trails().await?;
    let active: Vec<TrailId> = store
        .snapshot()
        .active_trails()
        .iter()
        .map(|summary| summary.id.clone())
        .collect();
    for id in &active {
        store.load_trail(id).await?;
    }

    let snapshot = store.snapshot();
    for summary in snapshot.active_trails() {
        print_summary(summary);
    }
    print_overall(&snapshot);
    Ok(())
}

/// Follow a generation until it completes or the user interrupts.
async fn follow_generation(
    store: &TrailStore,
    trail_id: &TrailId,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = store.watch();
    let mut last_step = None;

    loop {
        let snapshot = Arc::clone(&rx.borrow_and_update());
        if let Some(status) = snapshot.generation_status_for(trail_id) {
            let step = (status.progress_percentage, status.current_step.clone());
            if last_step.as_ref() != Some(&step) {
                println!(
                    "{:>3}% {} ({}/{} modules)",
                    status.progress_percentage,
                    status.current_step,
                    status.modules_generated,
                    status.total_modules
                );
                last_step = Some(step);
            }
            if let Some(message) = &status.error_message {
                println!("     {message}");
            }
        } else if !store.is_watching(trail_id) {
            match snapshot.trail(trail_id) {
                Some(trail) => print_trail(trail),
                None => {
                    if let Some(error) = snapshot.error() {
                        return Err(error.into());
                    }
                }
            }
            return Ok(());
        }

        tokio::select! {
            changed = rx.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                info!(%trail_id, "interrupted, generation continues remotely");
                return Ok(());
            }
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (api, config) = args.store_config()?;
    let store = TrailStore::new(api, config);

    match args.command {
        Command::List => list(&store).await?,
        Command::Show(id) => {
            let trail = store.load_trail(&id).await?;
            print_trail(&trail);
        }
        Command::Generate { language, force } => {
            store.load_active_trails().await?;
            let request = if force {
                GenerateTrailRequest::regenerate(language)
            } else {
                GenerateTrailRequest::new(language)
            };
            let trail_id = store.generate_trail(request).await?;
            println!("generating {trail_id}");
            follow_generation(&store, &trail_id).await?;
        }
        Command::Archive(id) => {
            store.load_active_trails().await?;
            store.archive_trail(&id).await?;
            println!("archived {id}");
            print_overall(&store.snapshot());
        }
        Command::Complete {
            lesson,
            score,
            seconds,
        } => {
            store.load_active_trails().await?;
            let active: Vec<TrailId> = store
                .snapshot()
                .active_trails()
                .iter()
                .map(|summary| summary.id.clone())
                .collect();
            for id in &active {
                store.load_trail(id).await?;
            }

            let updated = store
                .update_lesson_progress(&lesson, LessonProgressPatch::completed(score, seconds))
                .await?;
            println!(
                "completed {} {}",
                updated.id(),
                updated
                    .score()
                    .map(|s| format!("(score {s})"))
                    .unwrap_or_default()
            );
            print_overall(&store.snapshot());
        }
    }

    store.dispose();
    Ok(())
}

#[tokio::main]
async fn main() {
    let parsed = match Args::parse(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_usage();
            return;
        }
        Err(err) => {
            eprintln!("{err}");
            print_usage();
            std::process::exit(2);
        }
    };

    init_tracing();
    if let Err(err) = run(parsed).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
