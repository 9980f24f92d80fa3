use std::fmt;
use std::path::PathBuf;

use prep_core::model::{Difficulty, QuestionKind, QuestionStatus, SessionResult, TopicId, UserId};
use services::{NextOutcome, Notice, SessionCriteria, SessionEngine, SessionSettings, TickResult};
use storage::load_bank;
use storage::repository::{QuestionScope, SessionType, Storage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidValue { flag: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidValue { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
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

fn parse_with<T>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, ArgsError> {
    let raw = require_value(args, flag)?;
    parse(&raw).ok_or(ArgsError::InvalidValue { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [--bank <path>] [--user <id>] [--type <session type>]");
    eprintln!("                      [--scope <mixed|question kind>] [--difficulty <level>]");
    eprintln!("                      [--topic <id>] [--limit <n>] [--seconds <n>]");
    eprintln!("                      [--no-timer] [--auto-advance] [--json]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --bank data/sample_bank.json");
    eprintln!("  --user learner");
    eprintln!("  --type practice");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PREP_BANK, PREP_USER, PREP_ENABLE_TIMER, PREP_SECONDS_PER_QUESTION,");
    eprintln!("  PREP_AUTO_ADVANCE, PREP_DEFAULT_LIMIT, RUST_LOG");
}

fn print_commands() {
    println!("commands: 1-4 select | s submit | n next | g <n> go to | f flag");
    println!("          l list | r reset | q finish | h help");
}

#[derive(Debug)]
struct Args {
    bank: PathBuf,
    user: UserId,
    criteria: SessionCriteria,
    seconds: Option<u32>,
    no_timer: bool,
    auto_advance: bool,
    json: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            bank: std::env::var("PREP_BANK")
                .map_or_else(|_| PathBuf::from("data/sample_bank.json"), PathBuf::from),
            user: std::env::var("PREP_USER")
                .map_or_else(|_| UserId::new("learner"), UserId::new),
            criteria: SessionCriteria::default(),
            seconds: None,
            no_timer: false,
            auto_advance: false,
            json: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--bank" => parsed.bank = PathBuf::from(require_value(args, "--bank")?),
                "--user" => {
                    parsed.user = parse_with(args, "--user", |raw| {
                        (!raw.trim().is_empty()).then(|| UserId::new(raw.trim()))
                    })?;
                }
                "--type" => {
                    parsed.criteria.session_type = parse_with(args, "--type", SessionType::parse)?;
                }
                "--scope" => parsed.criteria.scope = parse_with(args, "--scope", parse_scope)?,
                "--difficulty" => {
                    parsed.criteria.difficulty =
                        Some(parse_with(args, "--difficulty", Difficulty::parse)?);
                }
                "--topic" => {
                    parsed.criteria.topic_id = Some(TopicId::new(require_value(args, "--topic")?));
                }
                "--limit" => {
                    parsed.criteria.limit =
                        Some(parse_with(args, "--limit", |raw| raw.parse::<u32>().ok())?);
                }
                "--seconds" => {
                    parsed.seconds = Some(parse_with(args, "--seconds", |raw| raw.parse().ok())?);
                }
                "--no-timer" => parsed.no_timer = true,
                "--auto-advance" => parsed.auto_advance = true,
                "--json" => parsed.json = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn settings(&self) -> Result<SessionSettings, Box<dyn std::error::Error>> {
        let mut settings = SessionSettings::from_env()?;
        if let Some(seconds) = self.seconds {
            settings = settings.with_seconds_per_question(seconds)?;
        }
        if self.no_timer {
            settings = settings.with_timer(false);
        }
        if self.auto_advance {
            settings = settings.with_auto_advance(true);
        }
        Ok(settings)
    }
}

fn parse_scope(raw: &str) -> Option<QuestionScope> {
    if raw.trim().eq_ignore_ascii_case("mixed") {
        return Some(QuestionScope::Mixed);
    }
    QuestionKind::parse(raw).map(QuestionScope::Kind)
}

//
// ─── RENDERING ─────────────────────────────────────────────────────────────────
//

fn render_current(engine: &SessionEngine) {
    let Some(session) = engine.session() else {
        return;
    };
    let index = session.current_index();
    let question = session.current_question();

    println!();
    if let Some(passage) = question.passage() {
        if let Some(title) = passage.title() {
            println!("== {title} ==");
        }
        if let Some(text) = passage.text() {
            println!("{text}");
        }
        for line in passage.lines() {
            println!("{:>3}  {}", line.line_number, line.text);
        }
        println!();
    }

    let flag = if session.is_flagged(index) { " [flagged]" } else { "" };
    println!("[{}/{}] {}{flag}", index + 1, session.len(), question.text());
    for (i, option) in question.options().iter().enumerate() {
        let marker = if session.selection().map(usize::from) == Some(i) {
            '>'
        } else {
            ' '
        };
        println!(" {marker} {}. {option}", i + 1);
    }

    if let Some(record) = session.answer(index) {
        let verdict = match (record.is_correct, record.timed_out) {
            (true, _) => "correct",
            (false, true) => "time's up",
            (false, false) => "incorrect",
        };
        println!(
            "   {verdict}; answer: {}",
            usize::from(question.correct_answer()) + 1
        );
        if let Some(explanation) = question.explanation() {
            println!("   {explanation}");
        }
    }
}

fn render_navigator(engine: &SessionEngine) {
    let cells: Vec<String> = engine
        .navigator()
        .into_iter()
        .map(|item| {
            let status = match item.status {
                QuestionStatus::Unanswered => '.',
                QuestionStatus::Correct => '+',
                QuestionStatus::Incorrect => 'x',
            };
            let flag = if item.flagged { "!" } else { "" };
            let current = if item.is_current { "*" } else { "" };
            format!("{}{status}{flag}{current}", item.index + 1)
        })
        .collect();
    println!("{}", cells.join(" "));
    if let Some(progress) = engine.progress() {
        println!(
            "answered {}/{} | score {} | flagged {}",
            progress.answered, progress.total, progress.score, progress.flagged
        );
    }
}

fn print_result(result: &SessionResult, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    let achievements = result.achievements();
    println!();
    println!("Session complete: {}", result.band().label());
    println!(
        "score {}/{} | answered {} | accuracy {:.0}%",
        result.final_score(),
        result.total_questions(),
        result.answered(),
        result.accuracy()
    );
    for (earned, label) in [
        (achievements.perfect_score, "perfect score"),
        (achievements.all_answered, "all answered"),
        (achievements.no_flags, "no flags left"),
    ] {
        if earned {
            println!("  * {label}");
        }
    }
    Ok(())
}

//
// ─── LOOP ──────────────────────────────────────────────────────────────────────
//

enum Flow {
    Continue,
    Finish,
}

async fn apply_command(engine: &mut SessionEngine, input: &str) -> Flow {
    let mut parts = input.split_whitespace();
    let Some(command) = parts.next() else {
        return Flow::Continue;
    };

    let outcome = match command {
        "1" | "2" | "3" | "4" => command
            .parse::<usize>()
            .map_or(Ok(()), |n| engine.select_answer(n - 1)),
        "s" => engine.submit_answer().map(|_| ()),
        "n" => match engine.next_question().await {
            Ok(NextOutcome::Completed(_)) => return Flow::Finish,
            Ok(NextOutcome::Moved { .. }) => Ok(()),
            Err(err) => Err(err),
        },
        "g" => match parts.next().and_then(|raw| raw.parse::<usize>().ok()) {
            Some(n) if n > 0 => engine.navigate_to(n - 1),
            _ => {
                println!("usage: g <question number>");
                return Flow::Continue;
            }
        },
        "f" => engine.toggle_flag().map(|_| ()),
        "r" => engine.reset_progress(),
        "l" => {
            render_navigator(engine);
            return Flow::Continue;
        }
        "q" => return Flow::Finish,
        "h" => {
            print_commands();
            return Flow::Continue;
        }
        other => {
            println!("unknown command: {other}");
            return Flow::Continue;
        }
    };

    match outcome {
        Ok(()) => render_current(engine),
        Err(err) => println!("{err}"),
    }
    if engine.is_complete() {
        return Flow::Finish;
    }
    Flow::Continue
}

fn report_tick(engine: &SessionEngine, result: TickResult) -> Flow {
    match result {
        TickResult::Ignored => {}
        TickResult::Counting { remaining } if remaining <= 5 || remaining % 15 == 0 => {
            println!("   {remaining}s left");
        }
        TickResult::Counting { .. } => {}
        TickResult::Expired { advanced, .. } => {
            println!("   time's up");
            if matches!(advanced, Some(NextOutcome::Completed(_))) {
                return Flow::Finish;
            }
            render_current(engine);
        }
    }
    if engine.is_complete() {
        return Flow::Finish;
    }
    Flow::Continue
}

fn print_notices(engine: &mut SessionEngine) {
    for notice in engine.drain_notices() {
        if let Notice::ReportFailed { question_id, error } = notice {
            eprintln!("(answer to question {question_id} was not saved: {error})");
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let settings = args.settings()?;

    let questions = load_bank(&args.bank)?;
    info!(bank = %args.bank.display(), questions = questions.len(), "question bank loaded");
    let storage = Storage::in_memory(questions);

    let mut engine = SessionEngine::new(args.user.clone(), settings, &storage);
    if let Err(err) = engine.initialize(args.criteria.clone()).await {
        if !err.is_retryable() {
            return Err(err.into());
        }
        eprintln!("could not start a session ({err}); retrying");
        engine.initialize(args.criteria.clone()).await?;
    }
    print_commands();
    render_current(&engine);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let flow = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => apply_command(&mut engine, line.trim()).await,
                None => Flow::Finish,
            },
            Some(tick) = engine.next_tick() => match engine.handle_tick(tick).await {
                Ok(result) => report_tick(&engine, result),
                Err(err) => {
                    eprintln!("{err}");
                    Flow::Finish
                }
            },
        };
        print_notices(&mut engine);
        if matches!(flow, Flow::Finish) {
            break;
        }
    }

    engine.shutdown();
    let result = match engine.finalize().await {
        Ok(result) => result,
        Err(err) if err.is_retryable() => {
            eprintln!("could not record session completion ({err}); retrying");
            engine.retry_completion().await?
        }
        Err(err) => return Err(err.into()),
    };
    engine.flush_reports().await;
    print_notices(&mut engine);
    print_result(&result, args.json)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
