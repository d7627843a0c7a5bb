use std::fmt;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use assess_core::model::{
    Alternative, AlternativeId, AssessmentGroupId, AssessmentId, ExamUnit, ExamUnitId, Question,
    QuestionId, UserId,
};
use services::{
    Clock, CurrentView, ExitIntent, FinalizeTrigger, Navigation, SessionConfig,
    SessionController, SessionSnapshot, SessionTarget, StateTag,
};
use storage::http::HttpStoreConfig;
use storage::{AssessmentTemplate, InMemoryStore, RemoteStore};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    MissingTarget { flag: &'static str },
    InvalidApiUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::MissingTarget { flag } => {
                write!(f, "{flag} is required unless --demo is given")
            }
            ArgsError::InvalidApiUrl { raw } => write!(f, "invalid --api-url value: {raw}"),
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

fn parse_id(flag: &'static str, raw: &str) -> Result<u64, ArgsError> {
    raw.trim().parse().map_err(|_| ArgsError::InvalidId {
        flag,
        raw: raw.to_owned(),
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- --demo");
    eprintln!("  cargo run -p app -- --api-url <url> --group-id <id> --assessment-id <id> --user-id <id>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  ASSESS_API_URL, ASSESS_API_TOKEN, ASSESS_API_TIMEOUT_SECS");
    eprintln!("  ASSESS_GROUP_ID, ASSESS_ASSESSMENT_ID, ASSESS_USER_ID");
    eprintln!("  ASSESS_SYNC_INTERVAL_SECS, ASSESS_SYNC_MIN_DELTA_SECS, ASSESS_DISPLAY_REFRESH_SECS");
    eprintln!("  RUST_LOG (default: info)");
}

struct Args {
    demo: bool,
    api_url: Option<String>,
    group_id: Option<u64>,
    assessment_id: Option<u64>,
    user_id: Option<u64>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let env_id = |var: &'static str| -> Result<Option<u64>, ArgsError> {
            std::env::var(var)
                .ok()
                .map(|raw| parse_id(var, &raw))
                .transpose()
        };
        let mut parsed = Self {
            demo: false,
            api_url: None,
            group_id: env_id("ASSESS_GROUP_ID")?,
            assessment_id: env_id("ASSESS_ASSESSMENT_ID")?,
            user_id: env_id("ASSESS_USER_ID")?,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--demo" => parsed.demo = true,
                "--api-url" => parsed.api_url = Some(require_value(args, "--api-url")?),
                "--group-id" => {
                    let value = require_value(args, "--group-id")?;
                    parsed.group_id = Some(parse_id("--group-id", &value)?);
                }
                "--assessment-id" => {
                    let value = require_value(args, "--assessment-id")?;
                    parsed.assessment_id = Some(parse_id("--assessment-id", &value)?);
                }
                "--user-id" => {
                    let value = require_value(args, "--user-id")?;
                    parsed.user_id = Some(parse_id("--user-id", &value)?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn target(&self) -> Result<SessionTarget, ArgsError> {
        if self.demo {
            return Ok(SessionTarget {
                group_id: AssessmentGroupId::new(self.group_id.unwrap_or(DEMO_GROUP)),
                assessment_id: AssessmentId::new(self.assessment_id.unwrap_or(DEMO_ASSESSMENT)),
                user_id: UserId::new(self.user_id.unwrap_or(DEMO_USER)),
            });
        }
        Ok(SessionTarget {
            group_id: AssessmentGroupId::new(
                self.group_id
                    .ok_or(ArgsError::MissingTarget { flag: "--group-id" })?,
            ),
            assessment_id: AssessmentId::new(
                self.assessment_id
                    .ok_or(ArgsError::MissingTarget { flag: "--assessment-id" })?,
            ),
            user_id: UserId::new(
                self.user_id
                    .ok_or(ArgsError::MissingTarget { flag: "--user-id" })?,
            ),
        })
    }

    fn store(&self, clock: &Clock) -> Result<RemoteStore, Box<dyn std::error::Error>> {
        if self.demo {
            return Ok(RemoteStore::in_memory(&demo_store(clock)?));
        }
        let config = match &self.api_url {
            Some(raw) => {
                let env_config = HttpStoreConfig::from_env().ok();
                let mut config = HttpStoreConfig::parse(raw)
                    .map_err(|_| ArgsError::InvalidApiUrl { raw: raw.clone() })?;
                if let Some(env_config) = env_config {
                    config.api_token = env_config.api_token;
                    config.timeout = env_config.timeout;
                }
                config
            }
            None => HttpStoreConfig::from_env()?,
        };
        Ok(RemoteStore::http(config)?)
    }
}

//
// ─── DEMO DATA ─────────────────────────────────────────────────────────────────
//

const DEMO_GROUP: u64 = 1;
const DEMO_ASSESSMENT: u64 = 1;
const DEMO_USER: u64 = 1;
const DEMO_DURATION_SECS: u64 = 300;

fn demo_store(clock: &Clock) -> Result<InMemoryStore, Box<dyn std::error::Error>> {
    let maths = ExamUnitId::new(10);
    let writing = ExamUnitId::new(20);
    let store = InMemoryStore::new().with_clock(clock.clone());

    let questions = vec![
        Question::objective(
            QuestionId::new(1),
            maths,
            0,
            "What is 7 x 8?",
            vec![
                Alternative::new(AlternativeId::new(11), 0, "54"),
                Alternative::new(AlternativeId::new(12), 1, "56"),
                Alternative::new(AlternativeId::new(13), 2, "64"),
            ],
        )?,
        Question::objective(
            QuestionId::new(2),
            maths,
            1,
            "Which number is prime?",
            vec![
                Alternative::new(AlternativeId::new(21), 0, "21"),
                Alternative::new(AlternativeId::new(22), 1, "27"),
                Alternative::new(AlternativeId::new(23), 2, "29"),
            ],
        )?,
        Question::open_response(
            QuestionId::new(3),
            maths,
            2,
            "Explain how you checked your answer to the first question.",
        ),
    ];
    let template = AssessmentTemplate::new(
        AssessmentId::new(DEMO_ASSESSMENT),
        AssessmentGroupId::new(DEMO_GROUP),
        DEMO_DURATION_SECS,
        vec![
            ExamUnit::new(maths, "Maths"),
            ExamUnit::new(writing, "Writing").with_essay(),
        ],
    )
    .with_answer(QuestionId::new(1), AlternativeId::new(12))
    .with_answer(QuestionId::new(2), AlternativeId::new(23));
    store.register_assessment(template, questions)?;
    Ok(store)
}

//
// ─── SHELL ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Show,
    Next,
    Prev,
    Goto(usize),
    Essay,
    Pick(usize),
    Type(String),
    Save,
    Finish,
    ConfirmFinish,
    Dismiss(u64),
    Retry,
    Exit,
    ConfirmExit,
    Help,
}

impl ShellCommand {
    fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let number = |what: &str| -> Result<usize, String> {
            rest.parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("{what} expects a number from 1"))
        };
        match word {
            "show" | "" => Ok(Self::Show),
            "next" => Ok(Self::Next),
            "prev" => Ok(Self::Prev),
            "goto" => number("goto").map(|n| Self::Goto(n - 1)),
            "essay" => Ok(Self::Essay),
            "pick" => number("pick").map(|n| Self::Pick(n - 1)),
            "type" => Ok(Self::Type(rest.to_owned())),
            "save" => Ok(Self::Save),
            "finish" => Ok(Self::Finish),
            "confirm-finish" => Ok(Self::ConfirmFinish),
            "dismiss" => rest
                .parse()
                .map(Self::Dismiss)
                .map_err(|_| "dismiss expects a notice id".to_owned()),
            "retry" => Ok(Self::Retry),
            "exit" => Ok(Self::Exit),
            "confirm-exit" => Ok(Self::ConfirmExit),
            "help" => Ok(Self::Help),
            other => Err(format!("unknown command: {other} (try help)")),
        }
    }
}

fn print_commands() {
    println!("commands: show | next | prev | goto <n> | essay | pick <n> | type <text> | save");
    println!("          finish | confirm-finish | dismiss <id> | retry | exit | confirm-exit");
}

fn render(snapshot: &SessionSnapshot) {
    let countdown = snapshot
        .countdown
        .map_or_else(|| "--:--".to_owned(), |c| c.to_string());
    match snapshot.progress {
        Some(progress) => println!(
            "[{}] {} left, {}/{} answered ({}%)",
            snapshot.state, countdown, progress.answered, progress.total, progress.percent
        ),
        None => println!("[{}]", snapshot.state),
    }

    match &snapshot.view {
        Some(CurrentView::Question(view)) => {
            println!(
                "question {}/{} ({:?}): {}",
                view.position + 1,
                view.total,
                view.status,
                view.prompt
            );
            for (index, alt) in view.alternatives.iter().enumerate() {
                let mark = match (alt.selected, alt.confirmed) {
                    (true, true) => "[x]",
                    (true, false) => "[~]",
                    _ => "[ ]",
                };
                println!("  {mark} {}. {}", index + 1, alt.text);
            }
            if let Some(text) = &view.text {
                println!("  > {text}");
            }
        }
        Some(CurrentView::Essay(view)) => {
            println!("essay for {} ({:?}):", view.unit_name, view.status);
            println!("  > {}", view.text);
        }
        None => {}
    }

    for notice in &snapshot.notices {
        println!("notice #{}: {}", notice.id, notice.message);
    }
    if let Some(failure) = &snapshot.failure {
        let hint = if failure.is_retryable() {
            "type retry to try again"
        } else {
            "restart to go back"
        };
        println!("error ({}): {} - {hint}", failure.kind, failure.message);
    }
    if snapshot.state == StateTag::Empty {
        println!("this assessment has nothing to answer");
    }
    if let Some(result) = &snapshot.result {
        let score = result
            .score
            .map_or_else(|| "pending".to_owned(), |s| s.to_string());
        println!(
            "attempt {} submitted after {}s, score: {score}",
            result.attempt_id, result.elapsed_secs
        );
    }
}

/// What the loop does after a command.
enum Flow {
    Continue,
    Quit,
}

async fn dispatch(controller: &SessionController, command: ShellCommand) -> Flow {
    let snapshot = controller.snapshot();
    let outcome: Result<(), String> = match command {
        ShellCommand::Show => Ok(()),
        ShellCommand::Help => {
            print_commands();
            return Flow::Continue;
        }
        ShellCommand::Next => controller
            .navigate(Navigation::Next)
            .map(drop)
            .map_err(|e| e.to_string()),
        ShellCommand::Prev => controller
            .navigate(Navigation::Previous)
            .map(drop)
            .map_err(|e| e.to_string()),
        ShellCommand::Goto(position) => controller
            .navigate(Navigation::Question(position))
            .map(drop)
            .map_err(|e| e.to_string()),
        ShellCommand::Essay => controller
            .navigate(Navigation::Essay)
            .map(drop)
            .map_err(|e| e.to_string()),
        ShellCommand::Pick(index) => match &snapshot.view {
            Some(CurrentView::Question(view)) => match view.alternatives.get(index) {
                Some(alt) => controller
                    .select_alternative(view.question_id, alt.id)
                    .await
                    .map(drop)
                    .map_err(|e| e.to_string()),
                None => Err(format!("no alternative {}", index + 1)),
            },
            _ => Err("pick works on a question".to_owned()),
        },
        ShellCommand::Type(text) => match &snapshot.view {
            Some(CurrentView::Question(view)) => controller
                .edit_text(view.question_id, text)
                .map_err(|e| e.to_string()),
            Some(CurrentView::Essay(_)) => controller.edit_essay(text).map_err(|e| e.to_string()),
            None => Err("nothing to type into".to_owned()),
        },
        ShellCommand::Save => match &snapshot.view {
            Some(CurrentView::Question(view)) => controller
                .save_text(view.question_id)
                .await
                .map(drop)
                .map_err(|e| e.to_string()),
            Some(CurrentView::Essay(_)) => controller
                .save_essay()
                .await
                .map(drop)
                .map_err(|e| e.to_string()),
            None => Err("nothing to save".to_owned()),
        },
        ShellCommand::Finish => {
            match controller.finalize_prompt() {
                Some(prompt) => println!(
                    "{} unanswered, {} unsaved, {}s left. type confirm-finish to submit",
                    prompt.unanswered, prompt.unsaved, prompt.remaining_secs
                ),
                None => println!("nothing to submit right now"),
            }
            return Flow::Continue;
        }
        ShellCommand::ConfirmFinish => controller
            .finalize(FinalizeTrigger::Manual)
            .await
            .map(drop)
            .map_err(|e| e.to_string()),
        ShellCommand::Dismiss(id) => {
            if controller.dismiss_notice(id) {
                Ok(())
            } else {
                Err(format!("no notice #{id}"))
            }
        }
        ShellCommand::Retry => controller.retry().await.map(drop).map_err(|e| e.to_string()),
        ShellCommand::Exit => match controller.exit_intent() {
            ExitIntent::Leave => {
                controller.leave();
                return Flow::Quit;
            }
            ExitIntent::ConfirmDiscard(items) => {
                println!(
                    "{} unsaved item(s) will be lost. type confirm-exit to leave anyway",
                    items.len()
                );
                return Flow::Continue;
            }
        },
        ShellCommand::ConfirmExit => {
            controller.leave();
            return Flow::Quit;
        }
    };

    if let Err(message) = outcome {
        println!("! {message}");
    }
    render(&controller.snapshot());
    Flow::Continue
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let target = args.target()?;
    let clock = Clock::default_clock();
    let store = args.store(&clock)?;
    let config = SessionConfig::from_env()?;
    tracing::info!(
        group = %target.group_id,
        assessment = %target.assessment_id,
        user = %target.user_id,
        demo = args.demo,
        "opening assessment session"
    );

    let controller = SessionController::new(store, clock, config, target);
    controller.open().await?;
    render(&controller.snapshot());
    print_commands();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match ShellCommand::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("! {message}");
                continue;
            }
        };
        if let Flow::Quit = dispatch(&controller, command).await {
            break;
        }
    }
    controller.leave();
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
