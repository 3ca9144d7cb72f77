//! Chat with a hosted LLM in the terminal.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::time::Duration;

use helflinq::core::{
    Coordinator, CoordinatorBuilder, ResponseContent, RetryPolicy,
    SegmentStyle, StoreChange, TranscriptEntry,
};
use helflinq::{ClientConfig, LoggingSpeaker};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum UiEvent {
    Changed(StoreChange, Option<TranscriptEntry>),
    Idle,
}

enum Command<'a> {
    Send(&'a str),
    Retry,
    Clear,
    Switch(&'a str),
    Help,
    Quit,
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        let Some(cmd) = line.strip_prefix('/') else {
            return (!line.is_empty()).then_some(Command::Send(line));
        };
        let (name, arg) = cmd.split_once(' ').unwrap_or((cmd, ""));
        Some(match name {
            "retry" => Command::Retry,
            "clear" => Command::Clear,
            "switch" => Command::Switch(arg.trim()),
            "quit" | "exit" => Command::Quit,
            _ => Command::Help,
        })
    }
}

const BAR_CHAR: &str = "▎";
const HELP: &str = "\
/retry            send the last message again
/clear            forget the conversation
/switch <name>    talk to another provider (openai, google)
/quit             leave
Ctrl-C while waiting cancels the response.";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let client = match ClientConfig::from_env().and_then(|c| c.create_client())
    {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let coordinator = CoordinatorBuilder::with_any_client(client)
        .with_retry_policy(RetryPolicy::with_max_retries(2))
        .with_speaker(LoggingSpeaker::new())
        .on_idle({
            let event_tx = event_tx.clone();
            move || {
                event_tx.send(UiEvent::Idle).ok();
            }
        })
        .on_store_change({
            let event_tx = event_tx.clone();
            move |change, entries| {
                event_tx
                    .send(UiEvent::Changed(*change, entries.last().cloned()))
                    .ok();
            }
        })
        .build();

    print_title(&coordinator).await;

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    'outer: loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };

        // Whatever happened while nobody was waiting is stale by now.
        while event_rx.try_recv().is_ok() {}

        match command {
            Command::Send(text) => {
                if coordinator.submit(text).is_err() {
                    break;
                }
            }
            Command::Retry => {
                let last = coordinator.snapshot().await.ok().and_then(|mut e| e.pop());
                let Some(last) = last.filter(|e| !e.is_interacting()) else {
                    println!("Nothing to retry.");
                    continue;
                };
                if coordinator.retry(last.id()).is_err() {
                    break;
                }
            }
            Command::Clear => {
                coordinator.clear_all().ok();
                println!("{}", "Conversation cleared.".dimmed());
                continue;
            }
            Command::Switch(name) => {
                match ClientConfig::for_provider(name)
                    .and_then(|c| c.create_client())
                {
                    Ok(client) => {
                        coordinator.switch_client(client).ok();
                        print_title(&coordinator).await;
                    }
                    Err(err) => eprintln!("{err}"),
                }
                continue;
            }
            Command::Help => {
                println!("{HELP}");
                continue;
            }
            Command::Quit => break,
        }

        let mut progress_bar = None;

        loop {
            // Create a new progress bar if it has been finished.
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("🤔 Thinking...");
                    progress_bar
                })
                .inc(1);

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = tokio::signal::ctrl_c() => {
                    debug!("cancelling on user request");
                    coordinator.cancel().ok();
                    continue;
                },
                _ = sleep => {
                    continue;
                }
            };

            match event {
                UiEvent::Changed(StoreChange::Replaced(_), Some(entry))
                    if entry.is_interacting() =>
                {
                    if let Some(progress_bar) = &progress_bar {
                        progress_bar.set_message(preview(&entry));
                    }
                }
                UiEvent::Changed(StoreChange::Replaced(_), Some(entry)) => {
                    // Finish the progress bar before printing anything else.
                    if let Some(progress_bar) = progress_bar.take() {
                        progress_bar.finish_and_clear();
                    }
                    print_entry(&entry);
                }
                UiEvent::Changed(..) => {}
                UiEvent::Idle => break,
            }
        }

        if let Some(progress_bar) = progress_bar {
            progress_bar.finish_and_clear();
        }
    }

    coordinator.shutdown();
}

async fn print_title(coordinator: &Coordinator) {
    if let Ok(provider) = coordinator.provider().await {
        println!(
            "{} {}",
            provider.navigation_title.bright_white().bold(),
            format!("({})", provider.display_name).dimmed()
        );
    }
}

fn preview(entry: &TranscriptEntry) -> String {
    const WIDTH: usize = 60;
    let text = entry.response_text();
    let text = text.lines().last().unwrap_or_default();
    let skip = text.chars().count().saturating_sub(WIDTH);
    format!("💬 {}", text.chars().skip(skip).collect::<String>())
}

fn print_entry(entry: &TranscriptEntry) {
    let bar = BAR_CHAR.bright_cyan();
    if let Some(error) = entry.response_error() {
        if !entry.response_content().is_empty() {
            println!("{bar}🤖 {}", entry.response_text().bright_white());
        }
        println!("{}⚠️  {}", BAR_CHAR.bright_red(), error.bright_red());
        println!("{}", "Type /retry to try again.".dimmed());
        return;
    }
    if entry.response_content().is_empty() {
        println!("{bar}🤖 {}", "(no response)".dimmed());
        return;
    }

    print!("{bar}🤖 ");
    let ResponseContent::Attributed(segments) = entry.response_content().attributed()
    else {
        println!("{}", entry.response_text().bright_white());
        return;
    };
    for segment in &segments {
        match &segment.style {
            SegmentStyle::Plain => print!("{}", segment.text.bright_white()),
            SegmentStyle::Code { language } => {
                let language = language.as_deref().unwrap_or("code");
                println!();
                println!("{}", format!("── {language} ──").dimmed());
                println!("{}", segment.text.bright_green());
            }
        }
    }
    println!();
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
