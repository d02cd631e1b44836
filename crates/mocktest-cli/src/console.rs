//! Terminal rendering and the interactive exam loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use comfy_table::{Cell, Table};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

use mocktest_core::controller::{SessionController, SessionObserver, StartOutcome, SyncOp};
use mocktest_core::error::SessionError;
use mocktest_core::label::{resolve_answer, AnswerRef};
use mocktest_core::model::ExamResult;
use mocktest_core::session::Session;
use mocktest_core::statistics;

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Prints session events and wakes the input loop once the exam is graded.
#[derive(Default)]
pub struct ConsoleObserver {
    expired: AtomicBool,
    finished: Mutex<Option<ExamResult>>,
    wake: Notify,
}

impl ConsoleObserver {
    fn take_result(&self) -> Option<ExamResult> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_attempt_started(&self, outcome: &StartOutcome) {
        match outcome {
            StartOutcome::Online { attempt_id } => eprintln!("Attempt {attempt_id} opened."),
            StartOutcome::Offline { reason } => {
                eprintln!("Working offline ({reason}). Answers are kept on this machine.")
            }
        }
    }

    fn on_sync_error(&self, op: &SyncOp, error: &anyhow::Error) {
        eprintln!("  warning: could not {op}: {error:#}");
    }

    fn on_tick(&self, remaining_secs: u32) {
        if matches!(remaining_secs, 300 | 60 | 10) {
            eprintln!("  {} left", format_clock(remaining_secs));
        }
    }

    fn on_time_expired(&self) {
        self.expired.store(true, Ordering::SeqCst);
        eprintln!("\nTime is up. Submitting your answers...");
    }

    fn on_submitted(&self, result: &ExamResult) {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        self.wake.notify_one();
    }

    fn on_submit_failed(&self, error: &SessionError) {
        if !self.expired.load(Ordering::SeqCst) {
            return;
        }
        match error {
            SessionError::NoActiveAttempt => eprintln!(
                "Time is up, but this session was never registered with the exam service. \
                 Your answers are saved locally; type `quit` to leave."
            ),
            _ => eprintln!("Automatic submission failed: {error}. Type `submit` to retry."),
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Input {
    Answer(AnswerRef),
    Next,
    Previous,
    /// 1-based question number.
    Goto(usize),
    Flag,
    Pause,
    Resume,
    Status,
    Submit,
    Quit,
    Help,
    Show,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command.to_ascii_lowercase().as_str() {
        "" => Ok(Input::Show),
        "a" | "answer" if arg.is_empty() => {
            Err("usage: a <letter | option number | option text>".into())
        }
        "a" | "answer" => Ok(Input::Answer(parse_answer(arg))),
        "n" | "next" => Ok(Input::Next),
        "p" | "prev" | "previous" => Ok(Input::Previous),
        "g" | "goto" => arg
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .map(Input::Goto)
            .ok_or_else(|| "usage: g <question number>".to_string()),
        "f" | "flag" => Ok(Input::Flag),
        "pause" => Ok(Input::Pause),
        "resume" => Ok(Input::Resume),
        "s" | "status" => Ok(Input::Status),
        "submit" => Ok(Input::Submit),
        "q" | "quit" | "exit" => Ok(Input::Quit),
        "h" | "help" | "?" => Ok(Input::Help),
        other => Err(format!("unknown command `{other}`, type `help`")),
    }
}

/// Option numbers typed at the prompt are 1-based.
fn parse_answer(arg: &str) -> AnswerRef {
    let mut chars = arg.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => AnswerRef::Label(c),
        _ => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => AnswerRef::Index(n - 1),
            _ => AnswerRef::Text(arg.to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

/// Drive the session from stdin until it is graded or the user leaves.
///
/// Leaving keeps the durable record so `mocktest resume` can pick it up.
pub async fn run(ctl: &SessionController, events: &ConsoleObserver) -> Result<()> {
    print_help();
    show_current(ctl);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = events.wake.notified() => {
                if let Some(result) = events.take_result() {
                    print_result(&result);
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!("Input closed. Session saved, run `mocktest resume` to continue.");
                    break;
                };
                match parse_input(&line) {
                    Ok(Input::Quit) => {
                        println!("Session saved, run `mocktest resume` to continue.");
                        break;
                    }
                    Ok(Input::Submit) => match ctl.submit().await {
                        Ok(result) => {
                            events.take_result();
                            print_result(&result);
                            break;
                        }
                        Err(e) => println!("Could not submit: {e}"),
                    },
                    Ok(input) => {
                        if let Err(e) = apply(ctl, input) {
                            println!("{e}");
                        }
                    }
                    Err(message) => println!("{message}"),
                }
            }
        }
    }

    ctl.settle().await;
    ctl.shutdown().await?;
    Ok(())
}

fn apply(ctl: &SessionController, input: Input) -> Result<(), SessionError> {
    match input {
        Input::Answer(selected) => {
            let question_id = current_question_id(ctl)?;
            ctl.answer(&question_id, selected)?;
            ctl.next()?;
            show_current(ctl);
        }
        Input::Next => {
            if !ctl.next()? {
                println!("This is the last question.");
            }
            show_current(ctl);
        }
        Input::Previous => {
            if !ctl.previous()? {
                println!("This is the first question.");
            }
            show_current(ctl);
        }
        Input::Goto(number) => {
            if ctl.navigate_to(number - 1)? {
                show_current(ctl);
            } else {
                println!("There is no question {number}.");
            }
        }
        Input::Flag => {
            let question_id = current_question_id(ctl)?;
            if ctl.toggle_flag(&question_id)? {
                println!("Flagged for review.");
            } else {
                println!("Flag removed.");
            }
        }
        Input::Pause => {
            ctl.pause()?;
            println!("Paused. Type `resume` to restart the clock.");
        }
        Input::Resume => {
            ctl.resume()?;
            show_current(ctl);
        }
        Input::Status => {
            if let Some(session) = ctl.session() {
                print_status(&session);
            }
        }
        Input::Help => print_help(),
        Input::Show => show_current(ctl),
        Input::Submit | Input::Quit => {}
    }
    Ok(())
}

fn current_question_id(ctl: &SessionController) -> Result<String, SessionError> {
    ctl.session()
        .and_then(|s| s.current_question().map(|q| q.id.clone()))
        .ok_or(SessionError::NoSession)
}

fn show_current(ctl: &SessionController) {
    if let Some(session) = ctl.session() {
        print_question(&session);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  a <answer>   answer the current question (letter, option number or text)");
    println!("  n / p        next / previous question");
    println!("  g <number>   go to a question");
    println!("  f            flag or unflag the current question");
    println!("  pause        stop the clock (resume to continue)");
    println!("  status       question palette");
    println!("  submit       submit the exam");
    println!("  quit         leave and keep the session for later");
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn print_question(session: &Session) {
    let Some(question) = session.current_question() else {
        return;
    };

    let mut header = format!(
        "Question {}/{}  [{} left]",
        session.current_index + 1,
        session.questions.len(),
        format_clock(session.remaining_secs)
    );
    if session.is_flagged(&question.id) {
        header.push_str("  (flagged)");
    }
    if session.is_paused {
        header.push_str("  (paused)");
    }

    println!();
    println!("{header}");
    println!("{}", question.text);
    let selected = session
        .answer_for(&question.id)
        .and_then(|a| resolve_answer(question, &a.selected));
    for option in &question.options {
        let marker = if Some(option.label) == selected { ">" } else { " " };
        println!("{marker} {}) {}", option.label, option.text);
    }
}

/// Session summary with the question palette. Correctness is only shown once
/// the session has been submitted.
pub fn print_status(session: &Session) {
    let progress = session.progress();
    let title: &str = if session.exam_title.is_empty() {
        session.exam_id()
    } else {
        &session.exam_title
    };

    println!("{title} ({})", session.attempt.status);
    println!("Attempt:   {}", session.attempt_id().unwrap_or("offline"));
    println!(
        "Started:   {}",
        session
            .attempt
            .started_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
    );
    let paused = if session.is_paused { " (paused)" } else { "" };
    println!("Time left: {}{paused}", format_clock(session.remaining_secs));
    println!(
        "Answered {}/{}, flagged {}, not visited {}",
        progress.answered, progress.total, progress.flagged, progress.not_visited
    );

    let graded = session.is_completed().then(|| {
        statistics::aggregate_live(
            &session.questions,
            &session.attempt.answers,
            session.passing_percent,
        )
    });
    let submitted = session.result.as_ref();

    let mut table = Table::new();
    let mut header = vec!["#", "Question", "Answer", "Flagged", "Visited"];
    if graded.is_some() {
        header.push("Result");
    }
    table.set_header(header);

    for (index, question) in session.questions.iter().enumerate() {
        let answer = session
            .answer_for(&question.id)
            .map(|a| match resolve_answer(question, &a.selected) {
                Some(label) => label.to_string(),
                None => a.selected.to_string(),
            })
            .unwrap_or_default();
        let mut row = vec![
            Cell::new(question.number),
            Cell::new(truncate(&question.text, 48)),
            Cell::new(answer),
            Cell::new(if session.is_flagged(&question.id) { "yes" } else { "" }),
            Cell::new(if session.visited.contains(&index) { "yes" } else { "" }),
        ];
        if let Some(stats) = &graded {
            let status = submitted
                .and_then(|r| r.question_results.iter().find(|q| q.question_id == question.id))
                .map(|q| q.status)
                .or_else(|| stats.status_of(&question.id))
                .map(|s| s.to_string())
                .unwrap_or_default();
            row.push(Cell::new(status));
        }
        table.add_row(row);
    }
    println!("{table}");

    match (submitted, graded) {
        (Some(result), _) => println!(
            "Score: {}  ({:.1}%, {})",
            score_text(result.score, result.total_marks),
            result.percentage,
            if result.is_passing { "pass" } else { "fail" }
        ),
        (None, Some(stats)) => println!(
            "Score: {}  ({:.1}%, {}, graded locally)",
            score_text(stats.score.score, stats.score.total_marks),
            stats.score.percentage,
            if stats.score.is_passing { "pass" } else { "fail" }
        ),
        (None, None) => {}
    }
}

pub fn print_result(result: &ExamResult) {
    let title = if result.exam_title.is_empty() {
        &result.exam_id
    } else {
        &result.exam_title
    };
    println!();
    println!("{title}: exam submitted");

    let mut table = Table::new();
    table.set_header(vec![
        "Correct",
        "Incorrect",
        "Unanswered",
        "Score",
        "Percentage",
        "Result",
    ]);
    table.add_row(vec![
        Cell::new(result.correct_answers),
        Cell::new(result.incorrect_answers),
        Cell::new(result.unanswered),
        Cell::new(score_text(result.score, result.total_marks)),
        Cell::new(format!("{:.1}%", result.percentage)),
        Cell::new(if result.is_passing { "PASS" } else { "FAIL" }),
    ]);
    println!("{table}");
    println!(
        "Pass mark: {:.2} of {} ({}%)",
        result.passing_marks, result.total_marks, result.passing_percent
    );
    println!("Time spent: {}", format_clock(result.time_spent_secs));
}

/// Score as shown to the user: floored at zero, with a negative raw score
/// printed alongside.
pub fn score_text(raw: f64, total_marks: f64) -> String {
    let shown = raw.max(0.0);
    if raw < 0.0 {
        format!("{shown:.2}/{total_marks} (raw {raw:.2})")
    } else {
        format!("{shown:.2}/{total_marks}")
    }
}

pub fn format_clock(secs: u32) -> String {
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    short.push_str("...");
    short
}
