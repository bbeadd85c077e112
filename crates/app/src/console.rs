//! Line-oriented console frontend
//!
//! Reads commands from stdin and prints session updates as they arrive.

use std::fmt::Write as _;
use std::io::BufRead;

use estima_core::{IssueStatus, RoundPhase, SessionUpdate};
use tokio::sync::{broadcast, mpsc, watch};

use crate::network::CommandSender;
use crate::session::{SessionCommand, SessionView};

const HELP: &str = "\
commands:
  vote <card>          cast a card
  start <title>        open a round (moderator)
  reveal               reveal votes (moderator)
  next                 clear the round (moderator)
  add <title>          add an issue to the queue
  voting <issue id>    vote on an issue (moderator)
  again <issue id>     vote on an issue again (moderator)
  issues               list the issue queue
  cards                show the deck
  status               show the room
  leave                leave the room
  end                  end the room for everyone (moderator)";

/// A parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(SessionCommand),
    Status,
    Issues,
    Cards,
    Help,
}

/// Parse one line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let required = |what: &str| {
        if rest.is_empty() {
            Err(format!("usage: {word} <{what}>"))
        } else {
            Ok(rest.to_string())
        }
    };

    let input = match word.to_lowercase().as_str() {
        "vote" | "v" => Input::Command(SessionCommand::Vote(required("card")?)),
        "start" => Input::Command(SessionCommand::StartRound {
            title: required("title")?,
            description: None,
        }),
        "reveal" => Input::Command(SessionCommand::Reveal),
        "next" => Input::Command(SessionCommand::NextRound),
        "add" => Input::Command(SessionCommand::AddIssue {
            title: required("title")?,
            description: None,
        }),
        "voting" => Input::Command(SessionCommand::StartVoting(required("issue id")?)),
        "again" => Input::Command(SessionCommand::VoteAgain(required("issue id")?)),
        "leave" | "quit" | "exit" => Input::Command(SessionCommand::Leave),
        "end" => Input::Command(SessionCommand::End),
        "issues" => Input::Issues,
        "cards" => Input::Cards,
        "status" => Input::Status,
        "help" | "?" => Input::Help,
        other => return Err(format!("unknown command `{other}`, try `help`")),
    };
    Ok(Some(input))
}

/// One-line description of an update, if it is worth printing
pub fn render_update(update: &SessionUpdate) -> Option<String> {
    match update {
        SessionUpdate::Participants(list) => Some(format!("participants: {}", list.join(", "))),
        SessionUpdate::RoomDetails { moderator, .. } => moderator
            .as_ref()
            .map(|m| format!("moderator: {m}")),
        SessionUpdate::RoundStarted(task) => Some(match &task.description {
            Some(description) => format!("round started: {} ({description})", task.title),
            None => format!("round started: {}", task.title),
        }),
        SessionUpdate::ParticipantVoted(name) => Some(format!("{name} voted")),
        SessionUpdate::VoteCount(_) => None,
        SessionUpdate::VotesRevealed(results) => {
            let mut out = String::from("votes revealed:");
            for r in results {
                let _ = write!(out, "\n  {:<16} {}", r.participant, r.value);
            }
            Some(out)
        }
        SessionUpdate::RoundReset => Some("round cleared".into()),
        SessionUpdate::Error { message, .. } => Some(format!("error: {message}")),
        SessionUpdate::Connectivity(true) => Some("connected".into()),
        SessionUpdate::Connectivity(false) => Some("disconnected, reconnecting".into()),
    }
}

pub fn render_status(view: &SessionView) -> String {
    let mut out = String::new();
    let title = view
        .room_name
        .clone()
        .unwrap_or_else(|| estima_core::default_title(view.room_id));
    let _ = writeln!(out, "{title} [{}]", view.room_id);
    if let Some(moderator) = &view.moderator {
        let _ = writeln!(out, "moderator: {moderator}");
    }

    for p in &view.participants {
        let mark = if view.voted.contains(p) { "✓" } else { " " };
        let _ = writeln!(out, "  [{mark}] {p}");
    }

    match (&view.phase, &view.task) {
        (RoundPhase::Idle, _) | (_, None) => {
            let _ = write!(out, "no active round");
        }
        (RoundPhase::Voting, Some(task)) => {
            let (voted, total) = view.progress;
            let _ = write!(out, "voting on {}: {voted}/{total}", task.title);
            if let Some(mine) = view.my_vote {
                let _ = write!(out, ", your card {mine}");
            }
            if view.can_reveal {
                let _ = write!(out, ", ready to reveal");
            }
        }
        (RoundPhase::Revealed, Some(task)) => {
            let _ = write!(out, "revealed {}", task.title);
            if let Some(tally) = &view.tally {
                let _ = write!(
                    out,
                    ": average {}, consensus {}",
                    tally.average_label(),
                    tally.consensus.as_str()
                );
            }
        }
    }

    if !view.connected {
        let _ = write!(out, "\n(offline)");
    }
    out
}

pub fn render_issues(view: &SessionView) -> String {
    if view.issues.is_empty() {
        return "no issues".into();
    }

    let mut out = String::new();
    if let Some((position, total)) = view.issue_position {
        let _ = writeln!(out, "issue {position} of {total}");
    }
    for issue in &view.issues {
        let result = match (issue.status, issue.result) {
            (IssueStatus::Completed, Some(result)) => format!(" = {result}"),
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "  {:<6} {:<9} {}{result}",
            issue.id,
            issue.status.as_str(),
            issue.title
        );
    }
    out.trim_end().to_string()
}

fn render_cards(view: &SessionView) -> String {
    view.cards
        .iter()
        .map(|c| c.label.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stdin lines, read on a plain thread so a pending read never holds up
/// runtime shutdown
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Read stdin and print updates until stdin closes or the session does
pub async fn run(
    commands: CommandSender,
    view: watch::Receiver<SessionView>,
    mut updates: broadcast::Receiver<SessionUpdate>,
) {
    let mut lines = stdin_lines();
    println!("{}\ntype `help` for commands", render_status(&view.borrow()));

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    let _ = commands.send(SessionCommand::Leave).await;
                    break;
                };

                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(Input::Command(command))) => {
                        if let Err(e) = commands.send(command).await {
                            println!("error: {e}");
                        }
                    }
                    Ok(Some(Input::Status)) => println!("{}", render_status(&view.borrow())),
                    Ok(Some(Input::Issues)) => println!("{}", render_issues(&view.borrow())),
                    Ok(Some(Input::Cards)) => println!("{}", render_cards(&view.borrow())),
                    Ok(Some(Input::Help)) => println!("{HELP}"),
                    Err(e) => println!("{e}"),
                }
            }

            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        if let Some(text) = render_update(&update) {
                            println!("{text}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Console fell behind on updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
