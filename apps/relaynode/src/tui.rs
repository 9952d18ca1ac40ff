//! The operator CLI and 2 Hz stats panel (spec.md §4.7, §6, §9). This module
//! is **(supplemented)**: a `tracing_subscriber::Layer` captures rendered
//! log lines into a queue instead of printing straight to stdout, per
//! spec.md §9: "pure side-effect; treat as non-critical".

use std::fmt::Write as _;
use std::sync::Arc;

use event_bus::EventBus;
use futures::FutureExt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{DefaultVisitor, Writer};
use tracing_subscriber::layer::{Context, Layer};

use crate::events::LogLineEvent;
use crate::node::Node;

/// A [`tracing_subscriber::Layer`] that renders each event as a single line
/// (timestamp, level, last path segment of the target) and publishes it
/// onto the event bus instead of printing it, so the stats task can draw it
/// above a status panel rather than have it interleave with ANSI redraws.
pub struct LogQueueLayer {
    event_bus: EventBus,
}

impl LogQueueLayer {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl<S> Layer<S> for LogQueueLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = match *event.metadata().level() {
            Level::INFO | Level::WARN | Level::ERROR => {
                event.metadata().target().split("::").last().unwrap_or_default()
            }
            _ => event.metadata().target(),
        };

        let mut line = format!(
            "[{}] {} {}: ",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            event.metadata().level(),
            target,
        );

        let mut message = String::new();
        event.record(&mut DefaultVisitor::new(Writer::new(&mut message), true));
        let _ = write!(line, "{message}");

        // `on_event` runs synchronously on the emitting thread and must
        // never block on the tokio runtime; the channel behind `EventBus`
        // is unbounded, so the send future is always immediately ready and
        // `now_or_never` drives it to completion without a runtime.
        self.event_bus
            .send(LogLineEvent(line))
            .now_or_never();
    }
}

/// Parsed form of the operator command line protocol (spec.md §6).
#[derive(Debug, Clone)]
pub enum Command {
    Quit,
    AddTrusted(std::net::SocketAddr),
    RemoveTrusted(std::net::SocketAddr),
    AddOutbound(std::net::SocketAddr),
    RemoveOutbound(std::net::SocketAddr),
    AddRelay(std::net::IpAddr),
    RemoveRelay(std::net::IpAddr),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unrecognized command selector {0:?}")]
    UnknownSelector(char),
    #[error("missing address after selector")]
    MissingAddress,
    #[error("invalid address {0:?}: {1}")]
    InvalidAddress(String, String),
}

/// Parses a single operator command line (spec.md §6's table). Whitespace
/// between the selector and the address is optional for the `-` (removal)
/// forms since they're written as a single token (`t-host:port`) in the
/// spec's own examples.
pub fn parse_command(line: &str) -> Result<Command, CommandParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CommandParseError::Empty);
    }

    if line == "q" {
        return Command::Quit.into_ok();
    }

    let mut chars = line.chars();
    let selector = chars.next().ok_or(CommandParseError::Empty)?;
    let rest = chars.as_str();

    let (removal, arg) = if let Some(stripped) = rest.strip_prefix('-') {
        (true, stripped.trim())
    } else {
        (false, rest.trim())
    };

    if arg.is_empty() {
        return Err(CommandParseError::MissingAddress);
    }

    match selector {
        't' => {
            let addr = parse_socket_addr(arg)?;
            Ok(if removal {
                Command::RemoveTrusted(addr)
            } else {
                Command::AddTrusted(addr)
            })
        }
        'o' => {
            let addr = parse_socket_addr(arg)?;
            Ok(if removal {
                Command::RemoveOutbound(addr)
            } else {
                Command::AddOutbound(addr)
            })
        }
        'r' => {
            let ip = arg
                .parse::<std::net::IpAddr>()
                .map_err(|e| CommandParseError::InvalidAddress(arg.to_string(), e.to_string()))?;
            Ok(if removal {
                Command::RemoveRelay(ip)
            } else {
                Command::AddRelay(ip)
            })
        }
        other => Err(CommandParseError::UnknownSelector(other)),
    }
}

trait IntoOk {
    fn into_ok(self) -> Result<Command, CommandParseError>;
}

impl IntoOk for Command {
    fn into_ok(self) -> Result<Command, CommandParseError> {
        Ok(self)
    }
}

fn parse_socket_addr(arg: &str) -> Result<std::net::SocketAddr, CommandParseError> {
    use std::net::ToSocketAddrs;
    arg.to_socket_addrs()
        .map_err(|e| CommandParseError::InvalidAddress(arg.to_string(), e.to_string()))?
        .next()
        .ok_or_else(|| CommandParseError::InvalidAddress(arg.to_string(), "no address resolved".to_string()))
}

/// Reads operator commands from stdin on a dedicated blocking thread
/// (spec.md §5: "one thread reads operator input; operator input blocks on
/// stdin") and applies each to `node`. `q` exits the process directly,
/// matching spec.md §5's "operator quit calls process-exit without graceful
/// teardown (by design: state is in-memory only)".
pub async fn run_operator_input(node: Arc<Node>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    tokio::task::spawn_blocking(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    while let Some(line) = rx.recv().await {
        match parse_command(&line) {
            Ok(Command::Quit) => std::process::exit(0),
            Ok(command) => node.apply_operator_command(command).await,
            Err(err) => node.log_operator_error(&err.to_string()),
        }
    }
}

/// Drains the pending log-line queue above a redrawn status panel, using
/// raw ANSI cursor control (spec.md §4.7, §9: "pure side-effect... the 2 Hz
/// redraw and ANSI cursor math are a presentation concern only").
pub async fn run_stats_loop(node: Arc<Node>, mut log_lines: event_bus::Receiver<LogLineEvent>) {
    const REFRESH: std::time::Duration = std::time::Duration::from_millis(500);
    let mut ticker = tokio::time::interval(REFRESH);
    let mut panel_height = 0usize;

    loop {
        ticker.tick().await;

        let mut drained = Vec::new();
        while !log_lines.is_empty() {
            match log_lines.recv().await {
                Ok(LogLineEvent(line)) => drained.push(line),
                Err(_) => break,
            }
        }

        let panel = node.render_status_panel().await;

        // Move the cursor back up over the previous panel before printing
        // new log lines plus the redrawn panel underneath them.
        if panel_height > 0 {
            print!("\x1b[{panel_height}A\x1b[J");
        }
        for line in &drained {
            println!("{line}");
        }
        print!("{panel}");
        use std::io::Write as _;
        let _ = std::io::stdout().flush();

        panel_height = panel.lines().count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // spec.md §6's command table, one case per row.
    #[test]
    fn parses_quit() {
        assert!(matches!(parse_command("q"), Ok(Command::Quit)));
    }

    #[test]
    fn parses_add_and_remove_trusted() {
        match parse_command("t 10.0.0.1:8333") {
            Ok(Command::AddTrusted(addr)) => assert_eq!(addr.port(), 8333),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_command("t-10.0.0.1:8333") {
            Ok(Command::RemoveTrusted(addr)) => assert_eq!(addr.port(), 8333),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_add_and_remove_outbound() {
        match parse_command("o 10.0.0.2:8333") {
            Ok(Command::AddOutbound(addr)) => assert_eq!(addr.port(), 8333),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_command("o-10.0.0.2:8333") {
            Ok(Command::RemoveOutbound(addr)) => assert_eq!(addr.port(), 8333),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_add_and_remove_relay_without_port() {
        match parse_command("r 10.0.0.3") {
            Ok(Command::AddRelay(ip)) => assert_eq!(ip.to_string(), "10.0.0.3"),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_command("r-10.0.0.3") {
            Ok(Command::RemoveRelay(ip)) => assert_eq!(ip.to_string(), "10.0.0.3"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_line_is_an_error() {
        assert!(matches!(parse_command(""), Err(CommandParseError::Empty)));
        assert!(matches!(parse_command("   "), Err(CommandParseError::Empty)));
    }

    #[test]
    fn unknown_selector_is_an_error() {
        assert!(matches!(
            parse_command("x 10.0.0.1:8333"),
            Err(CommandParseError::UnknownSelector('x'))
        ));
    }

    #[test]
    fn missing_address_is_an_error() {
        assert!(matches!(parse_command("t"), Err(CommandParseError::MissingAddress)));
        assert!(matches!(parse_command("t-"), Err(CommandParseError::MissingAddress)));
    }

    #[test]
    fn invalid_address_is_an_error() {
        assert!(matches!(
            parse_command("t not-an-address"),
            Err(CommandParseError::InvalidAddress(_, _))
        ));
    }
}
