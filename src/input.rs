//! Keyboard commands read line by line from stdin

use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UserCommand {
    /// Bare Enter: press or release the capture control, or continue
    Toggle,
    Quit,
    Retry,
    /// 1-based menu position
    Select(usize),
}

pub(crate) fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim().to_lowercase().as_str() {
        "" => Some(UserCommand::Toggle),
        "q" | "quit" | "exit" => Some(UserCommand::Quit),
        "r" | "retry" => Some(UserCommand::Retry),
        other => other
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(UserCommand::Select),
    }
}

/// Read commands on a dedicated thread
///
/// A blocking stdin read cannot be cancelled, so it runs on a detached OS
/// thread instead of the runtime's blocking pool. The receiver yields `None`
/// once stdin is closed.
pub(crate) fn spawn_stdin_reader() -> std::io::Result<mpsc::UnboundedReceiver<UserCommand>> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => match parse_command(&line) {
                        Some(command) => {
                            if tx.send(command).is_err() {
                                break;
                            }
                        }
                        None => debug!(input = %line.trim(), "Ignoring unrecognized input"),
                    },
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
            info!("Input closed");
        })?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(""), Some(UserCommand::Toggle));
        assert_eq!(parse_command("  \r"), Some(UserCommand::Toggle));
        assert_eq!(parse_command("Q"), Some(UserCommand::Quit));
        assert_eq!(parse_command("r"), Some(UserCommand::Retry));
        assert_eq!(parse_command(" 2 "), Some(UserCommand::Select(2)));
        assert_eq!(parse_command("0"), None);
        assert_eq!(parse_command("kakigori"), None);
    }
}
