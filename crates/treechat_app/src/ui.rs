//! Chat UI: the scrollback the user reads and the line they type.
//!
//! [`ChatUi`] is the seam between the session loop and the terminal, so the
//! loop can be driven by a scripted UI in tests.

use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Width of one scrollback entry in columns.
pub const WIDTH: usize = 78;

/// Author names longer than this are shortened.
pub const USERNAME_DISPLAY_MAX: usize = 8;

/// First line shown when a session starts.
pub const BANNER: &str = "Type your message and hit <ENTER> to post.";

#[async_trait]
pub trait ChatUi: Send {
    /// Append a message to the scrollback. `None` means a system line.
    fn display(&mut self, author: Option<&str>, text: &str);

    /// Wait for the next input line. `None` means input is closed.
    async fn read_line(&mut self) -> Option<String>;
}

/// Lay out one message as scrollback entries of at most [`WIDTH`] columns.
///
/// The first entry starts with `author: ` (long names become five characters
/// and `...`), or two spaces with no author. Text that does not fit continues
/// on further entries indented by two spaces.
pub fn format_entry(author: Option<&str>, text: &str) -> Vec<String> {
    let prefix = match author {
        None => "  ".to_string(),
        Some(name) if name.chars().count() > USERNAME_DISPLAY_MAX => {
            let short: String = name.chars().take(USERNAME_DISPLAY_MAX - 3).collect();
            format!("{short}...: ")
        }
        Some(name) => format!("{name}: "),
    };

    let mut entries = Vec::new();
    let mut prefix = prefix;
    let mut rest: Vec<char> = text.chars().collect();
    loop {
        let room = WIDTH.saturating_sub(prefix.chars().count()).max(1);
        let take = room.min(rest.len());
        let chunk: String = rest.drain(..take).collect();
        entries.push(format!("{prefix}{chunk}"));
        if rest.is_empty() {
            break;
        }
        prefix = "  ".to_string();
    }
    entries
}

/// Scrollback on stdout, input from stdin.
pub struct TerminalUi {
    input: Lines<BufReader<Stdin>>,
}

impl TerminalUi {
    pub fn new() -> Self {
        Self {
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for TerminalUi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatUi for TerminalUi {
    fn display(&mut self, author: Option<&str>, text: &str) {
        let mut out = std::io::stdout().lock();
        for entry in format_entry(author, text) {
            let _ = writeln!(out, "{entry}");
        }
        let _ = out.flush();
    }

    async fn read_line(&mut self) -> Option<String> {
        match self.input.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read input: {e}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
