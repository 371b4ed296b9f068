//! Line-oriented console driving local sessions.
//!
//! Every session of the console shares one in-process domain, so several
//! users can talk to each other from a single terminal. Commands apply to
//! the active session; `join` and `use` change which one that is.

use crate::config::Config;
use chrono::{Local, TimeZone};
use huddle_bus::Domain;
use huddle_core::{
    HistoryEntry, HistoryError, Journal, SessionController, SessionError, SessionHandler,
};
use huddle_protocol::{MessageRecord, UserRecord};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Entries listed by `search` without a term.
const LIST_LIMIT: usize = 50;

/// Entries returned by a keyword search.
const SEARCH_LIMIT: usize = 200;

const HELP: &[&str] = &[
    "> Commands:",
    ">   join <user> <group> [first] [last]   join (or rejoin) as <user>",
    ">   use <user>                           switch the active session",
    ">   group <new_group>                    move to another group",
    ">   send <user|group> <text...>          send a direct or group message",
    ">   users                                list online users",
    ">   search [term]                        search history (all if no term)",
    ">   history                              show the whole history",
    ">   announce                             publish presence again",
    ">   leave                                leave and close the active session",
    ">   sessions                             list local sessions",
    ">   help                                 show this help",
    ">   quit                                 leave every session and exit",
];

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join {
        username: String,
        group: String,
        first_name: Option<String>,
        last_name: Option<String>,
    },
    Use(String),
    Group(String),
    Send { destination: String, text: String },
    Users,
    Search(String),
    History,
    Announce,
    Leave,
    Sessions,
    Help,
    Quit,
}

/// Command line parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown command `{0}`, try `help`")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown commands or missing arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = split_word(line);

        let command = match word.to_ascii_lowercase().as_str() {
            "join" => {
                let mut args = rest.split_whitespace();
                let usage = ParseError::Usage("join <user> <group> [first] [last]");
                let username = args.next().ok_or_else(|| usage.clone())?;
                let group = args.next().ok_or(usage)?;
                Self::Join {
                    username: username.to_string(),
                    group: group.to_string(),
                    first_name: args.next().map(str::to_string),
                    last_name: args.next().map(str::to_string),
                }
            }
            "use" => Self::Use(single_arg(rest, "use <user>")?),
            "group" => Self::Group(single_arg(rest, "group <new_group>")?),
            "send" => {
                let (destination, text) = split_word(rest);
                if destination.is_empty() || text.is_empty() {
                    return Err(ParseError::Usage("send <user|group> <text...>"));
                }
                Self::Send {
                    destination: destination.to_string(),
                    text: text.to_string(),
                }
            }
            "users" => Self::Users,
            "search" => Self::Search(rest.to_string()),
            "history" => Self::History,
            "announce" => Self::Announce,
            "leave" => Self::Leave,
            "sessions" => Self::Sessions,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => return Err(ParseError::Unknown(word.to_string())),
        };
        Ok(Some(command))
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)?.ok_or(ParseError::Usage("help"))
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

fn single_arg(rest: &str, usage: &'static str) -> Result<String, ParseError> {
    let mut args = rest.split_whitespace();
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(arg.to_string()),
        _ => Err(ParseError::Usage(usage)),
    }
}

/// Console errors reported to the user.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("No active session, `join` first")]
    NoSession,

    #[error("No session named {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to open history journal: {0}")]
    Journal(#[from] HistoryError),
}

/// Whether the console keeps reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn hms_now() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn hms_at(timestamp_ms: u64) -> Option<String> {
    let millis = i64::try_from(timestamp_ms).ok().filter(|ms| *ms > 0)?;
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
}

/// `> alice (Alice Smith) joined on group teamA.`
#[must_use]
pub fn joined_line(user: &UserRecord) -> String {
    let full_name = user
        .full_name()
        .map(|name| format!(" ({name})"))
        .unwrap_or_default();
    format!("> {}{full_name} joined on group {}.", user.username, user.group)
}

/// `> alice dropped.`
#[must_use]
pub fn dropped_line(user: &UserRecord) -> String {
    format!("> {} dropped.", user.username)
}

/// `bob (to you): hi` as seen by `owner`.
#[must_use]
pub fn message_line(message: &MessageRecord, owner: &str) -> String {
    let destination = match message.destination() {
        Some(d) if d == owner => "you",
        Some(d) => d,
        None => "",
    };
    format!("{} (to {destination}): {}", message.from_user, message.message)
}

/// Search result lines, headed by a count.
#[must_use]
pub fn history_lines(entries: &[HistoryEntry]) -> Vec<String> {
    if entries.is_empty() {
        return vec!["> No matches.".to_string()];
    }
    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(format!("> Found {} message(s):", entries.len()));
    lines.extend(entries.iter().map(|e| {
        format!("{} (to {}): {}", e.record.from_user, e.destination, e.record.message)
    }));
    lines
}

/// Prints session events of one local user.
pub struct ConsoleHandler {
    owner: String,
    out: mpsc::UnboundedSender<String>,
}

impl ConsoleHandler {
    #[must_use]
    pub fn new(owner: impl Into<String>, out: mpsc::UnboundedSender<String>) -> Self {
        Self {
            owner: owner.into(),
            out,
        }
    }

    fn emit(&self, line: String) {
        if self.out.send(format!("[{}] {line}", self.owner)).is_err() {
            trace!(owner = %self.owner, "Console output closed, dropping event line");
        }
    }
}

impl SessionHandler for ConsoleHandler {
    fn on_users_joined_or_updated(&self, users: &[UserRecord]) {
        for user in users {
            self.emit(format!("[{}] {}", hms_now(), joined_line(user)));
        }
    }

    fn on_users_dropped(&self, users: &[UserRecord]) {
        for user in users.iter().filter(|u| u.username != self.owner) {
            self.emit(format!("[{}] {}", hms_now(), dropped_line(user)));
        }
    }

    fn on_messages_received(&self, messages: &[MessageRecord]) {
        for message in messages {
            let line = message_line(message, &self.owner);
            match hms_at(message.timestamp_ms) {
                Some(ts) => self.emit(format!("[{ts}] {line}")),
                None => self.emit(line),
            }
        }
    }

    fn on_history_results(&self, entries: &[HistoryEntry]) {
        for line in history_lines(entries) {
            self.emit(line);
        }
    }
}

/// Local sessions and the command dispatcher.
pub struct Console {
    domain: Arc<Domain>,
    settings: Config,
    sessions: BTreeMap<String, SessionController>,
    active: Option<String>,
    out: mpsc::UnboundedSender<String>,
}

impl Console {
    /// Create a console and the receiver of everything it prints.
    #[must_use]
    pub fn new(domain: Arc<Domain>, settings: Config) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (out, rx) = mpsc::unbounded_channel();
        let console = Self {
            domain,
            settings,
            sessions: BTreeMap::new(),
            active: None,
            out,
        };
        (console, rx)
    }

    /// Parse and run one input line, printing any error.
    pub async fn handle_line(&mut self, line: &str) -> Flow {
        let command = match Command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Flow::Continue,
            Err(e) => {
                self.print(format!("> {e}"));
                return Flow::Continue;
            }
        };
        match self.execute(command).await {
            Ok(flow) => flow,
            Err(e) => {
                self.print(format!("> Error: {e}"));
                Flow::Continue
            }
        }
    }

    /// Run one command.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active session or the session
    /// rejects the command.
    pub async fn execute(&mut self, command: Command) -> Result<Flow, ConsoleError> {
        debug!(?command, "Executing");
        match command {
            Command::Join {
                username,
                group,
                first_name,
                last_name,
            } => {
                self.join(&username, &group, first_name.as_deref(), last_name.as_deref())
                    .await?;
            }
            Command::Use(name) => {
                if !self.sessions.contains_key(&name) {
                    return Err(ConsoleError::UnknownSession(name));
                }
                self.print(format!("> Using session {name}."));
                self.active = Some(name);
            }
            Command::Group(group) => {
                self.session()?.update_group(&group).await?;
            }
            Command::Send { destination, text } => {
                let sent = self.session()?.send(&destination, &text).await?;
                // Group messages come back through the session's own reader
                if !sent.to_user.is_empty() {
                    self.print(format!("[{}] {}", hms_now(), message_line(&sent, "")));
                }
            }
            Command::Users => {
                let users = self.session()?.list_users().await?;
                self.print(format!("> {} user(s) online:", users.len()));
                for user in &users {
                    let full_name = user
                        .full_name()
                        .map(|name| format!(" ({name})"))
                        .unwrap_or_default();
                    self.print(format!(">   {}{full_name} on group {}", user.username, user.group));
                }
            }
            Command::Search(term) => {
                let session = self.session()?;
                if term.is_empty() {
                    session.load_history(Some(LIST_LIMIT)).await;
                } else {
                    session.search(&term, Some(SEARCH_LIMIT)).await;
                }
            }
            Command::History => {
                self.session()?.load_history(None).await;
            }
            Command::Announce => {
                self.session()?.announce().await?;
            }
            Command::Leave => {
                let name = self.active.take().ok_or(ConsoleError::NoSession)?;
                if let Some(session) = self.sessions.remove(&name) {
                    session.leave().await;
                }
                self.active = self.sessions.keys().next().cloned();
                self.print(format!("> {name} left."));
            }
            Command::Sessions => self.list_sessions().await,
            Command::Help => {
                for line in HELP {
                    self.print((*line).to_string());
                }
            }
            Command::Quit => {
                self.shutdown().await;
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Leave every session.
    pub async fn shutdown(&mut self) {
        for (name, session) in std::mem::take(&mut self.sessions) {
            debug!(session = %name, "Leaving");
            session.leave().await;
        }
        self.active = None;
        info!("All sessions closed");
    }

    async fn join(
        &mut self,
        username: &str,
        group: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<(), ConsoleError> {
        let created = !self.sessions.contains_key(username);
        if created {
            let session = self.open_session(username).await?;
            self.sessions.insert(username.to_string(), session);
        }

        let Some(session) = self.sessions.get(username) else {
            return Err(ConsoleError::UnknownSession(username.to_string()));
        };
        let joined = session.join(username, group, first_name, last_name).await;
        if let Err(e) = joined {
            if created {
                self.sessions.remove(username);
            }
            return Err(e.into());
        }
        self.active = Some(username.to_string());
        Ok(())
    }

    async fn open_session(&self, username: &str) -> Result<SessionController, ConsoleError> {
        let handler = ConsoleHandler::new(username, self.out.clone());
        let session = SessionController::new(
            Arc::clone(&self.domain),
            self.settings.session_config(),
            Arc::new(handler),
        );
        match self.settings.journal_file(username) {
            Some(path) => {
                let journal = Journal::open(&path).await?;
                info!(user = %username, path = %path.display(), "History journal opened");
                Ok(session.with_history_source(Arc::new(journal)))
            }
            None => Ok(session),
        }
    }

    async fn list_sessions(&self) {
        if self.sessions.is_empty() {
            self.print("> No sessions.".to_string());
            return;
        }
        for (name, session) in &self.sessions {
            let marker = if self.active.as_deref() == Some(name.as_str()) {
                "*"
            } else {
                " "
            };
            let status = match session.current_user().await {
                Some(user) => format!("on group {}", user.group),
                None => "not joined".to_string(),
            };
            self.print(format!("> {marker} {name} {status}"));
        }
    }

    fn session(&self) -> Result<&SessionController, ConsoleError> {
        self.active
            .as_ref()
            .and_then(|name| self.sessions.get(name))
            .ok_or(ConsoleError::NoSession)
    }

    fn print(&self, line: String) {
        if self.out.send(line).is_err() {
            trace!("Console output closed, dropping line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn join(username: &str, group: &str) -> Command {
        Command::Join {
            username: username.to_string(),
            group: group.to_string(),
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(Command::parse("join alice teamA").unwrap(), Some(join("alice", "teamA")));
        assert_eq!(
            Command::parse("JOIN alice teamA Alice Smith").unwrap(),
            Some(Command::Join {
                username: "alice".to_string(),
                group: "teamA".to_string(),
                first_name: Some("Alice".to_string()),
                last_name: Some("Smith".to_string()),
            })
        );
        assert_eq!(
            Command::parse("send bob  lunch at  noon ").unwrap(),
            Some(Command::Send {
                destination: "bob".to_string(),
                text: "lunch at  noon".to_string(),
            })
        );
        assert_eq!(Command::parse("search").unwrap(), Some(Command::Search(String::new())));
        assert_eq!(
            Command::parse("search lunch break").unwrap(),
            Some(Command::Search("lunch break".to_string()))
        );
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Command::parse("dance").unwrap_err(),
            ParseError::Unknown("dance".to_string())
        );
        assert!(matches!(Command::parse("join alice"), Err(ParseError::Usage(_))));
        assert!(matches!(Command::parse("send bob"), Err(ParseError::Usage(_))));
        assert!(matches!(Command::parse("group a b"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_event_lines() {
        let alice = UserRecord::new("alice", "teamA")
            .with_first_name("Alice")
            .with_last_name("Smith");
        assert_eq!(joined_line(&alice), "> alice (Alice Smith) joined on group teamA.");
        assert_eq!(
            joined_line(&UserRecord::new("bob", "teamB")),
            "> bob joined on group teamB."
        );
        assert_eq!(dropped_line(&alice), "> alice dropped.");

        let direct = MessageRecord::direct("bob", "alice", "hi");
        assert_eq!(message_line(&direct, "alice"), "bob (to you): hi");
        let group = MessageRecord::group("bob", "teamA", "hello");
        assert_eq!(message_line(&group, "alice"), "bob (to teamA): hello");
    }

    #[test]
    fn test_history_lines() {
        assert_eq!(history_lines(&[]), vec!["> No matches."]);

        let entry = HistoryEntry::new(MessageRecord::group("bob", "teamA", "hello"), "teamA");
        assert_eq!(
            history_lines(&[entry]),
            vec!["> Found 1 message(s):", "bob (to teamA): hello"]
        );
    }

    #[tokio::test]
    async fn test_closed_output_is_tolerated() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handler = ConsoleHandler::new("alice", tx);
        handler.on_messages_received(&[MessageRecord::group("bob", "teamA", "hi")]);
        handler.on_users_dropped(&[UserRecord::new("bob", "teamA")]);

        let (mut console, output) = Console::new(Domain::new(0), Config::default());
        drop(output);
        assert_eq!(console.handle_line("help").await, Flow::Continue);
        assert_eq!(console.handle_line("quit").await, Flow::Quit);
    }

    #[test]
    fn test_handler_skips_own_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = ConsoleHandler::new("alice", tx);

        handler.on_users_dropped(&[UserRecord::new("alice", "teamA"), UserRecord::new("bob", "teamA")]);
        let line = rx.try_recv().unwrap();
        assert!(line.starts_with("[alice] ["));
        assert!(line.ends_with("> bob dropped."));
        assert!(rx.try_recv().is_err());
    }

    async fn expect_line(rx: &mut mpsc::UnboundedReceiver<String>, needle: &str) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let line = rx.recv().await.expect("output closed");
                if line.contains(needle) {
                    return line;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no line containing {needle:?}"))
    }

    fn settings() -> Config {
        let mut config = Config::default();
        config.session.wait_timeout_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_console_sessions_talk() {
        let (mut console, mut rx) = Console::new(Domain::new(0), settings());

        assert_eq!(console.handle_line("users").await, Flow::Continue);
        expect_line(&mut rx, "No active session").await;

        console.handle_line("join bob teamA").await;
        console.handle_line("join alice teamA Alice Smith").await;
        expect_line(&mut rx, "[bob] [").await;
        expect_line(&mut rx, "> alice (Alice Smith) joined on group teamA.").await;

        console.handle_line("send bob hi bob").await;
        let line = expect_line(&mut rx, "alice (to you): hi bob").await;
        assert!(line.starts_with("[bob] ["), "{line}");

        console.handle_line("sessions").await;
        expect_line(&mut rx, "> * alice on group teamA").await;
        expect_line(&mut rx, ">   bob on group teamA").await;

        console.handle_line("use bob").await;
        console.handle_line("search").await;
        expect_line(&mut rx, "[bob] > Found 1 message(s):").await;

        assert_eq!(console.handle_line("quit").await, Flow::Quit);
        assert!(console.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_leave_switches_active_session() {
        let (mut console, mut rx) = Console::new(Domain::new(0), settings());
        console.execute(join("alice", "teamA")).await.unwrap();
        console.execute(join("bob", "teamB")).await.unwrap();
        assert_eq!(console.active.as_deref(), Some("bob"));

        console.execute(Command::Leave).await.unwrap();
        expect_line(&mut rx, "> bob left.").await;
        assert_eq!(console.active.as_deref(), Some("alice"));

        assert!(matches!(
            console.execute(Command::Use("bob".to_string())).await,
            Err(ConsoleError::UnknownSession(_))
        ));
        console.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_join_leaves_no_session() {
        let (mut console, _rx) = Console::new(Domain::new(0), settings());
        let long = "x".repeat(huddle_protocol::MAX_NAME_SIZE + 1);
        assert!(console.execute(join(&long, "teamA")).await.is_err());
        assert!(console.sessions.is_empty());
        assert!(console.active.is_none());
    }
}
