//! Interactive chat loop.
//!
//! Reads one line at a time. Lines starting with `/` are commands; anything
//! else is a question for the active session. Only the command word is
//! case-insensitive, arguments (document names) are used as typed.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/clear` | delete the active index, leaving the session uninitialized |
//! | `/reindex` | rebuild the active index from the documents |
//! | `/list_docs` | list documents, marking the active one |
//! | `/use_doc <name>` | switch to another document |
//! | `/history` | show the turns that will be replayed |
//! | `/reset` | forget the conversation so far |
//! | `/help` | list commands |
//! | `/exit` | leave |

use anyhow::Result;
use std::io::{BufRead, ErrorKind, Write};

use crate::history::ChatHistory;
use crate::session::{RagSession, NOT_INDEXED_MESSAGE};

const HELP_TEXT: &str = "
Available commands:
  /clear            - Clear the index for the active document.
  /reindex          - Re-create the index for the active document.
  /list_docs        - List available documents.
  /use_doc <name>   - Switch to a different document.
  /history          - Show the conversation history used for follow-up questions.
  /reset            - Forget the conversation history.
  /help             - Show this help message.
  /exit             - Exit the chat.";

/// Common slips and the command they most likely meant.
const SUGGESTIONS: &[(&str, &str)] = &[
    ("/quit", "Did you mean /exit?"),
    ("/q", "Did you mean /exit?"),
    ("/bye", "Did you mean /exit?"),
    ("/h", "Did you mean /help?"),
    ("/?", "Did you mean /help?"),
    ("/commands", "Did you mean /help?"),
    ("/list", "Did you mean /list_docs?"),
    ("/ls", "Did you mean /list_docs?"),
    ("/docs", "Did you mean /list_docs?"),
    ("/use", "Did you mean /use_doc <document_name>?"),
    ("/open", "Did you mean /use_doc <document_name>?"),
    ("/switch", "Did you mean /use_doc <document_name>?"),
    ("/index", "Did you mean /reindex?"),
    ("/rebuild", "Did you mean /reindex?"),
    ("/re-index", "Did you mean /reindex?"),
    ("/clean", "Did you mean /clear?"),
    ("/delete", "Did you mean /clear?"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Clear,
    Reindex,
    ListDocs,
    /// `None` when no document name was given.
    UseDoc(Option<String>),
    History,
    Reset,
    Help,
    Exit,
    Unknown(String),
}

impl Command {
    /// Parse a line that starts with `/`.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "/clear" => Command::Clear,
            "/reindex" => Command::Reindex,
            "/list_docs" => Command::ListDocs,
            "/use_doc" if rest.is_empty() => Command::UseDoc(None),
            "/use_doc" => Command::UseDoc(Some(rest.to_string())),
            "/history" => Command::History,
            "/reset" => Command::Reset,
            "/help" => Command::Help,
            "/exit" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    session: RagSession,
    history: ChatHistory,
}

impl Shell {
    pub fn new(session: RagSession) -> Self {
        let history = ChatHistory::new(session.settings().max_replay_history);
        Self { session, history }
    }

    pub fn session(&self) -> &RagSession {
        &self.session
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Run until `/exit`, end of input, or an interrupted read.
    ///
    /// Errors from individual questions and commands are printed and the
    /// loop continues; only failures to read or write the terminal end it.
    pub fn run<R: BufRead, W: Write>(&mut self, input: &mut R, output: &mut W) -> Result<()> {
        writeln!(
            output,
            "\nChat with {}! Type '/help' for a list of commands.",
            self.session.active_label()
        )?;

        loop {
            write!(output, "\nYou: ")?;
            output.flush()?;

            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => break,
                Err(e) => return Err(e.into()),
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let step = if line.starts_with('/') {
                self.execute(Command::parse(line), output)
            } else {
                self.answer(line, output)
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => writeln!(output, "An error occurred: {:#}", e)?,
            }
        }

        writeln!(output, "\nExiting chat.")?;
        Ok(())
    }

    fn answer<W: Write>(&mut self, question: &str, output: &mut W) -> Result<Flow> {
        let replay = self.session.settings().replay_history;
        let history = if replay {
            self.history.to_vec()
        } else {
            Vec::new()
        };

        let answer = self.session.ask(question, &history)?;
        writeln!(output, "\nAI: {}", answer)?;

        if replay && answer != NOT_INDEXED_MESSAGE {
            self.history.push(question, answer);
        }
        Ok(Flow::Continue)
    }

    fn execute<W: Write>(&mut self, command: Command, output: &mut W) -> Result<Flow> {
        match command {
            Command::Exit => return Ok(Flow::Exit),
            Command::Clear => match self.session.clear_index() {
                Ok(true) => writeln!(
                    output,
                    "Index at {} has been cleared. Please run `/reindex` to create a new index.",
                    self.session.index_path().display()
                )?,
                Ok(false) => writeln!(output, "No index found to clear.")?,
                Err(e) => writeln!(output, "Error clearing index: {:#}", e)?,
            },
            Command::Reindex => {
                writeln!(output, "Re-indexing...")?;
                self.session.rebuild()?;
                writeln!(output, "Re-indexing complete.")?;
            }
            Command::ListDocs => self.list_docs(output)?,
            Command::UseDoc(None) => writeln!(output, "Usage: /use_doc <document_name>")?,
            Command::UseDoc(Some(name)) => {
                self.session.switch_document(&name)?;
                self.history.clear();
                writeln!(output, "Switched to {}.", name)?;
            }
            Command::History => {
                if self.history.is_empty() {
                    writeln!(output, "No conversation history.")?;
                }
                for turn in self.history.turns() {
                    writeln!(output, "You: {}\nAI: {}", turn.question, turn.answer)?;
                }
            }
            Command::Reset => {
                self.history.clear();
                writeln!(output, "Conversation history cleared.")?;
            }
            Command::Help => writeln!(output, "{}", HELP_TEXT)?,
            Command::Unknown(word) => {
                match SUGGESTIONS.iter().find(|(typo, _)| *typo == word) {
                    Some((_, hint)) => writeln!(output, "{}", hint)?,
                    None => writeln!(output, "Unrecognized command: {}. Try '/help'.", word)?,
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn list_docs<W: Write>(&self, output: &mut W) -> Result<()> {
        let docs = self.session.list_documents();
        if docs.is_empty() {
            writeln!(output, "No documents found.")?;
            return Ok(());
        }

        let active = self.session.active_documents();
        writeln!(output, "Available documents:")?;
        for doc in docs {
            if active.contains(doc) {
                writeln!(output, "  - {} (active)", doc)?;
            } else {
                writeln!(output, "  - {}", doc)?;
            }
        }
        Ok(())
    }
}
