//! The prompt set seeding a fresh conversation.
//!
//! Prompts can be overridden by dropping `startup.{txt,md}` or
//! `mailbox_api.{txt,md}` into a prompts directory; compiled-in defaults
//! apply otherwise.

use std::fs;
use std::path::Path;

const DEFAULT_STARTUP: &str = "\
You are a very helpful assistant tasked with managing an important person's \
email inbox. You have access to their mailbox through raw IMAP commands. \
When you want to act on the mailbox, emit exactly one IMAP command line \
inside a fenced code block tagged `imap`, for example:\n\
```imap\nLIST \"\" \"*\"\n```\n\
The command's result will be reported back to you. When you have nothing \
further to run, answer in plain text with no code block.";

const DEFAULT_MAILBOX_API: &str = "\
Available commands are standard IMAP4rev1: CAPABILITY, NOOP, LIST, SELECT, \
EXAMINE, SEARCH, FETCH, STORE, COPY, EXPUNGE. One command per fenced block; \
the session is authenticated for you and closed after every command.";

/// The named prompts the application ships with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    /// Seeded as the first developer message of a fresh transcript.
    pub startup: String,
    /// Primer describing the command surface, available for seeding.
    pub mailbox_api: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            startup: DEFAULT_STARTUP.to_string(),
            mailbox_api: DEFAULT_MAILBOX_API.to_string(),
        }
    }
}

impl PromptSet {
    /// Loads prompts from a directory, falling back to the defaults for any
    /// file that is absent or unreadable.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let defaults = Self::default();
        Self {
            startup: read_prompt(dir, "startup").unwrap_or(defaults.startup),
            mailbox_api: read_prompt(dir, "mailbox_api").unwrap_or(defaults.mailbox_api),
        }
    }
}

fn read_prompt(dir: &Path, name: &str) -> Option<String> {
    ["txt", "md"].iter().find_map(|ext| {
        let path = dir.join(format!("{name}.{ext}"));
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    })
}
