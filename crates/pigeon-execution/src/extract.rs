//! Command extraction from free-text oracle replies.
//!
//! Commands are fenced code blocks tagged `imap`. Extraction is purely
//! textual: no validation of fragment content happens here.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches one fenced command block. Case-insensitive on the language tag,
/// dot-matches-newline for the body, non-greedy so blocks never overlap. An
/// opening fence without a closing marker simply does not match.
static COMMAND_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?si)```imap[ \t]*\r?\n(.*?)```").expect("command block pattern is valid")
});

/// A lazy iterator over the command fragments of one reply, in document
/// order. Restartable by calling [`command_blocks`] again on the same text.
pub struct CommandBlocks<'t> {
    inner: regex::CaptureMatches<'static, 't>,
}

impl<'t> Iterator for CommandBlocks<'t> {
    type Item = &'t str;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|captures| captures.get(1).map_or("", |m| m.as_str()).trim())
    }
}

/// Returns a lazy, finite iterator over the fenced command fragments in
/// `text`, first block first. Zero blocks yields an empty iterator, which is
/// the turn-termination signal for the orchestrator.
pub fn command_blocks(text: &str) -> CommandBlocks<'_> {
    CommandBlocks {
        inner: COMMAND_BLOCK.captures_iter(text),
    }
}

/// Collects all fragments of `text` into owned strings, in document order.
pub fn extract_commands(text: &str) -> Vec<String> {
    command_blocks(text).map(str::to_string).collect()
}
