pub mod executor;
pub mod extract;
pub mod mailbox;
pub mod safety;

pub use executor::{CommandExecutor, ExecutionOutcome};
pub use extract::{CommandBlocks, command_blocks, extract_commands};
pub use mailbox::{Mailbox, MailboxSession, TcpMailbox};
pub use safety::{SAFE_TOKEN, SafetyValidator, SafetyVerdict};
