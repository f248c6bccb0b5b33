//! The actuation interface: turning decisions into engine commands.
//!
//! Commands are fire-and-forget. [`CommandSink::issue`] returns a
//! [`RequestId`] immediately; whether the command succeeded is only
//! observable on a later tick, as a
//! [`CommandOutcome`](quartermaster_types::CommandOutcome) in the snapshot.

use quartermaster_types::{Command, RequestId};

/// Transport that hands commands to the external engine.
pub trait CommandSink {
    /// Issue a command and return its request identifier. Must not block.
    fn issue(&mut self, command: Command) -> RequestId;
}

/// A sink that records every command in memory.
///
/// Used in tests and as a dry-run transport.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    /// Issued commands with their assigned request IDs, in issue order.
    pub commands: Vec<(RequestId, Command)>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub const fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Commands issued by one subsystem.
    pub fn issued_by<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Command> + 'a {
        self.commands
            .iter()
            .map(|(_, command)| command)
            .filter(move |command| command.issued_by == name)
    }
}

impl CommandSink for RecordingSink {
    fn issue(&mut self, command: Command) -> RequestId {
        let id = RequestId::new();
        self.commands.push((id, command));
        id
    }
}
