/// A single write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: Vec<u8> },
    Del { key: String },
    IncrBy { key: String, by: i64 },
    RPush { key: String, value: Vec<u8> },
    LRem { key: String, count: i64, value: Vec<u8> },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
}

impl Command {
    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. }
            | Command::Del { key }
            | Command::IncrBy { key, .. }
            | Command::RPush { key, .. }
            | Command::LRem { key, .. }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. } => key,
        }
    }
}

/// Ordered writes that the store executes as one indivisible unit.
///
/// Side effects supplied by callers (for example recording a finished job)
/// are appended to the same batch so they commit together with the adapter's
/// own writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Command::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Del { key: key.into() })
    }

    pub fn incr_by(&mut self, key: impl Into<String>, by: i64) -> &mut Self {
        self.push(Command::IncrBy {
            key: key.into(),
            by,
        })
    }

    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.push(Command::RPush {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn lrem(
        &mut self,
        key: impl Into<String>,
        count: i64,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.push(Command::LRem {
            key: key.into(),
            count,
            value: value.into(),
        })
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SRem {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
