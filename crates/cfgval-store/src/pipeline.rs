use cfgval_core::FieldMap;

use crate::store::{StoreError, StoreResult};

/// One read queued in a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exists(String),
    Keys(String),
    HGet(String, String),
    HMGet(String, Vec<String>),
    HGetAll(String),
}

/// Reply to one pipelined command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Exists(bool),
    Keys(Vec<String>),
    Value(Option<String>),
    Values(Vec<Option<String>>),
    Hash(FieldMap),
}

impl Reply {
    pub fn into_hash(self) -> StoreResult<FieldMap> {
        match self {
            Reply::Hash(hash) => Ok(hash),
            other => Err(unexpected("hash", &other)),
        }
    }

    pub fn into_keys(self) -> StoreResult<Vec<String>> {
        match self {
            Reply::Keys(keys) => Ok(keys),
            other => Err(unexpected("key list", &other)),
        }
    }

    pub fn into_exists(self) -> StoreResult<bool> {
        match self {
            Reply::Exists(exists) => Ok(exists),
            other => Err(unexpected("existence flag", &other)),
        }
    }
}

fn unexpected(expected: &str, reply: &Reply) -> StoreError {
    StoreError::InvalidRequest(format!("expected {expected} reply, got {reply:?}"))
}

/// Batch of reads executed in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Exists(key.into()));
        self
    }

    pub fn keys(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Keys(pattern.into()));
        self
    }

    pub fn hget(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.commands.push(Command::HGet(key.into(), field.into()));
        self
    }

    pub fn hmget(&mut self, key: impl Into<String>, fields: Vec<String>) -> &mut Self {
        self.commands.push(Command::HMGet(key.into(), fields));
        self
    }

    pub fn hgetall(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::HGetAll(key.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}
