//! Ordered chat transcript and the turns it holds

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a turn within a transcript
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(String);

impl TurnId {
    /// Fresh random id with a readable prefix, e.g. `user-<uuid>`
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TurnId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    /// Failed turn; terminal
    Error,
}

impl Sender {
    pub fn display_name(&self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Assistant => "HealthPal",
            Sender::Error => "Error",
        }
    }
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: TurnId,
    pub text: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(id: TurnId, text: impl Into<String>, sender: Sender) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnId::generate("user"), text, Sender::User)
    }

    /// Empty assistant turn that a stream will fill in
    pub fn placeholder() -> Self {
        Self::new(TurnId::generate("bot"), String::new(), Sender::Assistant)
    }

    pub fn is_terminal(&self) -> bool {
        self.sender == Sender::Error
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("turn id must not be empty")]
    EmptyId,
    #[error("turn '{0}' already exists")]
    DuplicateId(TurnId),
    #[error("no turn with id '{0}'")]
    UnknownTurn(TurnId),
    #[error("turn '{0}' has failed and can no longer change")]
    TerminalTurn(TurnId),
}

/// Append-only store of chat turns with by-id updates
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    turns: Vec<ChatTurn>,
    index: HashMap<TurnId, usize>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a single assistant turn
    pub fn seeded(welcome: ChatTurn) -> Self {
        let mut store = Self::new();
        // a fresh store cannot collide, only an empty id can fail here
        if let Err(err) = store.append(welcome) {
            tracing::warn!(error = %err, "welcome turn rejected");
        }
        store
    }

    pub fn append(&mut self, turn: ChatTurn) -> Result<(), StoreError> {
        if turn.id.as_str().is_empty() {
            return Err(StoreError::EmptyId);
        }
        if self.index.contains_key(&turn.id) {
            return Err(StoreError::DuplicateId(turn.id));
        }

        self.index.insert(turn.id.clone(), self.turns.len());
        self.turns.push(turn);
        Ok(())
    }

    /// Overwrite the text of a turn, optionally changing its sender.
    pub fn update(
        &mut self,
        id: &TurnId,
        text: impl Into<String>,
        sender: Option<Sender>,
    ) -> Result<(), StoreError> {
        let position = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::UnknownTurn(id.clone()))?;
        let turn = &mut self.turns[position];

        if turn.is_terminal() {
            return Err(StoreError::TerminalTurn(id.clone()));
        }

        turn.text = text.into();
        if let Some(sender) = sender {
            turn.sender = sender;
        }
        Ok(())
    }

    pub fn get(&self, id: &TurnId) -> Option<&ChatTurn> {
        self.index.get(id).map(|&position| &self.turns[position])
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
