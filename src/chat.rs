use std::fmt::{self, Display, Formatter};
use chrono::{DateTime, Local};
use log::debug;
use crate::def::FormError;

const USERNAME_FIELD: &'static str = "username=";
const MESSAGE_FIELD: &'static str = "message=";
const TIMESTAMP_FORMAT: &'static str = "%Y-%m-%d | %H:%M:%S";

#[derive(Clone, Debug)]
pub struct ChatMessage {
    username: String,
    message: String,
    created_at: DateTime<Local>,
}

impl ChatMessage {
    pub fn new<U: Into<String>, M: Into<String>>(username: U, message: M) -> Self {
        Self { username: username.into(), message: message.into(), created_at: Local::now() }
    }

    /// Decodes the last line of a `username=<raw>&message=<raw>` body.
    ///
    /// The field names are stripped as fixed prefixes and the pair is split at the
    /// first `&`. `+` in the message becomes a space, nothing else is unescaped.
    pub fn from_form(body: &str) -> Result<Self, FormError> {
        let content = body.lines().last().unwrap_or("");
        let content = content.strip_prefix(USERNAME_FIELD).unwrap_or(content);
        let separator = content.find('&').ok_or(FormError::Separator)?;

        let username = &content[..separator];
        let message = &content[(separator + 1)..];
        let message = message.strip_prefix(MESSAGE_FIELD).unwrap_or(message).replace('+', " ");
        if username.is_empty() { Err(FormError::Username)? }

        debug!("username: {} message: {}", username, message);
        Ok(Self::new(username, message))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }
}

impl Display for ChatMessage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.username(), self.created_at().format(TIMESTAMP_FORMAT), self.message())
    }
}

/// Every message accepted since startup, in the order it was posted.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<ChatMessage> {
        self.messages.iter()
    }

    pub fn render_all(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|m| m.to_string())
    }
}
