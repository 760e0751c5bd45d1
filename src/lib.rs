//! A chat room served over a hand-rolled HTTP/1.1 subset.
//!
//! Requests are framed straight off the socket by [`message::LineReader`] and
//! [`message::ParsedRequest`]; a GET renders every stored message, a POST of
//! `username=..&message=..` appends one first.

pub mod def;
pub mod message;
pub mod chat;
pub mod page;
pub mod config;
pub mod http;

pub use chat::{ChatMessage, MessageStore};
pub use config::Config;
pub use http::{ChatServer, ConnectionHandler};
