//! SMTP connection management.
//!
//! Layers, bottom up: a [`Connection`] moves bytes (TCP, TLS or a local
//! process), [`SmtpBuffer`] frames commands and replies on it, and
//! [`Session`] drives the protocol.

mod buffer;
mod config;
mod data;
mod session;
mod stream;

pub use buffer::SmtpBuffer;
pub use config::{
    Config, ConfigBuilder, Credentials, DEFAULT_LOCAL_HOSTNAME, DEFAULT_MECHANISMS, Endpoint,
    Security,
};
pub use data::DotStuffer;
pub use session::{Delivery, Session, SessionState};
pub use stream::{Connection, ProcessPipe, Transport, create_tls_connector};
