//! # postwire-smtp
//!
//! An asynchronous SMTP submission client (RFC 5321).
//!
//! ## Features
//!
//! - **Session engine**: greeting, EHLO with HELO fallback, STARTTLS, AUTH,
//!   then any number of mail transactions over one connection
//! - **TLS**: implicit TLS (port 465), required or opportunistic STARTTLS
//! - **Authentication**: PLAIN, LOGIN, CRAM-MD5, XOAUTH2
//! - **Extensions**: SIZE, 8BITMIME, PIPELINING
//! - **Transports**: TCP, or a local MTA on stdin/stdout (`sendmail -bs`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use postwire_mime::Message;
//! use postwire_smtp::{Address, Config, Security, Session};
//!
//! # async fn run() -> postwire_smtp::Result<()> {
//! let config = Config::builder("smtp.example.com")
//!     .security(Security::StartTls)
//!     .credentials("user@example.com", "password")
//!     .build();
//! let mut session = Session::connect(config).await?;
//!
//! let message = Message::new()
//!     .from("user@example.com")
//!     .to("friend@example.org")
//!     .subject("Hello")
//!     .text_body("Hello, World!");
//!
//! let from = Address::new("user@example.com")?;
//! let to = [Address::new("friend@example.org")?];
//! let delivery = session.send_message(&from, &to, &message).await?;
//! assert!(delivery.is_complete());
//!
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Connected ─→ Greeted ─→ Extended ─┬─→ TlsActive ─┬─→ Authenticated
//!                                   └──────────────┴──────────┐
//!                 ready state ←── MailTransaction ←───────────┘
//! ```
//!
//! Connection failures, timeouts and failed authentication move the
//! session to `Closed`.
//!
//! ## Modules
//!
//! - [`auth`]: SASL mechanisms
//! - [`command`]: SMTP command builders
//! - [`connection`]: Transports, buffering and the session engine
//! - [`parser`]: Reply parser
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Config, ConfigBuilder, Connection, Credentials, Delivery, Endpoint, Security, Session,
    SessionState, Transport,
};
pub use error::{Error, RecipientRejected, Result};
pub use types::{Address, AuthMechanism, Extensions, Reply, ReplyCode};
