//! Session configuration types.

use std::time::Duration;

use crate::types::AuthMechanism;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption (port 25). **Not recommended for submission.**
    None,
    /// Upgrade with STARTTLS when the server offers it (port 25).
    Opportunistic,
    /// Require STARTTLS (port 587). **Recommended.**
    #[default]
    StartTls,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::Opportunistic => 25,
            Self::StartTls => 587,
            Self::Implicit => 465,
        }
    }
}

/// Where the session's byte stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A server reachable over TCP.
    Tcp {
        /// Server hostname, also used as the TLS server name.
        host: String,
        /// Server port.
        port: u16,
    },
    /// A local MTA speaking SMTP on stdin/stdout (e.g. `sendmail -bs`).
    Process {
        /// Program to run.
        program: String,
        /// Program arguments.
        args: Vec<String>,
    },
}

/// Username and secret for AUTH.
///
/// For XOAUTH2 the secret is the bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication identity.
    pub username: String,
    /// Password or token.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Default argument for EHLO/HELO when no hostname is configured.
pub const DEFAULT_LOCAL_HOSTNAME: &str = "[127.0.0.1]";

/// Mechanisms tried, strongest first, when none are configured.
pub const DEFAULT_MECHANISMS: [AuthMechanism; 3] = [
    AuthMechanism::CramMd5,
    AuthMechanism::Plain,
    AuthMechanism::Login,
];

/// SMTP session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport endpoint.
    pub endpoint: Endpoint,
    /// Security mode.
    pub security: Security,
    /// Name announced in EHLO/HELO.
    pub local_hostname: String,
    /// Credentials; AUTH is skipped when absent.
    pub credentials: Option<Credentials>,
    /// Mechanism preference list.
    pub mechanisms: Vec<AuthMechanism>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read/write timeout for each exchange.
    pub io_timeout: Duration,
    /// Use PIPELINING when the server advertises it.
    pub pipelining: bool,
}

impl Config {
    /// Creates a configuration for `host` requiring STARTTLS on port 587.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder for a TCP server.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// Creates a configuration builder for a local process transport.
    #[must_use]
    pub fn builder_process(program: impl Into<String>, args: Vec<String>) -> ConfigBuilder {
        ConfigBuilder::process(program, args)
    }

    /// Returns the name to verify the server certificate against.
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        match &self.endpoint {
            Endpoint::Tcp { host, .. } => Some(host),
            Endpoint::Process { .. } => None,
        }
    }
}

/// Builder for session configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    process: Option<(String, Vec<String>)>,
    security: Security,
    local_hostname: String,
    credentials: Option<Credentials>,
    mechanisms: Vec<AuthMechanism>,
    connect_timeout: Duration,
    io_timeout: Duration,
    pipelining: bool,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            process: None,
            security: Security::default(),
            local_hostname: DEFAULT_LOCAL_HOSTNAME.to_string(),
            credentials: None,
            mechanisms: DEFAULT_MECHANISMS.to_vec(),
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(30),
            pipelining: true,
        }
    }

    /// Creates a builder for a local process; security defaults to none.
    #[must_use]
    pub fn process(program: impl Into<String>, args: Vec<String>) -> Self {
        let mut builder = Self::new(String::new());
        builder.process = Some((program.into(), args));
        builder.security = Security::None;
        builder
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the name announced in EHLO/HELO.
    #[must_use]
    pub fn local_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.local_hostname = hostname.into();
        self
    }

    /// Sets the AUTH credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Sets the mechanism preference list, most preferred first.
    #[must_use]
    pub fn mechanisms(mut self, mechanisms: impl IntoIterator<Item = AuthMechanism>) -> Self {
        self.mechanisms = mechanisms.into_iter().collect();
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Enables or disables PIPELINING.
    #[must_use]
    pub const fn pipelining(mut self, enabled: bool) -> Self {
        self.pipelining = enabled;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        let endpoint = match self.process {
            Some((program, args)) => Endpoint::Process { program, args },
            None => Endpoint::Tcp {
                port: self.port.unwrap_or_else(|| self.security.default_port()),
                host: self.host,
            },
        };

        Config {
            endpoint,
            security: self.security,
            local_hostname: self.local_hostname,
            credentials: self.credentials,
            mechanisms: self.mechanisms,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            pipelining: self.pipelining,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 25);
        assert_eq!(Security::Opportunistic.default_port(), 25);
        assert_eq!(Security::StartTls.default_port(), 587);
        assert_eq!(Security::Implicit.default_port(), 465);
    }

    #[test]
    fn test_config_new() {
        let config = Config::new("smtp.example.com");
        assert_eq!(
            config.endpoint,
            Endpoint::Tcp {
                host: "smtp.example.com".into(),
                port: 587
            }
        );
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.local_hostname, "[127.0.0.1]");
        assert!(config.credentials.is_none());
        assert_eq!(config.mechanisms, DEFAULT_MECHANISMS.to_vec());
        assert!(config.pipelining);
        assert_eq!(config.server_name(), Some("smtp.example.com"));
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("smtp.example.com")
            .security(Security::Implicit)
            .local_hostname("client.example.org")
            .credentials("user", "secret")
            .mechanisms([AuthMechanism::Login])
            .io_timeout(Duration::from_secs(5))
            .pipelining(false)
            .build();

        assert_eq!(
            config.endpoint,
            Endpoint::Tcp {
                host: "smtp.example.com".into(),
                port: 465
            }
        );
        assert_eq!(config.local_hostname, "client.example.org");
        assert_eq!(config.credentials.as_ref().unwrap().username, "user");
        assert_eq!(config.mechanisms, vec![AuthMechanism::Login]);
        assert_eq!(config.io_timeout, Duration::from_secs(5));
        assert!(!config.pipelining);
    }

    #[test]
    fn test_explicit_port_wins() {
        let config = Config::builder("mx.example.com")
            .security(Security::None)
            .port(2525)
            .build();
        assert!(matches!(config.endpoint, Endpoint::Tcp { port: 2525, .. }));
    }

    #[test]
    fn test_process_endpoint() {
        let config = Config::builder_process("/usr/sbin/sendmail", vec!["-bs".into()]).build();
        assert_eq!(config.security, Security::None);
        assert!(config.server_name().is_none());
        assert!(matches!(
            config.endpoint,
            Endpoint::Process { ref program, .. } if program == "/usr/sbin/sendmail"
        ));
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials::new("user", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }
}
