//! Connection handshake.
//!
//! The connecting side greets with its protocol, version and endpoint
//! name. The accepting side then challenges the client if it has a client
//! authenticator, after which the client challenges the server if it has a
//! server authenticator. The accepting side ends the exchange with
//! `handshake_succeeded`; only then may grain traffic flow.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use grainrpc_frame::{FrameError, FrameReader, FrameWriter, MessageKind};
use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::error::{EndpointError, Result};

pub const PROTOCOL_NAME: &str = "grainrpc";
pub const PROTOCOL_VERSION: &str = "1.0";

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_NAME_LEN: usize = 256;

/// Messages exchanged on `Handshake` frames.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    Hello {
        protocol: String,
        version: String,
        name: String,
    },
    AuthenticationRequired {
        challenge: String,
    },
    NoAuthenticationRequired,
    AuthenticationResponse {
        response: String,
    },
    AuthenticationSucceeded,
    AuthenticationFailed,
    HandshakeSucceeded {
        name: String,
        version: String,
    },
    EndpointBlocked {
        name: String,
    },
    Rejected {
        reason: String,
    },
}

impl HandshakeMessage {
    fn name(&self) -> &'static str {
        match self {
            HandshakeMessage::Hello { .. } => "hello",
            HandshakeMessage::AuthenticationRequired { .. } => "authentication_required",
            HandshakeMessage::NoAuthenticationRequired => "no_authentication_required",
            HandshakeMessage::AuthenticationResponse { .. } => "authentication_response",
            HandshakeMessage::AuthenticationSucceeded => "authentication_succeeded",
            HandshakeMessage::AuthenticationFailed => "authentication_failed",
            HandshakeMessage::HandshakeSucceeded { .. } => "handshake_succeeded",
            HandshakeMessage::EndpointBlocked { .. } => "endpoint_blocked",
            HandshakeMessage::Rejected { .. } => "rejected",
        }
    }
}

impl fmt::Debug for HandshakeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeMessage::AuthenticationResponse { response } => f
                .debug_struct("AuthenticationResponse")
                .field(
                    "response",
                    &format_args!("<redacted:{} bytes>", response.len()),
                )
                .finish(),
            HandshakeMessage::Hello {
                protocol,
                version,
                name,
            } => f
                .debug_struct("Hello")
                .field("protocol", protocol)
                .field("version", version)
                .field("name", name)
                .finish(),
            HandshakeMessage::AuthenticationRequired { challenge } => f
                .debug_struct("AuthenticationRequired")
                .field("challenge", challenge)
                .finish(),
            HandshakeMessage::HandshakeSucceeded { name, version } => f
                .debug_struct("HandshakeSucceeded")
                .field("name", name)
                .field("version", version)
                .finish(),
            HandshakeMessage::EndpointBlocked { name } => {
                f.debug_struct("EndpointBlocked").field("name", name).finish()
            }
            HandshakeMessage::Rejected { reason } => {
                f.debug_struct("Rejected").field("reason", reason).finish()
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Name of the remote endpoint.
    pub remote_name: String,
    /// Protocol version of the remote endpoint.
    pub protocol_version: String,
}

/// Configuration for one side of the handshake.
#[derive(Clone)]
pub struct HandshakeConfig {
    /// Name of the local endpoint.
    pub name: String,
    /// Timeout for the whole exchange.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
    /// Verifies clients (server side) or answers the server's challenge
    /// (client side).
    pub client_authenticator: Option<Arc<dyn Authenticator>>,
    /// Verifies the server (client side) or answers the client's challenge
    /// (server side).
    pub server_authenticator: Option<Arc<dyn Authenticator>>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            name: "grainrpc".to_string(),
            timeout: Duration::from_secs(60),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_handshake_payload: 16 * 1024,
            client_authenticator: None,
            server_authenticator: None,
        }
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("max_handshake_payload", &self.max_handshake_payload)
            .field("client_authenticator", &self.client_authenticator)
            .field("server_authenticator", &self.server_authenticator)
            .finish()
    }
}

/// Runs the connecting side of the handshake.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_name(&config.name)?;

    let deadline = Instant::now() + config.timeout;
    let mut exchange = Exchange {
        reader,
        writer,
        deadline,
        config,
    };

    exchange.send(&HandshakeMessage::Hello {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        name: config.name.clone(),
    })?;

    match exchange.recv()? {
        HandshakeMessage::NoAuthenticationRequired => {}
        HandshakeMessage::AuthenticationRequired { challenge } => {
            let Some(auth) = &config.client_authenticator else {
                exchange.send(&HandshakeMessage::Rejected {
                    reason: "no client credentials configured".to_string(),
                })?;
                return Err(EndpointError::AuthenticationRequired(
                    "remote endpoint requires client authentication but no client \
                     authenticator is configured"
                        .to_string(),
                ));
            };
            exchange.send(&HandshakeMessage::AuthenticationResponse {
                response: auth.create_response(&challenge),
            })?;
            match exchange.recv()? {
                HandshakeMessage::AuthenticationSucceeded => {}
                HandshakeMessage::AuthenticationFailed => {
                    return Err(EndpointError::Authentication(
                        "remote endpoint rejected the client credentials".to_string(),
                    ))
                }
                other => return Err(unexpected(&other)),
            }
        }
        HandshakeMessage::EndpointBlocked { name } => {
            return Err(EndpointError::EndpointBlocked(name))
        }
        HandshakeMessage::Rejected { reason } => return Err(EndpointError::Handshake(reason)),
        other => return Err(unexpected(&other)),
    }

    match &config.server_authenticator {
        Some(auth) => {
            let challenge = auth.create_challenge();
            exchange.send(&HandshakeMessage::AuthenticationRequired {
                challenge: challenge.clone(),
            })?;
            match exchange.recv()? {
                HandshakeMessage::AuthenticationResponse { response } => {
                    if auth.authenticate(&challenge, &response) {
                        exchange.send(&HandshakeMessage::AuthenticationSucceeded)?;
                    } else {
                        exchange.send(&HandshakeMessage::AuthenticationFailed)?;
                        return Err(EndpointError::Authentication(
                            "remote endpoint failed the server authentication challenge"
                                .to_string(),
                        ));
                    }
                }
                HandshakeMessage::Rejected { reason } => {
                    return Err(EndpointError::Authentication(format!(
                        "remote endpoint cannot authenticate itself: {reason}"
                    )))
                }
                other => return Err(unexpected(&other)),
            }
        }
        None => exchange.send(&HandshakeMessage::NoAuthenticationRequired)?,
    }

    match exchange.recv()? {
        HandshakeMessage::HandshakeSucceeded { name, version } => {
            validate_name(&name)?;
            validate_version(&version)?;
            Ok(HandshakeResult {
                remote_name: name,
                protocol_version: version,
            })
        }
        HandshakeMessage::Rejected { reason } => Err(EndpointError::Handshake(reason)),
        other => Err(unexpected(&other)),
    }
}

/// Runs the accepting side of the handshake.
pub fn handshake_server<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_name(&config.name)?;

    let deadline = Instant::now() + config.timeout;
    let mut exchange = Exchange {
        reader,
        writer,
        deadline,
        config,
    };

    let (protocol, version, remote_name) = match exchange.recv()? {
        HandshakeMessage::Hello {
            protocol,
            version,
            name,
        } => (protocol, version, name),
        other => return Err(unexpected(&other)),
    };

    if let Err(err) = check_hello(config, &protocol, &version, &remote_name) {
        exchange.send(&HandshakeMessage::Rejected {
            reason: err.to_string(),
        })?;
        return Err(err);
    }

    match &config.client_authenticator {
        Some(auth) => {
            let challenge = auth.create_challenge();
            exchange.send(&HandshakeMessage::AuthenticationRequired {
                challenge: challenge.clone(),
            })?;
            match exchange.recv()? {
                HandshakeMessage::AuthenticationResponse { response } => {
                    if auth.authenticate(&challenge, &response) {
                        exchange.send(&HandshakeMessage::AuthenticationSucceeded)?;
                    } else {
                        exchange.send(&HandshakeMessage::AuthenticationFailed)?;
                        return Err(EndpointError::Authentication(format!(
                            "client '{remote_name}' failed the authentication challenge"
                        )));
                    }
                }
                HandshakeMessage::Rejected { reason } => {
                    return Err(EndpointError::Authentication(format!(
                        "client '{remote_name}' cannot authenticate itself: {reason}"
                    )))
                }
                other => return Err(unexpected(&other)),
            }
        }
        None => exchange.send(&HandshakeMessage::NoAuthenticationRequired)?,
    }

    match exchange.recv()? {
        HandshakeMessage::NoAuthenticationRequired => {}
        HandshakeMessage::AuthenticationRequired { challenge } => {
            let Some(auth) = &config.server_authenticator else {
                exchange.send(&HandshakeMessage::Rejected {
                    reason: "no server credentials configured".to_string(),
                })?;
                return Err(EndpointError::AuthenticationRequired(format!(
                    "client '{remote_name}' requires server authentication but no server \
                     authenticator is configured"
                )));
            };
            exchange.send(&HandshakeMessage::AuthenticationResponse {
                response: auth.create_response(&challenge),
            })?;
            match exchange.recv()? {
                HandshakeMessage::AuthenticationSucceeded => {}
                HandshakeMessage::AuthenticationFailed => {
                    return Err(EndpointError::Authentication(format!(
                        "client '{remote_name}' rejected the server credentials"
                    )))
                }
                other => return Err(unexpected(&other)),
            }
        }
        HandshakeMessage::Rejected { reason } => return Err(EndpointError::Handshake(reason)),
        other => return Err(unexpected(&other)),
    }

    exchange.send(&HandshakeMessage::HandshakeSucceeded {
        name: config.name.clone(),
        version: config.protocol_version.clone(),
    })?;

    Ok(HandshakeResult {
        remote_name,
        protocol_version: version,
    })
}

/// Tells a connecting peer that this endpoint already serves a connection.
pub fn reject_blocked<W: Write>(writer: &mut FrameWriter<W>, name: &str) -> Result<()> {
    let payload = serde_json::to_vec(&HandshakeMessage::EndpointBlocked {
        name: name.to_string(),
    })?;
    writer.send(MessageKind::Handshake, &payload)?;
    Ok(())
}

struct Exchange<'a, R, W> {
    reader: &'a mut FrameReader<R>,
    writer: &'a mut FrameWriter<W>,
    deadline: Instant,
    config: &'a HandshakeConfig,
}

impl<R: Read, W: Write> Exchange<'_, R, W> {
    fn send(&mut self, message: &HandshakeMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.writer
            .send(MessageKind::Handshake, &payload)
            .map_err(|err| handshake_io_error(err, self.config.timeout))
    }

    fn recv(&mut self) -> Result<HandshakeMessage> {
        loop {
            if Instant::now() >= self.deadline {
                return Err(EndpointError::Timeout(self.config.timeout));
            }

            match self.reader.read_frame() {
                Ok(frame) => {
                    if frame.kind != MessageKind::Handshake {
                        return Err(EndpointError::Handshake(format!(
                            "expected a handshake message, got {}",
                            frame.kind
                        )));
                    }
                    if frame.payload.len() > self.config.max_handshake_payload {
                        return Err(EndpointError::Handshake(format!(
                            "handshake payload too large: {} (max {})",
                            frame.payload.len(),
                            self.config.max_handshake_payload
                        )));
                    }
                    return serde_json::from_slice(&frame.payload).map_err(|err| {
                        EndpointError::Handshake(format!("malformed handshake message: {err}"))
                    });
                }
                Err(err) if err.is_timeout() => continue,
                Err(err) => return Err(handshake_io_error(err, self.config.timeout)),
            }
        }
    }
}

fn handshake_io_error(err: FrameError, timeout: Duration) -> EndpointError {
    match err {
        FrameError::ConnectionClosed => {
            EndpointError::Handshake("connection closed during handshake".to_string())
        }
        err if err.is_timeout() => EndpointError::Timeout(timeout),
        FrameError::Io(err) => EndpointError::Frame(FrameError::Io(err)),
        other => EndpointError::Handshake(format!("peer does not speak {PROTOCOL_NAME}: {other}")),
    }
}

fn unexpected(message: &HandshakeMessage) -> EndpointError {
    EndpointError::Handshake(format!(
        "unexpected handshake message '{}'",
        message.name()
    ))
}

fn check_hello(config: &HandshakeConfig, protocol: &str, version: &str, name: &str) -> Result<()> {
    validate_protocol_name(protocol)?;
    validate_version(version)?;
    validate_name(name)?;

    if protocol != config.protocol_name {
        return Err(EndpointError::Handshake(format!(
            "unknown protocol '{}' (expected '{}')",
            protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(version, &config.protocol_version)? {
        return Err(EndpointError::Handshake(format!(
            "incompatible version '{}' (local '{}')",
            version, config.protocol_version
        )));
    }
    Ok(())
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(EndpointError::Handshake(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(EndpointError::Handshake(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(EndpointError::Handshake(format!(
            "invalid endpoint name length: {}",
            name.len()
        )));
    }
    Ok(())
}

/// The remote version must share the local major version and must not be
/// newer in its minor version.
fn is_version_compatible(remote_version: &str, local_version: &str) -> Result<bool> {
    let (remote_major, remote_minor) = parse_version(remote_version)?;
    let (local_major, local_minor) = parse_version(local_version)?;

    Ok(remote_major == local_major && remote_minor <= local_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let mut parts = version.split('.');

    let major = parts.next().ok_or_else(|| {
        EndpointError::Handshake(format!("invalid version '{}': missing major", version))
    })?;
    let minor = parts.next().ok_or_else(|| {
        EndpointError::Handshake(format!("invalid version '{}': missing minor", version))
    })?;

    if parts.next().is_some() {
        return Err(EndpointError::Handshake(format!(
            "invalid version '{}': expected '<major>.<minor>'",
            version
        )));
    }

    let major = major.parse::<u16>().map_err(|_| {
        EndpointError::Handshake(format!("invalid version '{}': non-numeric major", version))
    })?;
    let minor = minor.parse::<u16>().map_err(|_| {
        EndpointError::Handshake(format!("invalid version '{}': non-numeric minor", version))
    })?;

    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind, Read};
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;
    use crate::auth::SharedSecretAuthenticator;

    fn config(name: &str) -> HandshakeConfig {
        HandshakeConfig {
            name: name.to_string(),
            timeout: Duration::from_secs(5),
            ..HandshakeConfig::default()
        }
    }

    fn secret(value: &str) -> Option<Arc<dyn Authenticator>> {
        Some(Arc::new(SharedSecretAuthenticator::new(value)))
    }

    fn run(
        client: HandshakeConfig,
        server: HandshakeConfig,
    ) -> (Result<HandshakeResult>, Result<HandshakeResult>) {
        let (left, right) = UnixStream::pair().unwrap();

        let server = thread::spawn(move || {
            let mut reader = FrameReader::new(left.try_clone().unwrap());
            let mut writer = FrameWriter::new(left);
            handshake_server(&mut reader, &mut writer, &server)
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let client_result = handshake_client(&mut reader, &mut writer, &client);
        drop((reader, writer));
        (client_result, server.join().unwrap())
    }

    #[test]
    fn successful_handshake_exchanges_names() {
        let (client, server) = run(config("client"), config("server"));
        let client = client.unwrap();
        let server = server.unwrap();

        assert_eq!(client.remote_name, "server");
        assert_eq!(client.protocol_version, "1.0");
        assert_eq!(server.remote_name, "client");
    }

    #[test]
    fn client_authentication_with_matching_secret() {
        let client = HandshakeConfig {
            client_authenticator: secret("pw"),
            ..config("client")
        };
        let server = HandshakeConfig {
            client_authenticator: secret("pw"),
            ..config("server")
        };
        let (client, server) = run(client, server);
        assert!(client.is_ok());
        assert!(server.is_ok());
    }

    #[test]
    fn client_authentication_with_wrong_secret() {
        let client = HandshakeConfig {
            client_authenticator: secret("guess"),
            ..config("client")
        };
        let server = HandshakeConfig {
            client_authenticator: secret("pw"),
            ..config("server")
        };
        let (client, server) = run(client, server);
        assert!(matches!(client, Err(EndpointError::Authentication(_))));
        assert!(matches!(server, Err(EndpointError::Authentication(_))));
    }

    #[test]
    fn missing_client_credentials() {
        let server = HandshakeConfig {
            client_authenticator: secret("pw"),
            ..config("server")
        };
        let (client, server) = run(config("client"), server);
        assert!(matches!(
            client,
            Err(EndpointError::AuthenticationRequired(_))
        ));
        assert!(server.is_err());
    }

    #[test]
    fn server_authentication_with_wrong_secret() {
        let client = HandshakeConfig {
            server_authenticator: secret("pw"),
            ..config("client")
        };
        let server = HandshakeConfig {
            server_authenticator: secret("nope"),
            ..config("server")
        };
        let (client, server) = run(client, server);
        assert!(matches!(client, Err(EndpointError::Authentication(_))));
        assert!(matches!(server, Err(EndpointError::Authentication(_))));
    }

    #[test]
    fn missing_server_credentials() {
        let client = HandshakeConfig {
            server_authenticator: secret("pw"),
            ..config("client")
        };
        let (client, server) = run(client, config("server"));
        assert!(matches!(client, Err(EndpointError::Authentication(_))));
        assert!(matches!(
            server,
            Err(EndpointError::AuthenticationRequired(_))
        ));
    }

    #[test]
    fn wrong_protocol_name_rejected() {
        let client = HandshakeConfig {
            protocol_name: "foobar".to_string(),
            ..config("client")
        };
        let (client, server) = run(client, config("server"));
        assert!(matches!(client, Err(EndpointError::Handshake(_))));
        assert!(matches!(server, Err(EndpointError::Handshake(_))));
    }

    #[test]
    fn newer_minor_version_rejected() {
        let client = HandshakeConfig {
            protocol_version: "1.1".to_string(),
            ..config("client")
        };
        let (client, server) = run(client, config("server"));
        assert!(matches!(client, Err(EndpointError::Handshake(_))));
        assert!(matches!(server, Err(EndpointError::Handshake(_))));
    }

    #[test]
    fn older_minor_version_accepted() {
        let server = HandshakeConfig {
            protocol_version: "1.3".to_string(),
            ..config("server")
        };
        let (client, server) = run(config("client"), server);
        assert_eq!(client.unwrap().protocol_version, "1.3");
        assert_eq!(server.unwrap().protocol_version, "1.0");
    }

    #[test]
    fn blocked_endpoint_is_reported() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut server_writer = FrameWriter::new(left);
        reject_blocked(&mut server_writer, "busy-server").unwrap();

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let result = handshake_client(&mut reader, &mut writer, &config("client"));
        assert!(matches!(result, Err(EndpointError::EndpointBlocked(name)) if name == "busy-server"));
    }

    #[test]
    fn invalid_json_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw_writer = FrameWriter::new(left);
        raw_writer.send(MessageKind::Handshake, b"{not-json").unwrap();

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let result = handshake_server(&mut reader, &mut writer, &config("server"));
        assert!(matches!(result, Err(EndpointError::Handshake(_))));
    }

    #[test]
    fn non_handshake_frame_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw_writer = FrameWriter::new(left);
        raw_writer.send(MessageKind::Call, b"{}").unwrap();

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let result = handshake_server(&mut reader, &mut writer, &config("server"));
        assert!(matches!(result, Err(EndpointError::Handshake(_))));
    }

    #[test]
    fn closed_connection_fails_handshake() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(left);

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let result = handshake_server(&mut reader, &mut writer, &config("server"));
        assert!(matches!(result, Err(EndpointError::Handshake(_))));
    }

    #[test]
    fn handshake_timeout() {
        let mut reader = FrameReader::new(AlwaysTimedOutReader);
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = HandshakeConfig {
            timeout: Duration::from_millis(25),
            ..config("client")
        };

        let result = handshake_client(&mut reader, &mut writer, &cfg);
        assert!(matches!(result, Err(EndpointError::Timeout(_))));
    }

    #[test]
    fn version_compatibility() {
        assert!(is_version_compatible("1.0", "1.0").unwrap());
        assert!(is_version_compatible("1.0", "1.2").unwrap());
        assert!(!is_version_compatible("1.3", "1.2").unwrap());
        assert!(!is_version_compatible("2.0", "1.0").unwrap());
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.x").is_err());
        assert!(parse_version("1.0.0").is_err());
    }

    #[test]
    fn debug_output_redacts_responses() {
        let message = HandshakeMessage::AuthenticationResponse {
            response: "deadbeef".to_string(),
        };
        let debug = format!("{message:?}");
        assert!(debug.contains("<redacted:8 bytes>"));
        assert!(!debug.contains("deadbeef"));

        let cfg = HandshakeConfig {
            client_authenticator: secret("top-secret"),
            ..config("client")
        };
        assert!(!format!("{cfg:?}").contains("top-secret"));
    }

    struct AlwaysTimedOutReader;

    impl Read for AlwaysTimedOutReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }
    }
}
