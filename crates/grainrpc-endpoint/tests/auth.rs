mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_settings, wait_until};
use grainrpc_endpoint::{
    Authenticator, Endpoint, EndpointAddr, EndpointError, SharedSecretAuthenticator,
};

#[derive(Clone, Copy, Debug)]
enum Mode {
    None,
    ClientOnly,
    ServerOnly,
    Both,
}

impl Mode {
    fn client_auth(self) -> bool {
        matches!(self, Mode::ClientOnly | Mode::Both)
    }

    fn server_auth(self) -> bool {
        matches!(self, Mode::ServerOnly | Mode::Both)
    }
}

fn secret(value: &str) -> Arc<dyn Authenticator> {
    Arc::new(SharedSecretAuthenticator::new(value))
}

/// Both sides of an attempt run the same checks, each with its own secret.
fn build(name: &str, mode: Mode, value: &str) -> Endpoint {
    let mut builder = Endpoint::builder(name).with_settings(fast_settings());
    if mode.client_auth() {
        builder = builder.with_client_authenticator(secret(value));
    }
    if mode.server_auth() {
        builder = builder.with_server_authenticator(secret(value));
    }
    builder.build().expect("endpoint should build")
}

fn attempt(mode: Mode, client_secret: &str) -> (Result<(), EndpointError>, Endpoint, Endpoint) {
    let server = build("server", mode, "open sesame");
    let addr = server
        .bind(&EndpointAddr::loopback(0))
        .expect("server should bind");
    let client = build("client", mode, client_secret);
    let result = client.connect(&addr).map(|_| ());
    (result, server, client)
}

#[test]
fn matching_credentials_connect_in_every_mode() {
    for mode in [Mode::None, Mode::ClientOnly, Mode::ServerOnly, Mode::Both] {
        let (result, server, client) = attempt(mode, "open sesame");
        assert!(result.is_ok(), "{mode:?}: {result:?}");
        assert!(client.is_connected(), "{mode:?}");
        assert!(
            wait_until(Duration::from_secs(5), || server.is_connected()),
            "{mode:?}"
        );
    }
}

#[test]
fn wrong_credentials_fail_whenever_a_check_runs() {
    for mode in [Mode::None, Mode::ClientOnly, Mode::ServerOnly, Mode::Both] {
        let (result, server, client) = attempt(mode, "wrong");
        match mode {
            Mode::None => assert!(result.is_ok(), "{mode:?}: {result:?}"),
            _ => {
                assert!(
                    matches!(result, Err(EndpointError::Authentication(_))),
                    "{mode:?}: {result:?}"
                );
                assert!(!client.is_connected(), "{mode:?}");
                std::thread::sleep(Duration::from_millis(50));
                assert!(!server.is_connected(), "{mode:?}");
            }
        }
    }
}

#[test]
fn missing_credentials_are_reported_as_required() {
    let server = build("server", Mode::ClientOnly, "open sesame");
    let addr = server
        .bind(&EndpointAddr::loopback(0))
        .expect("server should bind");
    let client = build("client", Mode::None, "");
    let err = client
        .connect(&addr)
        .expect_err("server demands credentials");
    assert!(matches!(err, EndpointError::AuthenticationRequired(_)), "{err:?}");

    let server = build("server", Mode::None, "");
    let addr = server
        .bind(&EndpointAddr::loopback(0))
        .expect("server should bind");
    let client = build("client", Mode::ServerOnly, "open sesame");
    let err = client
        .connect(&addr)
        .expect_err("server cannot prove itself");
    assert!(matches!(err, EndpointError::Authentication(_)), "{err:?}");
    assert!(!client.is_connected());
}

#[test]
fn failed_attempt_leaves_endpoints_reusable() {
    let server = build("server", Mode::ClientOnly, "open sesame");
    let addr = server
        .bind(&EndpointAddr::loopback(0))
        .expect("server should bind");

    let intruder = build("intruder", Mode::ClientOnly, "guess");
    assert!(intruder.connect(&addr).is_err());
    let id = {
        let client = build("client", Mode::ClientOnly, "open sesame");
        client.connect(&addr).expect("connect should succeed")
    };
    assert_eq!(id.get(), 1);
}

#[test]
fn authenticator_debug_redacts_the_secret() {
    let rendered = format!("{:?}", SharedSecretAuthenticator::new("hunter2"));
    assert!(!rendered.contains("hunter2"));
}
