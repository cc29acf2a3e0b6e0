use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use grainrpc_endpoint::{Endpoint, EndpointSettings, SharedSecretAuthenticator};
use grainrpc_transport::EndpointAddr;

use crate::exit::{endpoint_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod probe;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host an echo grain until interrupted.
    Serve(ServeArgs),
    /// Call the echo grain of a running server once.
    Call(CallArgs),
    /// Connect, measure the roundtrip time and print connection details.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, global: &GlobalOptions, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, global, format),
        Command::Call(args) => call::run(args, global, format),
        Command::Probe(args) => probe::run(args, global, format),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every command that creates an endpoint.
#[derive(Debug, Default)]
pub struct GlobalOptions {
    pub settings: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (tcp://host:port, unix:///path, or host:port).
    pub addr: String,
    /// Grain id of the echo servant.
    #[arg(long, default_value_t = grainrpc::echo::DEFAULT_ECHO_GRAIN)]
    pub grain: u64,
    /// Require clients to prove knowledge of this secret.
    #[arg(long, env = "GRAINRPC_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Endpoint name announced during the handshake.
    #[arg(long, default_value = "grainrpc-serve")]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Address of the server.
    pub addr: String,
    /// Grain id of the echo servant.
    #[arg(long, default_value_t = grainrpc::echo::DEFAULT_ECHO_GRAIN)]
    pub grain: u64,
    /// Message to echo.
    #[arg(long, short = 'm')]
    pub message: String,
    /// Secret used to answer the server's challenge.
    #[arg(long, env = "GRAINRPC_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Address of the server.
    pub addr: String,
    /// Secret used to answer the server's challenge.
    #[arg(long, env = "GRAINRPC_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// How long to collect latency samples before reporting.
    #[arg(long, default_value = "500ms")]
    pub sample_for: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_addr(input: &str) -> CliResult<EndpointAddr> {
    input
        .parse()
        .map_err(|err| transport_error("invalid address", err))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

pub fn load_settings(global: &GlobalOptions) -> CliResult<EndpointSettings> {
    match &global.settings {
        Some(path) => EndpointSettings::from_json_file(path)
            .map_err(|err| endpoint_error("failed to load settings", err)),
        None => Ok(EndpointSettings::default()),
    }
}

/// Builds an endpoint that answers the peer's challenge with `secret`
/// when one is given.
pub fn build_endpoint(
    name: &str,
    settings: EndpointSettings,
    secret: Option<&str>,
) -> CliResult<Endpoint> {
    let mut builder = Endpoint::builder(name).with_settings(settings);
    if let Some(secret) = secret {
        builder =
            builder.with_client_authenticator(Arc::new(SharedSecretAuthenticator::new(secret)));
    }
    builder
        .build()
        .map_err(|err| endpoint_error("failed to create endpoint", err))
}
