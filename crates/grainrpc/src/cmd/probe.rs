use std::time::{Duration, Instant};

use crate::cmd::{
    build_endpoint, load_settings, parse_addr, parse_duration, GlobalOptions, ProbeArgs,
};
use crate::exit::{endpoint_error, CliResult, SUCCESS};
use crate::output::{millis, print_report, OutputFormat, ProbeReport};

pub fn run(args: ProbeArgs, global: &GlobalOptions, format: OutputFormat) -> CliResult<i32> {
    let addr = parse_addr(&args.addr)?;
    let timeout = parse_duration(&args.timeout)?;
    let sample_for = parse_duration(&args.sample_for)?;

    // Sample often enough to fill a few measurements into the window.
    let interval = (sample_for / 4).max(Duration::from_millis(1));
    let mut settings = load_settings(global)?;
    settings.latency = settings
        .latency
        .with_measurements(true)
        .with_interval(interval);
    let endpoint = build_endpoint("grainrpc-probe", settings, args.secret.as_deref())?;

    let connection_id = endpoint
        .connect_timeout(&addr, timeout)
        .map_err(|err| endpoint_error("connect failed", err))?;

    let deadline = Instant::now() + sample_for;
    while Instant::now() < deadline && endpoint.is_connected() {
        std::thread::sleep(Duration::from_millis(10));
    }
    if endpoint.roundtrip_time().is_zero() {
        tracing::warn!(window = ?sample_for, "no roundtrip sample collected");
    }

    let report = ProbeReport {
        connected: endpoint.is_connected(),
        connection_id: connection_id.get(),
        local_addr: endpoint.local_addr().map(|addr| addr.to_string()),
        remote_addr: endpoint.remote_addr().map(|addr| addr.to_string()),
        remote_name: endpoint.remote_name(),
        roundtrip_ms: millis(endpoint.roundtrip_time()),
        statistics: endpoint.statistics(),
    };
    endpoint.disconnect();
    print_report(&report, format);
    Ok(SUCCESS)
}
