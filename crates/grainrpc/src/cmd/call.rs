use std::time::Instant;

use grainrpc::echo::Echo;

use crate::cmd::{
    build_endpoint, load_settings, parse_addr, parse_duration, CallArgs, GlobalOptions,
};
use crate::exit::{endpoint_error, rpc_error, CliResult, SUCCESS};
use crate::output::{millis, print_report, CallReport, OutputFormat};

pub fn run(args: CallArgs, global: &GlobalOptions, format: OutputFormat) -> CliResult<i32> {
    let addr = parse_addr(&args.addr)?;
    let timeout = parse_duration(&args.timeout)?;
    let settings = load_settings(global)?;
    let endpoint = build_endpoint("grainrpc-call", settings, args.secret.as_deref())?;

    let connection_id = endpoint
        .connect_timeout(&addr, timeout)
        .map_err(|err| endpoint_error("connect failed", err))?;
    let echo = endpoint
        .create_proxy::<dyn Echo>(args.grain)
        .map_err(|err| endpoint_error("failed to create proxy", err))?;

    let started = Instant::now();
    let response = echo
        .echo(args.message.clone())
        .map_err(|err| rpc_error("echo failed", err))?;
    let elapsed = started.elapsed();

    endpoint.disconnect();
    print_report(
        &CallReport {
            connection_id: connection_id.get(),
            grain: args.grain,
            request: args.message,
            response,
            elapsed_ms: millis(elapsed),
        },
        format,
    );
    Ok(SUCCESS)
}
