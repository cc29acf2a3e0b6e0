use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use grainrpc::echo::{Echo, EchoServant};

use crate::cmd::{build_endpoint, load_settings, parse_addr, GlobalOptions, ServeArgs};
use crate::exit::{endpoint_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_report, ListeningReport, OutputFormat};

pub fn run(args: ServeArgs, global: &GlobalOptions, format: OutputFormat) -> CliResult<i32> {
    let addr = parse_addr(&args.addr)?;
    let settings = load_settings(global)?;
    let endpoint = build_endpoint(&args.name, settings, args.secret.as_deref())?;
    endpoint
        .create_servant::<dyn Echo>(args.grain, Arc::new(EchoServant::default()))
        .map_err(|err| endpoint_error("failed to register echo grain", err))?;
    let bound = endpoint
        .bind(&addr)
        .map_err(|err| endpoint_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    print_report(
        &ListeningReport {
            event: "listening",
            name: args.name,
            addr: bound.to_string(),
            grain: args.grain,
            authentication: args.secret.is_some(),
        },
        format,
    );
    let _ = std::io::stdout().flush();

    let mut peer = None;
    while running.load(Ordering::SeqCst) {
        let current = endpoint.remote_name();
        if current != peer {
            match &current {
                Some(name) => tracing::info!(peer = %name, "peer connected"),
                None => tracing::info!("peer gone, waiting for the next one"),
            }
            peer = current;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("shutting down");
    endpoint.dispose();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
