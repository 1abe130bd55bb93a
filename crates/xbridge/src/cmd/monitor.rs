use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use xbridge_engine::EngineError;

use crate::cmd::{GatewayArgs, MonitorArgs};
use crate::exit::{engine_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, OutputFormat};

/// How often the loop checks for Ctrl-C while no frames arrive.
const TICK: Duration = Duration::from_millis(250);

pub fn run(args: MonitorArgs, gateway: &GatewayArgs, format: OutputFormat) -> CliResult<i32> {
    let supervisor = gateway.connect()?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let received = match args.address {
            Some(address) => supervisor.recv_from_address(address, TICK),
            None => supervisor.recv_any(TICK),
        };
        let frame = match received {
            Ok(frame) => frame,
            Err(EngineError::Timeout(_)) => continue,
            // Reconnecting: keep waiting.
            Err(EngineError::NotConnected) => {
                let _ = supervisor.wait_ready(TICK);
                continue;
            }
            Err(err) => return Err(engine_error("receive failed", err)),
        };

        print_frame(&frame, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                return Ok(SUCCESS);
            }
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
