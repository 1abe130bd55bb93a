use std::fs;

use crate::cmd::{parse_duration, GatewayArgs, SendArgs};
use crate::exit::{engine_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, gateway: &GatewayArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    let supervisor = gateway.connect()?;

    supervisor
        .send_data(args.address, &payload)
        .map_err(|err| engine_error("send failed", err))?;

    if args.wait {
        let frame = supervisor
            .recv_from_address(args.address, wait_timeout)
            .map_err(|err| engine_error("receive failed", err))?;
        print_frame(&frame, format);
    }

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let payload = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        Vec::new()
    };
    if payload.is_empty() {
        return Err(CliError::new(USAGE, "payload must not be empty"));
    }
    Ok(payload)
}
