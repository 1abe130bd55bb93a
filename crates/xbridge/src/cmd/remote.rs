use crate::cmd::{at_command_bytes, GatewayArgs, RemoteArgs};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{print_value, OutputFormat};

pub fn run(args: RemoteArgs, gateway: &GatewayArgs, format: OutputFormat) -> CliResult<i32> {
    let command = at_command_bytes(&args.command, args.value.as_deref())?;
    let supervisor = gateway.connect()?;

    let reply = supervisor
        .remote_at_query(args.address, &command, !args.no_ack)
        .map_err(|err| engine_error("remote AT command failed", err))?;
    if let Some(value) = reply {
        print_value(
            &args.command.to_ascii_uppercase(),
            &args.address.to_string(),
            &value,
            format,
        );
    }
    Ok(SUCCESS)
}
