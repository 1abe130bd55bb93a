use crate::cmd::{at_command_bytes, AtArgs, GatewayArgs};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{print_value, OutputFormat};

pub fn run(args: AtArgs, gateway: &GatewayArgs, format: OutputFormat) -> CliResult<i32> {
    let command = at_command_bytes(&args.command, args.value.as_deref())?;
    let supervisor = gateway.connect()?;

    let value = supervisor
        .local_at_query(&command)
        .map_err(|err| engine_error("AT command failed", err))?;
    print_value(&args.command.to_ascii_uppercase(), "local", &value, format);
    Ok(SUCCESS)
}
