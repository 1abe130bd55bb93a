use crate::cmd::GatewayArgs;
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(gateway: &GatewayArgs, format: OutputFormat) -> CliResult<i32> {
    let supervisor = gateway.connect()?;
    let reply = supervisor
        .discover_nodes()
        .map_err(|err| engine_error("node discovery failed", err))?;
    print_reply("ATND", &reply, format);
    Ok(SUCCESS)
}
