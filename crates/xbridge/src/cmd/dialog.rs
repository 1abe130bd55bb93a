use crate::cmd::{expand_escapes, DialogArgs, GatewayArgs};
use crate::exit::{engine_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: DialogArgs, gateway: &GatewayArgs, format: OutputFormat) -> CliResult<i32> {
    let mut text = expand_escapes(&args.text);
    if !text.ends_with('\r') {
        text.push('\r');
    }
    let terminator = expand_escapes(&args.terminator);
    if terminator.is_empty() {
        return Err(CliError::new(USAGE, "--terminator must not be empty"));
    }

    let supervisor = gateway.connect()?;
    let reply = supervisor
        .transparent_at_dialog(text.as_bytes(), terminator.as_bytes(), args.skip_exit)
        .map_err(|err| engine_error("dialog failed", err))?;
    print_reply(text.trim_end(), &reply, format);
    Ok(SUCCESS)
}
