use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use xbridge_engine::{NegotiationPlan, ProvisionPlan, Supervisor, SupervisorConfig};
use xbridge_frame::{hex, Address64};
use xbridge_transport::Endpoint;

use crate::exit::{engine_error, CliError, CliResult, NOT_CONNECTED, USAGE};
use crate::output::OutputFormat;

pub mod at;
pub mod dialog;
pub mod discover;
pub mod monitor;
pub mod remote;
pub mod send;
pub mod version;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4001;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a local AT command in API mode.
    At(AtArgs),
    /// Run an AT command on a remote node.
    Remote(RemoteArgs),
    /// Send data to a node.
    Send(SendArgs),
    /// Run one command-mode (+++) dialog with the local module.
    Dialog(DialogArgs),
    /// Print received frames.
    Monitor(MonitorArgs),
    /// List neighbouring nodes (ATND).
    Discover,
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, gateway: &GatewayArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::At(args) => at::run(args, gateway, format),
        Command::Remote(args) => remote::run(args, gateway, format),
        Command::Send(args) => send::run(args, gateway, format),
        Command::Dialog(args) => dialog::run(args, gateway, format),
        Command::Monitor(args) => monitor::run(args, gateway, format),
        Command::Discover => discover::run(gateway, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the gateway is and how to bring the module up.
#[derive(Args, Debug, Default)]
pub struct GatewayArgs {
    /// Serial gateway host.
    #[arg(long, env = "XBRIDGE_HOST", global = true)]
    pub host: Option<String>,
    /// Serial gateway TCP port.
    #[arg(long, env = "XBRIDGE_PORT", global = true)]
    pub port: Option<u16>,
    /// Supervisor configuration (JSON).
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
    /// Module parameter checks to run after connecting (JSON).
    #[arg(long, value_name = "FILE", global = true)]
    pub provision: Option<PathBuf>,
    /// Skip the API mode check (module already in API mode 2).
    #[arg(long, global = true)]
    pub no_negotiate: bool,
    /// How long to wait for the module to become ready (e.g. 15s, 500ms).
    #[arg(long, default_value = "30s", global = true)]
    pub ready_timeout: String,
}

impl GatewayArgs {
    pub fn supervisor_config(&self) -> CliResult<SupervisorConfig> {
        let mut config = match &self.config {
            Some(path) => SupervisorConfig::load(path).map_err(|err| {
                engine_error(&format!("failed reading {}", path.display()), err)
            })?,
            None => SupervisorConfig::default(),
        };

        if self.host.is_some() || self.port.is_some() {
            let (host, port) = match &config.endpoint {
                Endpoint::Tcp { host, port } => (host.clone(), *port),
                Endpoint::Unix(_) => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
            };
            config.endpoint = Endpoint::tcp(
                self.host.clone().unwrap_or(host),
                self.port.unwrap_or(port),
            );
        }
        Ok(config)
    }

    /// Start a supervisor and wait until the module is usable.
    pub fn connect(&self) -> CliResult<Supervisor> {
        let ready_timeout = parse_duration(&self.ready_timeout)?;
        let config = self.supervisor_config()?;
        let endpoint = config.endpoint.to_string();

        let mut builder = Supervisor::builder(config);
        if self.no_negotiate {
            builder = builder.with_negotiation(NegotiationPlan::none());
        }
        if let Some(path) = &self.provision {
            let plan = ProvisionPlan::load(path).map_err(|err| {
                engine_error(&format!("failed reading {}", path.display()), err)
            })?;
            builder = builder.with_provisioner(plan);
        }

        let supervisor = builder
            .spawn()
            .map_err(|err| engine_error("supervisor start failed", err))?;
        supervisor.wait_ready(ready_timeout).map_err(|err| {
            CliError::new(
                NOT_CONNECTED,
                format!("module at {endpoint} not ready: {err}"),
            )
        })?;
        Ok(supervisor)
    }
}

#[derive(Args, Debug)]
pub struct AtArgs {
    /// Two-letter AT command, e.g. MY.
    pub command: String,
    /// Parameter value to set, as hex.
    #[arg(long, value_name = "HEX")]
    pub value: Option<String>,
}

#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// 64-bit address of the node, as 16 hex digits.
    pub address: Address64,
    /// Two-letter AT command, e.g. D0.
    pub command: String,
    /// Parameter value to set, as hex.
    #[arg(long, value_name = "HEX")]
    pub value: Option<String>,
    /// Do not request a response.
    #[arg(long)]
    pub no_ack: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// 64-bit address of the node, as 16 hex digits.
    pub address: Address64,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one frame back from the node and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct DialogArgs {
    /// Command text, e.g. ATVR. A trailing \r is added when missing.
    pub text: String,
    /// End of the reply. Accepts \r and \n escapes.
    #[arg(long, default_value = "\\r")]
    pub terminator: String,
    /// Do not send ATCN afterwards.
    #[arg(long)]
    pub skip_exit: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Only show frames from this node.
    #[arg(long)]
    pub address: Option<Address64>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// AT command bytes: the command letters followed by an optional hex value.
pub fn at_command_bytes(command: &str, value: Option<&str>) -> CliResult<Vec<u8>> {
    let mut bytes = command.trim().to_ascii_uppercase().into_bytes();
    if bytes.len() != 2 {
        return Err(CliError::new(
            USAGE,
            format!("AT command must be two letters, got {command:?}"),
        ));
    }
    if let Some(value) = value {
        let value = hex::decode(value)
            .ok_or_else(|| CliError::new(USAGE, format!("--value is not valid hex: {value}")))?;
        bytes.extend_from_slice(&value);
    }
    Ok(bytes)
}

/// Expand `\r`, `\n` and `\\` escapes typed on the command line.
pub fn expand_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
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

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
