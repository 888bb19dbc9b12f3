//! Binary entry point for the `flexvol` driver.
//!
//! Every call prints exactly one JSON envelope to stdout and exits `0` on
//! success, `1` otherwise.

use std::env;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use clap::error::ErrorKind;

use flexvol::plugin::{self, Invocation, VolumeResult};

mod cli;

use cli::{Cli, DriverCall};

const DEFAULT_PROGRAM: &str = "flexvol";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let code = i32::from(err.print().is_err());
            process::exit(code);
        }
        Err(err) => emit(&VolumeResult::failure(parse_failure(&err))),
    };

    if cli.test {
        return;
    }

    let result = plugin::run(invocation(cli.call)).await;
    emit(&result);
}

fn invocation(call: Option<DriverCall>) -> Invocation {
    let Some(driver_call) = call else {
        return Invocation::Usage {
            program: program_name(),
        };
    };
    match driver_call {
        DriverCall::Init => Invocation::Init,
        DriverCall::Attach { options, node } => Invocation::Attach { options, node },
        DriverCall::Detach { device, node } => Invocation::Detach { device, node },
        DriverCall::MountDevice {
            mount_path,
            device,
            options,
        } => Invocation::MountDevice {
            mount_path,
            device,
            options,
        },
        DriverCall::UnmountDevice { mount_path } => Invocation::UnmountDevice { mount_path },
        DriverCall::WaitForAttach { device, options } => {
            Invocation::WaitForAttach { device, options }
        }
        DriverCall::GetVolumeName { options } => Invocation::GetVolumeName { options },
        DriverCall::IsAttached { options, node } => Invocation::IsAttached { options, node },
        DriverCall::Unsupported(args) => {
            Invocation::Unsupported(args.into_iter().next().unwrap_or_default())
        }
    }
}

fn program_name() -> String {
    env::args_os().next().map_or_else(
        || DEFAULT_PROGRAM.to_owned(),
        |arg| arg.to_string_lossy().into_owned(),
    )
}

fn parse_failure(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .map_or_else(|| err.kind().to_string(), |line| {
            line.trim_start_matches("error: ").trim().to_owned()
        })
}

fn emit(result: &VolumeResult) -> ! {
    let mut stdout = io::stdout().lock();
    let written = write!(stdout, "{}", result.to_json()).and_then(|()| stdout.flush());
    let code = if written.is_ok() {
        result.exit_code()
    } else {
        1
    };
    process::exit(code);
}
