//! Minimal CLI parsing for one-shot commands.

use std::env;

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    /// Run the scheduler until interrupted
    #[default]
    Serve,
    /// Run a single scan and exit
    Once,
    Approve(String),
    Decline(String),
    Help,
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub command: Command,
}

pub const USAGE: &str = "\
Usage: upgrade-scout [--once | --approve <id> | --decline <id>]

  --once            run a single scan and exit
  --approve <id>    approve a pending download request
  --decline <id>    decline a pending download request
  -h, --help        show this help";

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--once" => options.command = Command::Once,
                "-h" | "--help" => options.command = Command::Help,
                "--approve" | "--decline" => match args.next() {
                    Some(id) => options.command = request_command(&arg, id),
                    None => options.command = Command::Help,
                },
                _ if arg.starts_with("--approve=") || arg.starts_with("--decline=") => {
                    if let Some((flag, id)) = arg.split_once('=') {
                        options.command = request_command(flag, id.to_string());
                    }
                }
                _ => {}
            }
        }
        options
    }
}

fn request_command(flag: &str, id: String) -> Command {
    if flag == "--approve" {
        Command::Approve(id)
    } else {
        Command::Decline(id)
    }
}
