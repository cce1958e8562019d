use aotserver::cli::{CLI, Subcommand};
use clap::Parser;

fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();
    command.unwrap_or(Subcommand::Serve).run(&opts)
}
