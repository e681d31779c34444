use clap::Parser;

use snapvault::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::install_tracing(cli.verbose);

    let code = cli::run(cli)?;
    std::process::exit(code);
}
