use clap::Parser;
use tlsync_cli::cli_args::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = tlsync_cli::run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
