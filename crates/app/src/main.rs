use clap::Parser;

mod capture;
mod cli;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = cli::CliArgs::parse();
    cli::handle_commands(args)
}
