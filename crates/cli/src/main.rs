use clap::Parser;
use imgview::Cli;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(error) = imgview::run(cli) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}
