use clap::Parser;

fn main() {
    let cli = livecastd::Cli::parse();
    if let Err(err) = livecastd::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
