use clap::Parser;
use synte_lib::cli::CliArgs;

fn main() {
    let args = CliArgs::parse();

    if let Err(e) = synte_lib::run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
