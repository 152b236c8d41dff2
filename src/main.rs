#[tokio::main]
async fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = reelbook::cli::Args::parse();
    let level = reelbook::logging::default_level(args.quiet, args.verbose);
    if let Err(e) = reelbook::logging::init(level) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    if let Err(e) = reelbook::cli::run(&args).await {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
