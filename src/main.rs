fn main() {
    // A .env next to the invocation is a convenience, not a requirement.
    dotenvy::dotenv().ok();
    solo::logging::init();

    if let Err(err) = solo::cli::run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}
