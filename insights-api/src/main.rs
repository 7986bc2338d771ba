fn main() {
    if let Err(err) = solar_insights::app::run() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
