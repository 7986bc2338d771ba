fn main() {
    if let Err(err) = solar_insights::app::run_service() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
