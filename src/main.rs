fn main() {
    if let Err(err) = cgraomp::driver::run_driver() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
