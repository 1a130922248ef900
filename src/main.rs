fn main() {
    let code = was::run(std::env::args());
    std::process::exit(code);
}
