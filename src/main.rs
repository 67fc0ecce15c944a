fn main() {
    vcdelta::cli::run();
}
