fn main() -> std::process::ExitCode {
    datagenie_lib::run()
}
