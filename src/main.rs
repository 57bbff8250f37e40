fn main() -> std::process::ExitCode {
    docchat_lib::run()
}
