pub mod adapters;
pub mod core;
pub mod runtime;

pub fn run() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    runtime::cli::run()
}
