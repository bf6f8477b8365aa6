use std::process::ExitCode;

use vk_baby_steps::{AppConfig, Application};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut app = match Application::new(AppConfig::default()) {
        Ok(app) => app,
        Err(err) => {
            log::error!("startup failed");
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    app.run();
    ExitCode::SUCCESS
}
