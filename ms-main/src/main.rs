use std::{env, process, str::FromStr};

use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

use ms_common::{config::task_config::TaskConfig, log_error, log_info};
use ms_task::task_runner::TaskRunner;

const ENV_LOG_LEVEL: &str = "MEILISYNC_LOG_LEVEL";

#[tokio::main]
async fn main() {
    env::set_var("RUST_BACKTRACE", "1");
    init_logger();

    let config_location = TaskConfig::location_from_env();
    log_info!("loading config from {}", config_location);

    let runner = match TaskRunner::new(&config_location) {
        Ok(runner) => runner,
        Err(e) => {
            log_error!("invalid configuration: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runner.start_task().await {
        log_error!("sync task failed: {:#}", e);
        process::exit(1);
    }
}

fn init_logger() {
    let level = env::var(ENV_LOG_LEVEL)
        .ok()
        .and_then(|value| LevelFilter::from_str(&value).ok())
        .unwrap_or(LevelFilter::Info);

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} [{t}] {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .expect("failed to build logger config");
    log4rs::init_config(config).expect("failed to init logger");
}
