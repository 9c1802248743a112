use std::sync::Arc;

use tinyhttpd::config::ServerConfig;
use tinyhttpd::error::Result;
use tinyhttpd::pool::DbPool;
use tinyhttpd::reactor::Reactor;
use weblog::{errors, info, Logger};

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Arc::new(ServerConfig::load(&config_path)?);

    let logger = if config.logging_on {
        Logger::init(config.log_level(), "./webserver_log", ".log", Some(config.log_queue_size))?
    } else {
        Logger::init(config.log_level(), "./webserver_log", ".log", None)?
    };

    info!(logger, "================= Server init start! =================");
    info!(logger, "Resource Dir: {}", config.src_dir);
    info!(
        logger,
        "db pool num: {}, thread pool num: {}", config.db_pool_size, config.worker_count
    );

    let db_pool = match DbPool::new(
        &config.db_host,
        config.db_port,
        &config.db_user,
        &config.db_password,
        &config.db_name,
        config.db_pool_size,
    ) {
        Ok(pool) => Some(Arc::new(pool)),
        Err(e) => {
            errors!(logger, "database pool init failed, serving static files only: {e}");
            None
        }
    };

    let reactor = Reactor::new(config, logger.clone(), db_pool);
    info!(logger, "=============== Server start =================");
    let result = reactor.run();
    logger.shutdown();
    result
}
