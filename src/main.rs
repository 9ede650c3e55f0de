#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use dss_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.server.interfaces.is_empty() {
        log::warn!("no interfaces are bound, the service would accept no connections — exiting");
        return Ok(());
    }

    dss_server::startup(config).await
}
