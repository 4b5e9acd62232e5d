use anyhow::{Context, Result};

use pifleet::announce::Beacon;
use pifleet::config::Config;

/// Announce this node until ctrl-c
pub async fn announce(mut config: Config, name: Option<String>, port: Option<u16>) -> Result<()> {
    if name.is_some() {
        config.announce.instance_name = name;
    }
    if let Some(port) = port {
        config.announce.port = port;
    }
    config.validate()?;

    super::init_metrics();

    let beacon = Beacon::new(&config.announce, &config.discovery);
    let announcement = beacon.announcement().clone();
    let handle = beacon.start()?;

    println!("Announcing {}", handle.fullname());
    println!("  Host: {}:{}", announcement.hostname, announcement.port);
    for (key, value) in &announcement.properties {
        println!("  {key}={value}");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    handle.stop().await?;
    Ok(())
}
