use anyhow::Result;
use std::time::Duration;

use pifleet::config::{Config, DiscoveryMethod};
use pifleet::discovery::{DiscoveryService, ObservedNode};

/// Run one discovery cycle and print the visible nodes
pub async fn scan(
    mut config: Config,
    method: Option<DiscoveryMethod>,
    interface: Option<String>,
    wait: u64,
    json: bool,
) -> Result<()> {
    if let Some(method) = method {
        config.discovery.method = method;
    }
    if interface.is_some() {
        config.discovery.interface = interface;
    }

    let service = DiscoveryService::from_config(config.discovery)?;

    // passive listening needs time to collect announcements
    if service.config().method == DiscoveryMethod::Broadcast && wait > 0 {
        tokio::time::sleep(Duration::from_secs(wait)).await;
    }

    service.run_cycle_once().await;
    let mut nodes: Vec<ObservedNode> = service
        .members()
        .await
        .into_iter()
        .map(|entry| entry.node)
        .collect();
    nodes.sort_by(|a, b| a.ip.cmp(&b.ip));
    let backend = service.backend_name();
    service.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    if nodes.is_empty() {
        println!("No nodes found");
        return Ok(());
    }

    println!(
        "{:<28} {:<16} {:>5}  {:<8} MODEL",
        "NAME", "IP", "PORT", "ARCH"
    );
    for node in &nodes {
        println!(
            "{:<28} {:<16} {:>5}  {:<8} {}",
            node.display_name().unwrap_or("-"),
            node.ip,
            node.port,
            node.architecture().unwrap_or("-"),
            node.model().unwrap_or("-"),
        );
    }
    println!("\n{} node(s) via {backend}", nodes.len());
    Ok(())
}
