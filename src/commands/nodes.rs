use anyhow::{Context, Result};

use pifleet::config::Config;
use pifleet::storage::open_repository;

/// Print the durable node registry
pub fn nodes(config: Config, json: bool) -> Result<()> {
    let repo = open_repository(&config.storage).with_context(|| {
        format!(
            "Failed to open node registry at {}",
            config.storage.sqlite_path.display()
        )
    })?;
    let records = repo.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No nodes registered");
        return Ok(());
    }

    println!(
        "{:<28} {:<16} {:<12} {:<7} {:<8} LAST SEEN",
        "NAME", "IP", "STATUS", "ROLE", "ARCH"
    );
    for record in &records {
        println!(
            "{:<28} {:<16} {:<12} {:<7} {:<8} {}",
            record.name,
            record.ip,
            record.status,
            record.role,
            record.architecture,
            record.last_seen.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!("\n{} node(s)", records.len());
    Ok(())
}
