use anyhow::{anyhow, Result};
use colored::Colorize;
use notewright_llm::LogTelemetrySink;
use std::sync::Arc;

use crate::config::NotewrightConfig;

use super::commands::build_manager;

pub async fn handle_test_connection(config: &NotewrightConfig, force: bool) -> Result<()> {
    let manager = build_manager(config, Arc::new(LogTelemetrySink));
    let kind = manager.active_kind();
    println!("Testing {} ...", kind.display_name());

    let result = manager.test_connection(force).await;
    let state = manager.connection_state();
    let checked = state
        .last_check_time
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string());

    if result.success {
        println!("{} {}", "✓".green(), result.message);
        if let Some(checked) = checked {
            println!("  last checked {}", checked.dimmed());
        }
        Ok(())
    } else {
        println!("{} {}", "✗".red(), result.message);
        Err(anyhow!("Connection test failed for {}", kind.display_name()))
    }
}
