use satchel::config::SatchelConfig;
use satchel::platform::{PlatformClient, SignInOptions};
use satchel::sync::DataSyncManager;

#[tokio::main]
async fn main() {
    systemd_journal_logger::JournalLog::new()
        .unwrap()
        .with_syslog_identifier("satchel-sync-check".to_string())
        .install()
        .unwrap();
    log::set_max_level(log::LevelFilter::Info);

    let config = SatchelConfig::load();
    satchel::set_debug_logging(config.debug_logging);

    println!("=== Cloud vs Local Comparison ===\n");
    println!("Data directory: {}", config.data_directory.display());
    println!("Platform: {}\n", config.platform_url);

    let platform = PlatformClient::detect(&config);
    if !platform.is_available() {
        println!("Platform unavailable (no token configured). Nothing to check.");
        return;
    }

    match platform.sign_in(&SignInOptions::default()).await {
        Ok(Some(user)) => println!("Signed in as: {}", user.display_name),
        Ok(None) => {
            println!("Not signed in.");
            return;
        }
        Err(e) => {
            println!("Sign-in failed: {}", e);
            return;
        }
    }

    let manager = DataSyncManager::new(platform);
    if !manager.initialize().await {
        println!("Sync manager failed to initialize.");
        return;
    }

    match manager.sync_from_cloud().await {
        Ok(snapshot) => {
            println!("\n--- Remote state ---");
            println!("  Sessions:       {}", snapshot.sessions.len());
            println!("  Folders:        {}", snapshot.folders.len());
            println!(
                "  Decks:          {} hot, {} cold",
                snapshot.flashcards.decks.len(),
                snapshot.flashcards.cold_deck_ids.len()
            );
            println!("  Planner blocks: {}", snapshot.planner_blocks.len());
        }
        Err(e) => println!("Pull failed: {}", e),
    }

    let status = manager.get_sync_status();
    println!("\n--- Sync status ---");
    println!("  Online:          {}", status.is_online);
    println!(
        "  Last sync:       {}",
        status
            .last_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Pending changes: {}", status.pending_changes);
    if let Some(err) = &status.error {
        println!("  Error:           {}", err);
    }
}
