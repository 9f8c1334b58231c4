use std::env;

use sync_client::{SyncClient, SyncConfig, SyncUpdate};
use tracing::info;

mod logging;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Bad configuration: {err}");
            eprintln!("Required: MATRIX_SYNC_HOMESERVER and MATRIX_SYNC_ACCESS_TOKEN");
            std::process::exit(1);
        }
    };

    let resume_token = env::var("MATRIX_SYNC_SINCE")
        .ok()
        .filter(|v| !v.trim().is_empty());

    let client = match SyncClient::new(config) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Failed to build sync client: {err}");
            std::process::exit(1);
        }
    };

    let mut subscription = client.subscribe();
    if let Err(err) = client.start(resume_token).await {
        eprintln!("Failed to start sync loop: {err}");
        std::process::exit(1);
    }
    info!("sync loop running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            update = subscription.recv() => {
                match update {
                    Some(SyncUpdate::Timeline(event)) => {
                        println!(
                            "[{}] {} <{}> {}",
                            event.room_id, event.event_type, event.sender, event.content
                        );
                    }
                    Some(SyncUpdate::Membership(transition)) => {
                        let name = transition.room_name.as_deref().unwrap_or("unnamed");
                        println!(
                            "[{}] membership {:?} -> {:?} ({name})",
                            transition.room_id, transition.old, transition.new
                        );
                    }
                    Some(SyncUpdate::Ephemeral(event)) => {
                        println!("[{}] ephemeral {}", event.room_id, event.event_type);
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(err) = client.fatal_error() {
        eprintln!("Sync loop died: {err}");
        std::process::exit(1);
    }

    if let Err(err) = client.stop().await {
        eprintln!("Failed to stop sync loop: {err}");
        std::process::exit(1);
    }

    if let Some(since) = client.cursor_state().since {
        println!("Resume later with MATRIX_SYNC_SINCE={since}");
    }
    if client.dropped_updates() > 0 {
        eprintln!("Warning: {} updates dropped on full queues", client.dropped_updates());
    }
}
