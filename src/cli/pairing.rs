//! CLI pairing handlers: pair, status, unpair.

use std::time::Duration;

use crate::auth::{PairingClient, PairingOutcome};
use crate::config::ClawPilotConfig;

/// Handle `clawpilot pair`.
pub async fn handle_pair(
    mut config: ClawPilotConfig,
    timeout_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(secs) = timeout_secs {
        config.pairing_max_wait = Some(Duration::from_secs(secs));
    }
    let client = PairingClient::new(&config)?;

    let outcome = client
        .pair(|session| {
            println!("🔗 Pairing requested with {}", config.gateway_url);
            if let Some(code) = session.pairing_code.as_deref() {
                println!("📋 Pairing code: {code}");
            }
            println!("⏳ Waiting for approval on the gateway...");
        })
        .await?;

    match outcome {
        PairingOutcome::AlreadyPaired(_) => println!("✅ Already paired"),
        PairingOutcome::Approved(_) => println!("✅ Pairing approved"),
        PairingOutcome::NotRequired => println!("✅ Gateway does not require pairing"),
    }
    Ok(())
}

/// Handle `clawpilot status`.
pub async fn handle_status(config: ClawPilotConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = PairingClient::new(&config)?;

    println!("🔐 Pairing Status\n");
    println!("  Gateway: {}", config.gateway_url);
    match client.stored_token() {
        Ok(Some(token)) if token.paired_at.is_none() => {
            println!("  Device: ⏳ Pairing pending (run `clawpilot pair` to resume)");
        }
        Ok(Some(token)) => {
            let since = token
                .paired_at
                .map(|at| format!(" (since {})", at.format("%Y-%m-%d %H:%M")))
                .unwrap_or_default();
            println!("  Device: ✅ Paired{since}");
        }
        Ok(None) => println!("  Device: ❌ Not paired"),
        Err(e) => println!("  Device: ⚠️  Error: {e}"),
    }

    println!("\n📌 Environment Variables:");
    for key in [
        "CLAWPILOT_GATEWAY_URL",
        "CLAWPILOT_GATEWAY_WS_URL",
        "CLAWPILOT_DEVICE_TOKEN",
    ] {
        let status = if std::env::var(key).is_ok() {
            "✅ Set"
        } else {
            "❌ Not set"
        };
        println!("  {key}: {status}");
    }
    Ok(())
}

/// Handle `clawpilot unpair`.
pub async fn handle_unpair(config: ClawPilotConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = PairingClient::new(&config)?;
    client.unpair()?;
    println!("✅ Device token removed");
    Ok(())
}
