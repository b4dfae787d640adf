//! Bulk lookups, the raw JSON tier, and the blocked server list.

use mojang_metadata::{MojangApi, NameHistory};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let api = MojangApi::new("AdvancedDemo")
        .with_executor(tokio::runtime::Handle::current())
        .with_max_parallel(4);

    let names = ["Notch", "jeb_", "Dinnerbone", "this_name_is_free_"];
    println!("Resolving {} names...", names.len());
    for (name, result) in api.unique_ids(names, Some(Duration::from_secs(3))).await {
        match result {
            Ok(lookup) => println!("{:<20} {}", name, lookup),
            Err(e) => println!("{:<20} failed ({})", name, e),
        }
    }

    // Raw tier: read fields the typed result does not expose
    let profile = api.unique_id_json("jeb_", None).await?;
    println!("\nRaw profile document: {}", profile);

    let uuid = api.unique_id("jeb_", None).await?.unique_id();
    match api.name_history(uuid, None).await {
        Ok(history) => {
            for (name, changed) in history.names() {
                if *changed == NameHistory::ORIGINAL {
                    println!("{} (original)", name);
                } else {
                    println!("{} (changed at {} ms)", name, changed);
                }
            }
        }
        Err(e) => println!("Name history unavailable: {}", e),
    }

    let blocked = api.blocked_servers(None).await?;
    println!("\n{} blocked server hashes", blocked.len());
    for hash in blocked.hashes().iter().take(5) {
        println!("  {}", hash);
    }

    Ok(())
}
