use mojang_metadata::MojangApi;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let api = MojangApi::new("BasicDemo")
        .with_executor(tokio::runtime::Handle::current())
        .with_timeout(Duration::from_secs(5));

    let lookup = api.unique_id("Notch", None).await?;
    println!("Notch -> {}", lookup);

    match api.skin_info(lookup.unique_id(), None).await {
        Ok(skin) => {
            println!("Profile: {} ({})", skin.name(), skin.id());
            println!("Texture blob: {} bytes, signature: {} bytes", skin.value().len(), skin.signature().len());
            match skin.textures() {
                Ok(textures) => println!("Skin URL: {}", textures["textures"]["SKIN"]["url"]),
                Err(e) => println!("Could not decode textures: {}", e),
            }
        }
        Err(e) => println!("Skin lookup failed: {}", e),
    }

    Ok(())
}
