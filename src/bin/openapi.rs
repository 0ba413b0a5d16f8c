use anyhow::Result;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let doc = wifimeter::wifimeter::ApiDoc::openapi();
    let json = serde_json::to_string_pretty(&doc)?;
    println!("{json}");
    Ok(())
}
