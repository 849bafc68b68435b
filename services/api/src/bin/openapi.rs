//! services/api/src/bin/openapi.rs
//!
//! Standalone binary that dumps the Hostline API's OpenAPI 3.0 document to
//! `openapi.json`, so clients can regenerate bindings without a running server.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

/// Serializes the document and writes it to the given path.
fn write_spec(doc: utoipa::openapi::OpenApi, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let json = doc.to_pretty_json()?;
    std::fs::write(path, json)?;
    println!("wrote Hostline API document to {}", path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    write_spec(ApiDoc::openapi(), "openapi.json")
}
