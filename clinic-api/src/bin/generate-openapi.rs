//! OpenAPI Specification Generator Binary
//!
//! Writes the clinic queue OpenAPI document as JSON to stdout.
//!
//! Usage:
//!   cargo run -p clinic-api --bin generate-openapi --features openapi > openapi.json

use clinic_api::ApiDoc;

fn main() {
    match ApiDoc::to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize OpenAPI spec: {}", e);
            std::process::exit(1);
        }
    }
}
