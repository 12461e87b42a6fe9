use clap::Parser;
use rabbit_hole_api::router::ApiDoc;
use utoipa::OpenApi;

#[derive(Parser, Debug)]
#[command(name = "openapi", about = "Write the API's OpenAPI document")]
struct Cli {
    #[arg(long, default_value = "openapi.json")]
    out: String,
}

/// Generates the OpenAPI document and writes it to a file.
fn generate_spec(
    api_doc: utoipa::openapi::OpenApi,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = api_doc.to_pretty_json()?;
    std::fs::write(path, spec_json)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    generate_spec(ApiDoc::openapi(), &cli.out)?;
    Ok(())
}
