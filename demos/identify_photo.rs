//! Photo Identification Example
//!
//! This example identifies the plant in a photo with the Pl@ntNet API and
//! prints the ranked candidates.
//!
//! Usage:
//!   cargo run --example identify_photo -- --image <path_to_photo> [--api-key <key>] [--debug]

use clap::Parser;
use plantnet_runner::{
    IdentificationClient, IdentificationOutcome, IdentificationSession, IdentifyOptions,
    ImageEncoder, Organ, PhotoFile, PlantNetIdentifier, Rotation,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pl@ntNet API key
    #[arg(short, long, env = "PLANTNET_API_KEY")]
    api_key: String,

    /// Path to the photo
    #[arg(short, long)]
    image: PathBuf,

    /// Clockwise rotation of the photo in degrees
    #[arg(short, long, default_value_t = 0)]
    rotation: i32,

    /// Organ shown in the photo (leaf, flower, fruit, bark, auto)
    #[arg(short, long)]
    organ: Option<String>,

    /// Flora to search
    #[arg(short, long, default_value = "all")]
    project: String,

    /// Language for common names
    #[arg(short, long)]
    lang: Option<String>,

    /// Skip reference images in the response
    #[arg(long)]
    no_related_images: bool,

    /// Override the API host
    #[arg(long)]
    host: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let organ = match args.organ.as_deref().map(str::to_lowercase).as_deref() {
        None => None,
        Some("auto") => Some(Organ::Auto),
        Some("leaf") => Some(Organ::Leaf),
        Some("flower") => Some(Organ::Flower),
        Some("fruit") => Some(Organ::Fruit),
        Some("bark") => Some(Organ::Bark),
        Some(_) => return Err("Invalid organ. Must be one of: auto, leaf, flower, fruit, bark".into()),
    };

    let options = IdentifyOptions {
        include_related_images: !args.no_related_images,
        project: args.project,
        organ,
        lang: args.lang,
    };

    let client = match args.host {
        Some(host) => IdentificationClient::with_host(host),
        None => IdentificationClient::new(),
    }
    .with_timeout(Duration::from_secs(args.timeout));

    let identifier = PlantNetIdentifier::new(args.api_key)
        .with_client(client)
        .with_encoder(ImageEncoder::new().with_spool_dir(std::env::temp_dir()))
        .with_options(options);
    let session = IdentificationSession::new(identifier);

    let mut photo = PhotoFile::new(&args.image).with_rotation(Rotation::from_degrees(args.rotation)?);
    println!("Identifying {:?}...", args.image);
    session.capture_and_submit(&mut photo)?;

    match session.wait_settled().await {
        IdentificationOutcome::Succeeded(result) => {
            println!("\nCandidates:");
            println!("-----------");
            for (rank, candidate) in result.candidates.iter().enumerate() {
                println!(
                    "{:>2}. {:<40} {:>6.2}%  {} / {}",
                    rank + 1,
                    candidate.scientific_name,
                    candidate.score * 100.0,
                    candidate.family,
                    candidate.genus
                );
                if !candidate.common_names.is_empty() {
                    println!("    {}", candidate.common_names.join(", "));
                }
            }
            println!("\nRemaining requests: {}", result.remaining_requests);
            Ok(())
        }
        IdentificationOutcome::Failed(failure) => Err(failure.message.into()),
        other => Err(format!("Unexpected state: {other:?}").into()),
    }
}
