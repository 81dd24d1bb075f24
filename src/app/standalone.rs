use anyhow::*;
use clap::Parser;
use salesmr::metadata::{register_upload, UploadKey};
use salesmr::standalone::{read_bundle, Args, Commands, Services};
use salesmr::utils::init_tracing;
use tracing::info;

async fn run_command(command: Commands, services: &Services) -> Result<()> {
    match command {
        Commands::Upload { input, owner, name } => {
            let files = read_bundle(&input)?;
            let filename = name.unwrap_or_else(|| input.clone());
            let record = register_upload(
                services.store.as_ref(),
                services.metadata.as_ref(),
                &owner,
                &filename,
                files,
            )
            .await?;
            println!("{}", record.key);
        }
        Commands::Run { upload, job } => {
            let run = services
                .orchestrator
                .run(job, &UploadKey::from(upload))
                .await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
            if let Some(link) = run.link.as_ref().filter(|link| !link.is_complete()) {
                let dropped: Vec<String> = link.dropped.iter().map(|l| l.to_string()).collect();
                eprintln!(
                    "note: {} output shard(s) were written but not linked: {}",
                    dropped.len(),
                    dropped.join(", ")
                );
            }
        }
        Commands::List { owner, limit } => {
            for record in services.metadata.list_for_owner(&owner, limit)? {
                println!("{}\t{}\t{}", record.key, record.filename, record.uploaded_on);
                for (job, outputs) in &record.outputs {
                    println!("  {}: {} output(s)", job, outputs.len());
                }
            }
        }
        Commands::Show { upload, job } => {
            let key = UploadKey::from(upload);
            let record = services
                .metadata
                .get(&key)?
                .with_context(|| format!("no upload {}", key))?;
            let outputs = record.outputs_for(job);
            if outputs.is_empty() {
                bail!("{} has not been run on {}", job, key);
            }
            if let Some(note) = services.coverage_note(job) {
                eprintln!("note: {}", note);
            }
            for locator in outputs {
                let body = services.store.get(services.store.key_of(locator)?).await?;
                print!("{}", String::from_utf8_lossy(&body));
            }
        }
        Commands::Jobs => {
            println!("output slots per report: {}", services.config.max_output_slots);
            for pipeline in services.orchestrator.catalog().iter() {
                let stages: Vec<String> = pipeline
                    .stages
                    .iter()
                    .map(|s| format!("{} ({} shards)", s.name, s.shards))
                    .collect();
                println!("{}\t{}", pipeline.job_type, stages.join(" -> "));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.load_config()?;
    info!(bucket = %config.bucket, "starting");

    let services = Services::from_config(config).await?;
    run_command(args.command, &services).await
}
