use crate::cli::commands::StatusArgs;
use crate::config::PipelineConfig;
use crate::errors::PulseError;
use crate::models::LatestPointer;

pub async fn handle_status(args: StatusArgs) -> Result<(), PulseError> {
    let out_dir = match args.output {
        Some(dir) => dir,
        None => PipelineConfig::load(args.config.as_deref())?.output_dir,
    };

    let pointers = read_pointers(&out_dir).await?;
    if pointers.is_empty() {
        println!("No batches persisted yet in {}", out_dir.display());
        return Ok(());
    }

    println!(
        "{:<15} {:>8}  {:<10} {}",
        "SOURCE", "RECORDS", "HASH", "CREATED"
    );
    for pointer in pointers {
        println!(
            "{:<15} {:>8}  {:<10} {}",
            pointer.source,
            pointer.record_count,
            &pointer.content_hash[..8],
            pointer.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

async fn read_pointers(out_dir: &std::path::Path) -> Result<Vec<LatestPointer>, PulseError> {
    let mut entries = match tokio::fs::read_dir(out_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut pointers = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with("_latest.json") || name.starts_with('.') {
            continue;
        }
        let raw = tokio::fs::read(entry.path()).await?;
        pointers.push(serde_json::from_slice(&raw)?);
    }
    pointers.sort_by(|a: &LatestPointer, b: &LatestPointer| a.source.cmp(&b.source));
    Ok(pointers)
}
