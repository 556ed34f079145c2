use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Context, Result};

use repository::{
    config::AppConfig,
    db, init_tracing,
    storage::{LocalStorage, ObjectStorage},
    store::{documents, users},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("prune-orphans") => {
            let dry_run = args.any(|arg| arg == "--dry-run");
            prune_orphans(dry_run).await?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance prune-orphans [--dry-run]");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance prune-orphans [--dry-run]");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Deletes stored files that neither a document nor a profile references.
async fn prune_orphans(dry_run: bool) -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        upload_dir = %config.upload_dir.display(),
        dry_run,
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = LocalStorage::new(config.upload_dir.clone());

    let referenced: HashSet<String> = {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
        let mut referenced: HashSet<String> = documents::file_paths(&mut conn)
            .context("failed to load document paths")?
            .into_iter()
            .collect();
        referenced.extend(users::image_paths(&mut conn).context("failed to load image paths")?);
        referenced
    };

    let stored = storage.list_objects().await?;
    let orphans: Vec<&String> = stored
        .iter()
        .filter(|key| !referenced.contains(*key))
        .collect();

    if orphans.is_empty() {
        println!("No orphaned files found.");
        return Ok(());
    }

    println!(
        "{} {} orphaned files…",
        if dry_run { "Would delete" } else { "Deleting" },
        orphans.len()
    );

    for key in orphans {
        if dry_run {
            println!("  {key}");
            continue;
        }
        if let Err(err) = storage.delete_object(key).await {
            eprintln!("Failed to delete {key}: {err}");
        }
    }

    Ok(())
}
