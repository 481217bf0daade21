use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use storage::{
    StorageError,
    dto::racer::PageRequest,
    models::Racer,
    repository::RacerRepository,
    store::{Document, DocumentStore},
};

/// Turn `field=value` arguments into a plain field mapping.
pub fn parse_fields(pairs: &[String]) -> Result<Document> {
    let mut fields = Document::new();

    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected FIELD=VALUE, got '{}'", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("missing field name in '{}'", pair);
        }
        fields.insert(key.to_string(), Value::String(value.to_string()));
    }

    Ok(fields)
}

pub async fn list<S: DocumentStore + ?Sized>(
    repo: &RacerRepository<'_, S>,
    request: &PageRequest,
    json: bool,
) -> Result<()> {
    let page = repo.paginate(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    for racer in &page.items {
        println!("{}", summary(racer));
    }
    println!(
        "page {}/{} ({} racers)",
        page.page,
        page.total_pages.max(1),
        page.total_count
    );

    Ok(())
}

pub async fn show<S: DocumentStore + ?Sized>(
    repo: &RacerRepository<'_, S>,
    id: &str,
    json: bool,
) -> Result<()> {
    let racer = fetch(repo, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&racer)?);
    } else {
        println!("{}", summary(&racer));
    }

    Ok(())
}

pub async fn add<S: DocumentStore + ?Sized>(
    repo: &RacerRepository<'_, S>,
    pairs: &[String],
) -> Result<()> {
    let fields = parse_fields(pairs)?;
    let mut racer = Racer::from_input(&fields)?;

    repo.save(&mut racer).await?;
    tracing::info!("Saved racer {}", summary(&racer));

    println!("{}", racer.id.as_deref().unwrap_or_default());

    Ok(())
}

pub async fn update<S: DocumentStore + ?Sized>(
    repo: &RacerRepository<'_, S>,
    id: &str,
    pairs: &[String],
) -> Result<()> {
    let updates = parse_fields(pairs)?;
    let mut racer = fetch(repo, id).await?;

    repo.update(&mut racer, &updates).await?;

    println!("{}", summary(&racer));

    Ok(())
}

pub async fn remove<S: DocumentStore + ?Sized>(
    repo: &RacerRepository<'_, S>,
    id: &str,
) -> Result<()> {
    let racer = fetch(repo, id).await?;

    repo.destroy(&racer).await?;
    tracing::info!("Removed racer {}", id);

    Ok(())
}

/// Load a JSON array of racer objects and save each one as a new racer.
///
/// Every entry is checked before anything is written, so a bad entry leaves
/// the store untouched.
pub async fn import<S: DocumentStore + ?Sized>(
    repo: &RacerRepository<'_, S>,
    file: &Path,
) -> Result<usize> {
    tracing::info!("Loading racers from: {}", file.display());

    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let entries: Vec<Document> =
        serde_json::from_str(&content).context("Expected a JSON array of racer objects")?;

    let mut racers = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let mut racer =
            Racer::from_input(entry).with_context(|| format!("Invalid racer at index {}", index))?;
        if let Some(id) = racer.id.take() {
            tracing::debug!("Dropping identifier {} from entry {}", id, index);
        }
        racers.push(racer);
    }

    for racer in &mut racers {
        repo.save(racer).await?;
    }

    tracing::info!("Imported {} racers", racers.len());

    Ok(racers.len())
}

async fn fetch<S: DocumentStore + ?Sized>(
    repo: &RacerRepository<'_, S>,
    id: &str,
) -> Result<Racer> {
    repo.find(id)
        .await?
        .ok_or(StorageError::NotFound)
        .with_context(|| format!("Racer {} not found", id))
}

fn summary(racer: &Racer) -> String {
    let text = |value: Option<&str>| value.unwrap_or("-").to_string();

    format!(
        "{}\t#{}\t{}\t{}\t{}\t{}",
        text(racer.id.as_deref()),
        racer
            .number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string()),
        text(racer.full_name().as_deref()),
        text(racer.gender.as_deref()),
        text(racer.group.as_deref()),
        text(racer.formatted_time().as_deref()),
    )
}
