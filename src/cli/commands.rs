use crate::app::{AppContext, DogearError, Result};
use crate::domain::{DeviceRegistration, Item, JobState, Platform, PushEnvironment, DEFAULT_OWNER};
use crate::jobs::EnqueueOutcome;

/// Find an item by full id or by a unique id prefix.
pub fn resolve_item(ctx: &AppContext, id_or_prefix: &str) -> Result<Item> {
    if let Some(item) = ctx.repo.get_item(id_or_prefix)? {
        return Ok(item);
    }

    let matches: Vec<String> = ctx
        .repo
        .list_item_ids()?
        .into_iter()
        .filter(|id| id.starts_with(id_or_prefix))
        .collect();

    match matches.as_slice() {
        [id] => ctx
            .repo
            .get_item(id)?
            .ok_or_else(|| DogearError::ItemNotFound(id.clone())),
        [] => Err(DogearError::ItemNotFound(id_or_prefix.to_string())),
        _ => Err(DogearError::Other(format!(
            "Item prefix {} is ambiguous ({} matches)",
            id_or_prefix,
            matches.len()
        ))),
    }
}

fn describe_enqueue(channel: &str, outcome: &EnqueueOutcome) -> String {
    match outcome {
        EnqueueOutcome::Queued { token } => format!("{}: queued ({})", channel, token),
        EnqueueOutcome::AlreadySatisfied => format!("{}: already done", channel),
        EnqueueOutcome::AlreadyActive => format!("{}: already in progress", channel),
        EnqueueOutcome::QueueFailed { code } => format!("{}: failed to queue ({})", channel, code),
    }
}

fn describe_job(label: &str, state: &JobState) {
    println!(
        "  {:<8} {:?} (attempt {}/{})",
        label, state.status, state.attempt, state.max_attempts
    );
    if let Some(error) = &state.last_error {
        println!(
            "           {} [{}{}]",
            error,
            state.error_code.as_deref().unwrap_or("unknown"),
            if state.retryable == Some(true) { ", retryable" } else { "" }
        );
    }
    if let Some(next) = state.next_retry_at {
        println!("           next retry at {}", next.format("%Y-%m-%d %H:%M:%S"));
    }
}

pub async fn save(ctx: &AppContext, url: &str, title: Option<String>, owner: Option<&str>) -> Result<()> {
    let outcome = ctx.pipeline.save(url, title, owner).await?;

    if outcome.created {
        println!("Saved: {}", outcome.item.url);
    } else {
        println!("Already saved: {}", outcome.item.url);
    }
    println!("Id: {}", outcome.item.id);
    if outcome.has_document {
        println!("Reader view extracted");
    } else {
        println!("No readable content found");
    }
    println!("{}", describe_enqueue("cover", &outcome.cover));
    if let Some(kindle) = &outcome.kindle {
        println!("{}", describe_enqueue("kindle", kindle));
    }
    Ok(())
}

pub fn queue_cover(ctx: &AppContext, item: &str, force: bool) -> Result<()> {
    let item = resolve_item(ctx, item)?;
    let outcome = ctx.pipeline.enqueue_cover(&item.id, force)?;
    println!("{}", describe_enqueue("cover", &outcome));
    Ok(())
}

pub fn queue_kindle(ctx: &AppContext, item: &str, force: bool) -> Result<()> {
    let item = resolve_item(ctx, item)?;
    let outcome = ctx.pipeline.enqueue_kindle(&item.id, force)?;
    println!("{}", describe_enqueue("kindle", &outcome));
    Ok(())
}

pub fn status(ctx: &AppContext, item: &str) -> Result<()> {
    let item = resolve_item(ctx, item)?;
    let reader = ctx.repo.get_reader(&item.id)?;

    println!("{}", item.display_title());
    println!("  url      {}", item.url);
    println!("  id       {}", item.id);
    println!("  saved    {}", item.saved_at.format("%Y-%m-%d %H:%M:%S"));
    match reader {
        Some(doc) => println!("  reader   {} words", doc.word_count),
        None => println!("  reader   none"),
    }
    match item.cover.updated_at {
        Some(at) => println!("  cover    {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("  cover    none"),
    }
    describe_job("cover", &item.cover_sync);
    describe_job("kindle", &item.kindle.job);

    let readiness = &item.push_channels.readiness;
    match (&readiness.reason, readiness.ready_at) {
        (_, Some(at)) => println!("  ready    since {}", at.format("%Y-%m-%d %H:%M:%S")),
        (Some(reason), None) => println!("  ready    no ({:?})", reason),
        (None, None) => println!("  ready    not evaluated"),
    }
    let ios = &item.push_channels.ios;
    println!(
        "  push     {:?}{}",
        ios.status,
        ios.last_error
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default()
    );
    Ok(())
}

pub fn list_items(ctx: &AppContext) -> Result<()> {
    let mut items = Vec::new();
    for id in ctx.repo.list_item_ids()? {
        if let Some(item) = ctx.repo.get_item(&id)? {
            items.push(item);
        }
    }

    if items.is_empty() {
        println!("No saved items.");
        return Ok(());
    }

    items.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    for item in items {
        let cover = if item.cover.updated_at.is_some() { "C" } else { " " };
        let ready = if item.push_channels.readiness.ready_at.is_some() { "R" } else { " " };
        println!("{} [{}{}] {}", item.short_id(), cover, ready, item.display_title());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn register_device(
    ctx: &AppContext,
    device_id: &str,
    token: &str,
    platform: &str,
    environment: &str,
    bundle_id: Option<String>,
    app_version: Option<String>,
    build_number: Option<String>,
    owner: Option<&str>,
) -> Result<()> {
    let platform: Platform = platform.parse().map_err(DogearError::Config)?;
    let environment: PushEnvironment = environment.parse().map_err(DogearError::Config)?;

    let record = ctx.pipeline.push().registry().upsert(DeviceRegistration {
        owner_id: owner.unwrap_or(DEFAULT_OWNER).to_string(),
        device_id: device_id.to_string(),
        token: token.to_string(),
        platform,
        environment,
        bundle_id,
        app_version,
        build_number,
    })?;
    println!(
        "Registered {} ({:?}, {:?})",
        record.device_id, record.platform, record.environment
    );
    Ok(())
}

pub fn remove_device(ctx: &AppContext, device_id: &str, owner: Option<&str>) -> Result<()> {
    let owner = owner.unwrap_or(DEFAULT_OWNER);
    if ctx.pipeline.push().registry().remove(owner, device_id)? {
        println!("Removed device: {}", device_id);
    } else {
        println!("Device not found: {}", device_id);
    }
    Ok(())
}

pub fn list_devices(ctx: &AppContext, owner: Option<&str>) -> Result<()> {
    let devices = ctx.pipeline.push().registry().list(owner.unwrap_or(DEFAULT_OWNER))?;
    if devices.is_empty() {
        println!("No devices registered.");
        return Ok(());
    }
    for device in devices {
        println!(
            "{} {:?}/{:?} token {}… updated {}",
            device.device_id,
            device.platform,
            device.environment,
            device.token_hash.get(..12).unwrap_or(&device.token_hash),
            device.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn notify(ctx: &AppContext, item: &str, device: Option<&str>) -> Result<()> {
    let item = resolve_item(ctx, item)?;
    let outcome = ctx.pipeline.notify(&item.id, device).await?;

    match outcome.skipped {
        Some(reason) => println!("Skipped: {}", reason.as_str()),
        None => println!(
            "Sent to {} of {} device(s), {} pruned{}",
            outcome.success_count,
            outcome.attempted_count,
            outcome.pruned_count,
            outcome
                .error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        ),
    }
    Ok(())
}
