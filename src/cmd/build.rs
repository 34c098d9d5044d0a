//! Client commands: `appforge build`, `watch`, `resume`, `show`, `list`.

use std::sync::Arc;

use anyhow::{Context, Result};
use appforge::client::{BuildCache, BuildClient, BuildViewModel, PollConfig, PollController};
use appforge::config::AppForgeConfig;
use appforge::errors::ClientError;
use appforge::ui::BuildProgressUI;
use appforge::ui::icons::SPARKLE;
use appforge_common::{BuildJob, JobId, JobStatus};
use console::style;
use tokio::sync::mpsc;

/// What the watch loop hears from the poll session.
enum WatchEvent {
    Update(BuildJob),
    Lost(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Ask whether to continue when the job parks for spec review.
    pub review: bool,
    /// Open the preview in a browser when the build completes.
    pub open: bool,
}

fn client(config: &AppForgeConfig) -> Result<BuildClient> {
    BuildClient::new(&config.client.server_url).context("Invalid server URL")
}

fn parse_id(raw: &str) -> Result<JobId> {
    raw.parse()
        .with_context(|| format!("'{}' is not a valid job id", raw))
}

pub async fn cmd_build(
    config: &AppForgeConfig,
    prompt: &str,
    owner: &str,
    no_watch: bool,
    options: WatchOptions,
) -> Result<()> {
    let client = client(config)?;
    let auto_build = if options.review { Some(false) } else { None };
    let id = client
        .launch(prompt, owner, auto_build)
        .await
        .context("Failed to create build job")?;
    println!("{}Build job {} created", SPARKLE, style(id).cyan());

    if no_watch {
        println!("Follow it with: appforge watch {}", id);
        return Ok(());
    }
    watch_job(config, client, id, options).await
}

pub async fn cmd_watch(config: &AppForgeConfig, job_id: &str, options: WatchOptions) -> Result<()> {
    let id = parse_id(job_id)?;
    watch_job(config, client(config)?, id, options).await
}

pub async fn cmd_resume(config: &AppForgeConfig, job_id: &str, no_watch: bool) -> Result<()> {
    let id = parse_id(job_id)?;
    let client = client(config)?;
    client.resume(id).await.context("Failed to resume build")?;
    println!("Resume requested for {}", style(id).cyan());
    if no_watch {
        return Ok(());
    }
    watch_job(config, client, id, WatchOptions::default()).await
}

/// Print a job snapshot as JSON, falling back to the local cache when the
/// server cannot be reached.
pub async fn cmd_show(config: &AppForgeConfig, job_id: &str) -> Result<()> {
    let id = parse_id(job_id)?;
    match client(config)?.get_job(id).await {
        Ok(job) => println!("{}", serde_json::to_string_pretty(&job)?),
        Err(ClientError::Transport(e)) => {
            let cached = config
                .client
                .resolved_cache_path()
                .and_then(|path| BuildCache::new(path).get(id));
            let Some(cached) = cached else {
                return Err(ClientError::Transport(e)).context("Failed to reach build server");
            };
            eprintln!(
                "{}",
                style("Server unreachable, showing cached build").yellow()
            );
            println!("{}", serde_json::to_string_pretty(&cached)?);
        }
        Err(e) => return Err(e).context("Failed to fetch build job"),
    }
    Ok(())
}

pub async fn cmd_list(config: &AppForgeConfig, owner: &str, limit: u32) -> Result<()> {
    let jobs = client(config)?
        .list_jobs(owner, limit)
        .await
        .context("Failed to list build jobs")?;
    if jobs.is_empty() {
        println!("No builds for {}", owner);
        return Ok(());
    }
    for job in jobs {
        let status = match job.status {
            JobStatus::Complete => style(job.status).green(),
            JobStatus::Failed => style(job.status).red(),
            JobStatus::Waiting => style(job.status).yellow(),
            _ => style(job.status).cyan(),
        };
        println!(
            "{}  {:<10} {}  {}",
            job.id,
            status,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.app_name
        );
    }
    Ok(())
}

fn start_session(
    controller: &mut PollController,
    id: JobId,
    events: &mpsc::UnboundedSender<WatchEvent>,
) {
    let updates = events.clone();
    let lost = events.clone();
    controller.start(
        id,
        move |job| {
            let _ = updates.send(WatchEvent::Update(job));
        },
        move |message| {
            let _ = lost.send(WatchEvent::Lost(message));
        },
    );
}

async fn watch_job(
    config: &AppForgeConfig,
    client: BuildClient,
    id: JobId,
    options: WatchOptions,
) -> Result<()> {
    let client = Arc::new(client);
    let mut controller = PollController::new(client.clone(), PollConfig::from(&config.client));
    let (events, mut rx) = mpsc::unbounded_channel();
    start_session(&mut controller, id, &events);

    let mut vm = BuildViewModel::watching(id);
    let mut ui: Option<BuildProgressUI> = None;
    let mut review_offered = false;

    while let Some(event) = rx.recv().await {
        let job = match event {
            WatchEvent::Update(job) => job,
            WatchEvent::Lost(message) => {
                vm.observation_failed(message);
                break;
            }
        };
        vm.apply(&job);
        let view = ui.get_or_insert_with(|| BuildProgressUI::new(&job.app_name));
        view.render(&vm);

        if vm.is_finished() {
            if job.status == JobStatus::Complete
                && let Some(path) = config.client.resolved_cache_path()
            {
                BuildCache::new(path).store(&job);
            }
            break;
        }

        if vm.awaiting_review && !review_offered {
            review_offered = true;
            view.awaiting_review(&vm.spec);
            let proceed = options.review
                && view.suspend(|| {
                    dialoguer::Confirm::new()
                        .with_prompt("Continue and build the app from this specification?")
                        .default(true)
                        .interact()
                        .unwrap_or(false)
                });
            if !proceed {
                controller.stop();
                println!("Continue later with: appforge resume {}", id);
                return Ok(());
            }
            client.resume(id).await.context("Failed to resume build")?;
            // Fresh deadline for the code generation half.
            start_session(&mut controller, id, &events);
        }
    }
    controller.stop();

    match &ui {
        Some(view) => view.finish(&vm),
        None => {
            if let Some(err) = &vm.client_error {
                eprintln!("{}", style(err).yellow());
            }
        }
    }

    if vm.client_error.is_some() {
        anyhow::bail!("Stopped watching; resubscribe with: appforge watch {}", id);
    }
    if let Some(err) = &vm.error_message {
        anyhow::bail!("Build failed: {}", err);
    }
    if options.open
        && let Some(url) = &vm.preview_url
        && let Err(e) = open::that(url)
    {
        eprintln!("Failed to open browser: {}", e);
    }
    Ok(())
}
