use clap::Parser;
use kimport::*;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[tokio::main]
async fn main() {
    // Initialize logger with custom format to hide module paths
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} kimport] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.args()
            )
        })
        .init();

    let args = Cli::parse();

    if args.debug {
        log::set_max_level(log::LevelFilter::Debug);
    }

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

#[derive(Debug, Clone)]
enum Job {
    Archive(PathBuf),
    Lcsc(String),
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Archive(path) => write!(f, "{}", path.display()),
            Job::Lcsc(id) => write!(f, "{id}"),
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    args.validate()?;

    let config = Arc::new(args.config());
    let cancel = CancelToken::new();
    let importer = Importer::new();

    if args.migrate {
        migrate(&config, &cancel).await?;
    }

    let mut jobs: Vec<Job> = args.archive.iter().cloned().map(Job::Archive).collect();
    if let Some(folder) = &args.folder {
        for entry in std::fs::read_dir(folder)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("zip") {
                jobs.push(Job::Archive(path));
            }
        }
    }
    jobs.extend(args.lcsc_ids()?.into_iter().map(Job::Lcsc));

    if !jobs.is_empty() {
        import_batch(&args, jobs, &importer, &config, &cancel).await?;
    }

    if let Some(watch_dir) = &args.watch {
        watch_folder(watch_dir.clone(), &importer, &config, cancel).await?;
    }

    Ok(())
}

async fn migrate(config: &ImportConfig, cancel: &CancelToken) -> Result<()> {
    let migrator = Migrator::new();
    let report = if config.use_kicad_cli && KicadCli::new().exists() {
        migrator.migrate(config, &KicadCli::new(), cancel).await?
    } else {
        if config.use_kicad_cli {
            log::warn!("no usable kicad-cli found, using the built-in converter");
        }
        migrator.migrate(config, &BuiltinUpgrader, cancel).await?
    };

    match report.outcome {
        MigrationOutcome::NothingToMigrate => println!("Nothing to migrate."),
        MigrationOutcome::Migrated(libs) => {
            println!("✓ Migrated {} librar{}:", libs.len(), plural_y(libs.len()));
            for lib in libs {
                println!("  - {lib}");
            }
            if report.relinked_footprints > 0 {
                println!("✓ Relinked {} footprint(s)", report.relinked_footprints);
            }
        }
    }
    Ok(())
}

async fn import_batch(
    args: &Cli,
    jobs: Vec<Job>,
    importer: &Importer,
    config: &Arc<ImportConfig>,
    cancel: &CancelToken,
) -> Result<()> {
    let total_count = jobs.len();
    let is_batch = total_count > 1;

    if is_batch {
        log::info!("batch mode: processing {total_count} items");
        if args.parallel > 1 {
            log::info!("parallel imports: {}", args.parallel);
        }
    }

    let api = Arc::new(EasyedaApi::new());
    let success_count = Arc::new(AtomicUsize::new(0));
    let conflict_count = Arc::new(AtomicUsize::new(0));
    let failed_count = Arc::new(AtomicUsize::new(0));
    let failed_jobs = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    if is_batch && args.parallel > 1 {
        let semaphore = Arc::new(Semaphore::new(args.parallel));
        let mut join_set = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let sem = semaphore.clone();
            let api = api.clone();
            let importer = importer.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let success_count = success_count.clone();
            let conflict_count = conflict_count.clone();
            let failed_count = failed_count.clone();
            let failed_jobs = failed_jobs.clone();

            join_set.spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");

                println!("\n[{}/{}] Processing: {}", index + 1, total_count, job);

                match process_job(&importer, &api, &job, &config, &cancel).await {
                    Ok(reports) => {
                        success_count.fetch_add(1, Ordering::Relaxed);
                        conflict_count
                            .fetch_add(count_conflicts(&reports), Ordering::Relaxed);
                        print_reports(&reports);
                    }
                    Err(e) => {
                        failed_count.fetch_add(1, Ordering::Relaxed);
                        failed_jobs.lock().await.push(job.to_string());
                        eprintln!("✗ [{}/{}] Failed: {} - {}", index + 1, total_count, job, e);
                        log::error!("failed to process {job}: {e}");
                    }
                }
            });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                log::error!("task panicked: {e}");
            }
        }
    } else {
        for (index, job) in jobs.iter().enumerate() {
            if is_batch {
                println!("\n[{}/{}] Processing: {}", index + 1, total_count, job);
            }

            match process_job(importer, &api, job, config, cancel).await {
                Ok(reports) => {
                    success_count.fetch_add(1, Ordering::Relaxed);
                    conflict_count.fetch_add(count_conflicts(&reports), Ordering::Relaxed);
                    print_reports(&reports);
                }
                Err(e) => {
                    failed_count.fetch_add(1, Ordering::Relaxed);
                    failed_jobs.lock().await.push(job.to_string());

                    if args.continue_on_error {
                        eprintln!("✗ Failed: {} - {}", job, e);
                        log::error!("failed to process {job}: {e}");
                    } else {
                        return Err(e);
                    }
                }
            }
        }
    }

    let success = success_count.load(Ordering::Relaxed);
    let conflicts = conflict_count.load(Ordering::Relaxed);
    let failed = failed_count.load(Ordering::Relaxed);
    let failed_list = failed_jobs.lock().await.clone();

    if is_batch {
        println!("\n{}", "=".repeat(60));
        println!("Batch import complete!");
        println!("Total: {total_count} | Success: {success} | Failed: {failed}");
        if conflicts > 0 {
            println!("Conflicts needing a decision: {conflicts} (re-run with --overwrite or --skip-existing)");
        }

        if !failed_list.is_empty() {
            println!("\nFailed items:");
            for job in &failed_list {
                println!("  - {job}");
            }
        }

        println!("Library folder: {}", args.lib_folder.display());
        println!("{}", "=".repeat(60));
    } else {
        println!("\n✓ Import complete!");
        println!("Library folder: {}", args.lib_folder.display());
    }

    Ok(())
}

async fn process_job(
    importer: &Importer,
    api: &EasyedaApi,
    job: &Job,
    config: &ImportConfig,
    cancel: &CancelToken,
) -> Result<Vec<MergeReport>> {
    match job {
        Job::Archive(path) => importer.import_archive_path(path, config, cancel).await,
        Job::Lcsc(id) => Ok(vec![importer.import_lcsc(api, id, config, cancel).await?]),
    }
}

fn count_conflicts(reports: &[MergeReport]) -> usize {
    reports
        .iter()
        .filter(|r| r.outcome == MergeOutcome::Conflict)
        .count()
}

fn print_reports(reports: &[MergeReport]) {
    for report in reports {
        match report.outcome {
            MergeOutcome::Conflict => println!("⚠ {}", report.message),
            _ => println!("✓ {}", report.message),
        }
    }
}

/// Drain the watch folder until Ctrl-C.
async fn watch_folder(
    dir: PathBuf,
    importer: &Importer,
    config: &Arc<ImportConfig>,
    cancel: CancelToken,
) -> Result<()> {
    println!("Watching {} (Ctrl-C to stop)", dir.display());

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let watch_cancel = cancel.clone();
    let watch_task = tokio::spawn(watcher::watch(
        dir,
        Duration::from_secs(1),
        tx,
        watch_cancel,
    ));

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("stop requested");
            ctrl_c_cancel.cancel();
        }
    });

    while let Some(path) = rx.recv().await {
        match importer.import_archive_path(&path, config, &cancel).await {
            Ok(reports) => print_reports(&reports),
            Err(ImportError::Cancelled) => break,
            Err(e) => {
                eprintln!("✗ Failed: {} - {}", path.display(), e);
                log::error!("failed to import {}: {e}", path.display());
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    match watch_task.await {
        Ok(result) => result?,
        Err(e) => log::error!("watcher task panicked: {e}"),
    }
    Ok(())
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 { "y" } else { "ies" }
}
