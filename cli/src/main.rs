use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use photo_stamp::cli::{Cli, Command, ProcessArgs};
use photo_stamp::io::{check_output_location, collect_files, dir_size};
use photo_stamp::report::Report;
use photo_stamp_core::archive::ZipArchiver;
use photo_stamp_core::batch::{Batch, BatchHandle, BatchStatus};
use photo_stamp_core::converter::ConverterKind;
use photo_stamp_core::format::{InputClass, OutputFormat};
use photo_stamp_core::orchestrator::Orchestrator;
use photo_stamp_core::pipeline::{probe_dimensions, ImagePipeline};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match &cli.command {
        Command::Process(args) => handle_process(args),
        Command::Inspect { input, format } => handle_inspect(input, *format),
    }
}

fn handle_process(args: &ProcessArgs) -> Result<()> {
    let params = args.batch_params().context("Invalid batch parameters")?;
    check_output_location(&args.input, &args.output, args.recursive)?;

    let files = collect_files(&args.input, args.recursive)
        .context("Failed to collect input files")?;

    if files.is_empty() {
        println!("No supported files found.");
        return Ok(());
    }

    let config = args.processing_config();
    log::debug!("Processing config: {:?}", config);
    let pipeline = ImagePipeline::from_config(config);
    if params.mode().watermarks() && !pipeline.can_render_text() {
        anyhow::bail!("No font available for the watermark text, pass one with --font");
    }

    let archive_path = args.archive_path();
    let mut batch = Batch::new(
        Uuid::new_v4(),
        params,
        &args.input,
        &args.output,
        &archive_path,
    );
    for file in &files {
        batch
            .add_source(file.as_path())
            .with_context(|| format!("Cannot queue {}", file.display()))?;
    }
    batch.seal()?;
    let handle = BatchHandle::new(batch);

    let orchestrator = Orchestrator::new(Arc::new(pipeline), Arc::new(ZipArchiver));
    println!(
        "Found {} file(s) to process with {} worker(s).",
        files.len(),
        orchestrator.workers()
    );

    // Progress bar
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );
    let progress = |done: usize, _total: usize| pb.set_position(done as u64);

    let start = Instant::now();
    let snapshot = orchestrator.run(&handle, Some(&progress));
    pb.finish_with_message(snapshot.status.to_string());

    let failed = snapshot.status == BatchStatus::Error;
    let error = snapshot.error.clone();
    let report = Report {
        snapshot,
        output_bytes: dir_size(&args.output),
        archive: Some(archive_path),
        elapsed: start.elapsed(),
    };
    report.print_summary();

    if failed {
        anyhow::bail!(error.unwrap_or_else(|| "batch failed".to_string()));
    }
    Ok(())
}

fn handle_inspect(input: &Path, format: OutputFormat) -> Result<()> {
    if !input.is_file() {
        anyhow::bail!("Not a file: {}", input.display());
    }

    let class = InputClass::from_path(input);
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("\nFile: {}", input.display());
    println!("  Class: {}", class.as_str());
    match class {
        InputClass::Raw => {
            let chain: Vec<&str> = ConverterKind::default_order()
                .iter()
                .map(|k| k.program())
                .collect();
            println!("  Converters: {}", chain.join(" -> "));
        }
        _ => match probe_dimensions(input) {
            Some((w, h)) => println!("  Dimensions: {}x{}", w, h),
            None => println!("  Dimensions: unknown"),
        },
    }
    println!("  Output: {}.{} ({})", stem, format.extension(), format.as_str());
    Ok(())
}
