use std::env;
use std::path::PathBuf;

use pktmask_core::{Event, FileJob, IoPolicy, PipelineConfig, PipelineExecutor};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: pktmask <input.pcap> [more inputs...]");
        std::process::exit(2);
    }

    let out_dir = env::temp_dir().join("pktmask-out");
    std::fs::create_dir_all(&out_dir)?;

    let jobs: Vec<FileJob> = args
        .into_iter()
        .map(|input| {
            let input = PathBuf::from(input);
            let file_name = input
                .file_name()
                .map(|n| n.to_owned())
                .unwrap_or_else(|| "output.pcap".into());
            let output = out_dir.join(file_name);
            FileJob::new(input, output)
        })
        .collect();

    let io = IoPolicy::new(env::temp_dir().join("pktmask-scratch"), "cli-run".to_string());
    let config = PipelineConfig::default();
    let mut executor = PipelineExecutor::new(config);

    println!("Processing {} file(s), writing outputs to {}\n", jobs.len(), out_dir.display());

    let summary = executor.run(&jobs, &io, |event: Event| match event {
        Event::PipelineStart { input_count } => {
            println!("pipeline start: {input_count} file(s) queued");
        }
        Event::FileStart { path } => {
            println!("file start: {}", path.display());
        }
        Event::StageSummary {
            stage_name,
            packets_processed,
            packets_modified,
            extra_metrics,
        } => {
            println!(
                "  stage {stage_name}: {packets_processed} packet(s) in, {packets_modified} modified ({extra_metrics:?})"
            );
        }
        Event::FileEnd {
            path,
            packets_in,
            packets_out,
            duration_ms,
        } => {
            println!(
                "file done: {} ({packets_in} in, {packets_out} out, {duration_ms}ms)",
                path.display()
            );
        }
        Event::Error { scope, kind, message, path } => {
            eprintln!("error [{scope:?}] {kind:?}: {message} ({path:?})");
        }
        Event::PipelineCancelled => {
            println!("pipeline cancelled");
        }
        Event::PipelineEnd { succeeded, failed } => {
            println!("\npipeline end: {succeeded} succeeded, {failed} failed");
        }
    })?;

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
