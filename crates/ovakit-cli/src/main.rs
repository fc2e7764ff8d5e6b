//! ovakit CLI - Assemble disk images into sealed OVA appliances.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ovakit_core::inspect::DEFAULT_QEMU_IMG;
use ovakit_core::{
    assemble_appliance, AssembleOptions, AssemblePhase, AssembleProgress, QemuImgInspector,
};
use tracing_subscriber::EnvFilter;

/// Package a built virtual disk image as a checksum-sealed OVA appliance.
#[derive(Parser)]
#[command(name = "ovakit")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a disk image and descriptor template into `<image>.ova`.
    Assemble {
        /// Path to the disk image.
        image: PathBuf,

        /// Path to the OVF descriptor template.
        template: PathBuf,

        /// Image introspection binary.
        #[arg(long, env = "OVAKIT_QEMU_IMG", default_value = DEFAULT_QEMU_IMG)]
        qemu_img: PathBuf,

        /// Suppress progress output.
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Assemble {
            image,
            template,
            qemu_img,
            quiet,
        } => {
            run_assemble(&image, &template, qemu_img, quiet)?;
        }
    }

    Ok(())
}

fn run_assemble(image: &Path, template: &Path, qemu_img: PathBuf, quiet: bool) -> Result<()> {
    let inspector = QemuImgInspector::new(qemu_img);
    let options = AssembleOptions::default();

    // Set up progress tracking
    let progress_bar: Option<Arc<Mutex<ProgressBar>>> = if quiet {
        None
    } else {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:<12} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-");
        pb.set_style(style);
        Some(Arc::new(Mutex::new(pb)))
    };

    let callback: Option<ovakit_core::ProgressCallback> = progress_bar.clone().map(|pb_arc| {
        Box::new(move |progress: AssembleProgress| {
            let Ok(pb) = pb_arc.lock() else {
                return;
            };
            pb.set_length(progress.bytes_total);
            pb.set_position(progress.bytes_processed);

            let phase_msg = match progress.phase {
                AssemblePhase::Inspecting => "Inspecting",
                AssemblePhase::Rendering => "Rendering",
                AssemblePhase::Sealing => "Sealing",
                AssemblePhase::Packaging => "Packaging",
                AssemblePhase::Complete => "Complete",
            };
            pb.set_message(phase_msg);
        }) as ovakit_core::ProgressCallback
    });

    let report = assemble_appliance(image, template, &options, &inspector, callback)
        .with_context(|| format!("failed to assemble appliance from '{}'", image.display()))?;

    if let Some(pb_arc) = progress_bar {
        if let Ok(pb) = pb_arc.lock() {
            pb.finish_and_clear();
        }
    }

    if !quiet {
        println!("Appliance");
        println!("---------");
        println!("Image:       {}", report.properties.disk_file_name);
        println!(
            "Size:        {}",
            format_bytes(report.properties.disk_file_size)
        );
        println!(
            "Capacity:    {}",
            format_bytes(report.properties.disk_file_capacity)
        );
        println!("Descriptor:  {}", report.descriptor_name);
        println!("Manifest:    {}", report.manifest_name);
        for entry in report.manifest.entries() {
            println!("  {}({})= {}", entry.algorithm, entry.name, entry.digest);
        }
        println!();
        println!("Assembly completed successfully: {}", report.archive_path.display());
    }

    Ok(())
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
