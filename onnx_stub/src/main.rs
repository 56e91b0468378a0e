use clap::{Parser, Subcommand};
use onnx_stub::{classifier_stub, detector_stub, stub::to_bytes, ClassifierStub};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Writes placeholder ONNX models with constant outputs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    model: Model,
}

#[derive(Subcommand, Debug)]
enum Model {
    /// Detector reporting one fixed box for every image
    Detector {
        #[arg(long, value_name = "FILE", default_value = "models/best.onnx")]
        output: PathBuf,
    },
    /// Explainer graph with a fixed probability and a centred saliency peak
    Classifier {
        #[arg(long, value_name = "FILE", default_value = "models/vgg16_gradcam.onnx")]
        output: PathBuf,

        /// Tumor probability (0.0 - 1.0)
        #[arg(long, default_value = "0.9", value_name = "P")]
        probability: f32,

        #[arg(long, default_value = "8")]
        channels: usize,

        #[arg(long, default_value = "7")]
        grid: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (model, output) = match Args::parse().model {
        Model::Detector { output } => (detector_stub(), output),
        Model::Classifier {
            output,
            probability,
            channels,
            grid,
        } => {
            anyhow::ensure!(
                (0.0..=1.0).contains(&probability),
                "probability must lie in [0, 1], got {}",
                probability
            );
            anyhow::ensure!(channels > 0 && grid > 0, "channels and grid must be positive");
            let stub = ClassifierStub {
                probability,
                channels,
                grid,
            };
            (classifier_stub(&stub), output)
        }
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = to_bytes(&model);
    std::fs::write(&output, &bytes)?;
    tracing::info!("Wrote {} ({} bytes)", output.display(), bytes.len());

    Ok(())
}
