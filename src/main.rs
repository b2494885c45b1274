use anyhow::{bail, Context, Result};
use neurolens::{metrics, Config, TumorAnalysisService, UploadedFile};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // ONNX Runtime logs every graph optimisation pass at info
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info").add_directive(
                    "ort=warn"
                        .parse()
                        .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::WARN.into()),
                )
            }),
        )
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        bail!("usage: neurolens <image>...");
    }

    let config = Config::load()?;
    metrics::init_metrics();

    let service = TumorAnalysisService::from_config(&config)?;

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = UploadedFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        files.push(file);
    }

    if service.load_model().await {
        tracing::info!("Real model active");
    } else {
        eprintln!("note: model unavailable, results are synthetic (mock mode)");
    }

    let batch = service
        .analyze_batch(&files, |progress| {
            tracing::info!(
                completed = progress.completed,
                total = progress.total,
                "Analysis progress {:.0}%",
                progress.fraction() * 100.0
            );
        })
        .await;

    for (file, outcome) in files.iter().zip(&batch.outcomes) {
        if let Err(err) = outcome {
            eprintln!("skipped {}: {}", file.name, err);
        }
    }
    if let Some(err) = &batch.persist_error {
        eprintln!("warning: results not persisted: {}", err);
    }

    let records = match service.stored_results() {
        Some(records) => records,
        None => batch
            .results()
            .map(|result| result.to_record())
            .collect::<Result<Vec<_>, _>>()?,
    };
    println!("{}", serde_json::to_string_pretty(&records)?);

    if service.is_mock_mode() {
        eprintln!("note: mock mode was active for this run");
    }
    tracing::info!(
        analyzed = batch.results().count(),
        failed = batch.failures(),
        mock_rate = format!("{:.1}%", metrics::mock_rate()),
        "Run summary"
    );
    tracing::debug!(metrics = %metrics::export_metrics(), "Final metrics");

    Ok(())
}
