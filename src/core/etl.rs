use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// Runs a pipeline's three phases in order.
pub struct FinderEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> FinderEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("Collecting geofeed candidates");
        let candidates = self.pipeline.extract().await?;
        tracing::info!("Found {} candidate ranges", candidates.len());
        self.monitor.log_phase("Extract", candidates.len());

        tracing::info!("Fetching geofeed files");
        let rows = self.pipeline.transform(candidates).await?;
        tracing::info!("Kept {} geofeed rows", rows.len());
        self.monitor.log_phase("Transform", rows.len());

        let written = rows.len();
        let output_path = self.pipeline.load(rows).await?;
        tracing::info!("Wrote {} rows to {}", written, output_path);
        self.monitor.log_phase("Load", written);

        self.monitor.log_final_stats();
        Ok(output_path)
    }
}
