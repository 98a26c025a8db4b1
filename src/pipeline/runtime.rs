//! Pipeline runtime - wires the stages together and exposes start/stop/join
//!
//! Startup acquires every resource up front: a missing input or an output that
//! cannot be created is returned to the caller. Once running, nothing but the
//! cancellation token ends a stage.

use super::config::{ConfigError, PipelineConfig};
use crate::aggregator_core::{
    run_averager, run_forwarder, run_tailer, run_writer, AverageRecord, AveragerStats,
    DeliveryEvent, ForwarderStats, OutputWriter, ResultWriterBackend, TailError, TailReader,
    WriterError, WriterStats,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot open input {path}: {source}")]
    Input {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot open output {path}: {source}")]
    Output { path: String, source: WriterError },
    #[error("pipeline stage panicked: {0}")]
    Stage(#[from] JoinError),
}

/// Per-stage counters collected when the pipeline is joined
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub tailed: u64,
    pub forwarder: ForwarderStats,
    pub averager: AveragerStats,
    pub writer: WriterStats,
}

pub struct Pipeline;

impl Pipeline {
    /// Open input and output, create the queues and spawn the stages
    pub async fn start(config: PipelineConfig) -> Result<PipelineHandle, PipelineError> {
        config.validate()?;

        let mut reader = TailReader::open(&config.input_path)
            .await
            .map_err(|source| PipelineError::Input {
                path: config.input_path.clone(),
                source,
            })?
            .with_poll_interval(config.poll_interval);
        if !config.follow_rotation {
            reader = reader.without_rotation();
        }
        log::info!("📖 Started tailing: {}", config.input_path.display());

        let output = OutputWriter::open(config.output_path.as_deref(), config.append_output)
            .map_err(|source| PipelineError::Output {
                path: config
                    .output_path
                    .as_ref()
                    .map_or_else(|| "stdout".to_string(), |p| p.display().to_string()),
                source,
            })?;

        Ok(Self::spawn_stages(&config, reader, output, CancellationToken::new()))
    }

    fn spawn_stages<B>(
        config: &PipelineConfig,
        reader: TailReader,
        output: B,
        cancel: CancellationToken,
    ) -> PipelineHandle
    where
        B: ResultWriterBackend + 'static,
    {
        let (line_tx, mut line_rx) =
            mpsc::channel::<Result<DeliveryEvent, TailError>>(config.channel_buffer);
        let (event_tx, event_rx) = mpsc::channel::<DeliveryEvent>(config.channel_buffer);
        let (record_tx, record_rx) = mpsc::channel::<AverageRecord>(config.output_buffer);

        let tailer = tokio::spawn(run_tailer(reader, line_tx, cancel.clone()));
        let events = futures::stream::poll_fn(move |cx| line_rx.poll_recv(cx));
        let forwarder = tokio::spawn(run_forwarder(
            events,
            event_tx,
            config.forwarder_settings(),
            cancel.clone(),
        ));
        let averager = tokio::spawn(run_averager(
            event_rx,
            record_tx,
            config.averager_settings(),
            cancel.clone(),
        ));
        let writer = tokio::spawn(run_writer(
            record_rx,
            output,
            config.dequeue_timeout,
            cancel.clone(),
        ));

        log::info!("✅ Pipeline running (tail → forwarder → averager → writer)");
        PipelineHandle {
            cancel,
            tailer,
            forwarder,
            averager,
            writer,
        }
    }
}

pub struct PipelineHandle {
    cancel: CancellationToken,
    tailer: JoinHandle<u64>,
    forwarder: JoinHandle<ForwarderStats>,
    averager: JoinHandle<AveragerStats>,
    writer: JoinHandle<WriterStats>,
}

impl PipelineHandle {
    /// Signal every stage to stop at its next suspension point
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.tailer.is_finished()
            && self.forwarder.is_finished()
            && self.averager.is_finished()
            && self.writer.is_finished()
    }

    /// Wait until all stages have exited. Call [`PipelineHandle::stop`] first,
    /// stages only exit on cancellation.
    pub async fn join(self) -> Result<PipelineStats, PipelineError> {
        let tailed = self.tailer.await?;
        let forwarder = self.forwarder.await?;
        let averager = self.averager.await?;
        let writer = self.writer.await?;

        log::info!(
            "🛑 Pipeline stopped: {} forwarded, {} stale, {} malformed, {} averages written",
            forwarder.forwarded,
            forwarder.stale,
            forwarder.malformed,
            writer.written
        );
        Ok(PipelineStats {
            tailed,
            forwarder,
            averager,
            writer,
        })
    }
}
