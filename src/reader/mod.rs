//! Line sources feeding the pipeline.

mod file;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::metrics::EventSender;
use crate::record::RawLine;

pub use file::FileTailer;

/// Produces raw lines for the extractor pool.
///
/// Implementations push one `LineHandled` event per line before queueing
/// it, stop when `shutdown` fires and return only on shutdown or on an
/// unrecoverable error. Dropping `lines` on return is what tells the rest of
/// the pipeline to drain.
#[async_trait]
pub trait Reader: Send {
    async fn run(
        &mut self,
        lines: flume::Sender<RawLine>,
        events: EventSender,
        shutdown: CancellationToken,
    ) -> Result<(), PipelineError>;
}
