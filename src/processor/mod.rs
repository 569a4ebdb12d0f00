//! Processor chains: ordered, process-wide, immutable after startup.
//!
//! Pre-processors rewrite envelopes on the publish path; post-processors
//! rewrap the record stream on the receive path. A pre-processor failure is
//! wrapped with the stage's identity so the transport description names the
//! offending stage.

use std::any::type_name;
use std::sync::Arc;

use async_trait::async_trait;

use crate::service::{GatewayError, GatewayResult};
use crate::storage::{Envelope, RecordStream};

#[async_trait]
pub trait RecordPreProcessor: Send + Sync {
    /// Identity used in error wrapping.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    async fn pre_process(&self, envelope: Envelope) -> GatewayResult<Envelope>;
}

pub trait RecordPostProcessor: Send + Sync {
    fn post_process(&self, records: RecordStream) -> RecordStream;
}

#[derive(Clone, Default)]
pub struct PreProcessorChain {
    processors: Arc<Vec<Arc<dyn RecordPreProcessor>>>,
}

impl PreProcessorChain {
    pub fn new(processors: Vec<Arc<dyn RecordPreProcessor>>) -> PreProcessorChain {
        PreProcessorChain {
            processors: Arc::new(processors),
        }
    }

    /// Runs the chain in declared order; the first failing stage aborts the
    /// publish with its identity attached.
    pub async fn apply(&self, mut envelope: Envelope) -> GatewayResult<Envelope> {
        for processor in self.processors.iter() {
            envelope = processor.pre_process(envelope).await.map_err(|e| {
                GatewayError::PreProcessor {
                    processor: processor.name().to_string(),
                    message: e.to_string(),
                }
            })?;
        }
        Ok(envelope)
    }
}

#[derive(Clone, Default)]
pub struct PostProcessorChain {
    processors: Arc<Vec<Arc<dyn RecordPostProcessor>>>,
}

impl PostProcessorChain {
    pub fn new(processors: Vec<Arc<dyn RecordPostProcessor>>) -> PostProcessorChain {
        PostProcessorChain {
            processors: Arc::new(processors),
        }
    }

    pub fn apply(&self, mut records: RecordStream) -> RecordStream {
        for processor in self.processors.iter() {
            records = processor.post_process(records);
        }
        records
    }
}
