use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::signal;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

use super::app_error::GatewayError;
use super::shutdown::ShutdownNotify;
use super::{global_config, GatewayResult};
use crate::gateway::GatewayService;
use crate::network::GatewayServer;
use crate::processor::{PostProcessorChain, PreProcessorChain};
use crate::storage::{MemoryPositionsStorage, MemoryRecordsStorage};

pub struct GatewayNode;

impl GatewayNode {
    /// Builds the storages, processor chains and service, then serves the
    /// framed carrier until ctrl-c.
    ///
    /// Teardown is two-step: broadcast the shutdown so streaming calls stop
    /// emitting, then wait on the completion channel, which only closes
    /// once the last connection handler has dropped its sender clone.
    pub fn start(rt: &Runtime) -> GatewayResult<()> {
        let shutdown = ShutdownNotify::new();
        let (handlers_done_tx, mut handlers_done_rx) = mpsc::channel::<()>(1);

        let storage_config = &global_config().storage;
        let records = Arc::new(MemoryRecordsStorage::new(storage_config.partitions_per_topic));
        let positions = Arc::new(MemoryPositionsStorage::new());

        // chains are fixed at startup; stages would be registered here
        let service = Arc::new(GatewayService::new(
            records,
            positions,
            PreProcessorChain::default(),
            PostProcessorChain::default(),
        ));

        rt.block_on(Self::serve(
            service,
            shutdown.clone(),
            handlers_done_tx.clone(),
        ))?;

        shutdown.notify();
        drop(handlers_done_tx);
        info!("draining connection handlers");
        rt.block_on(async {
            handlers_done_rx.recv().await;
        });

        info!("gateway stopped");
        Ok(())
    }

    async fn serve(
        service: Arc<GatewayService>,
        shutdown: ShutdownNotify,
        handlers_done_tx: mpsc::Sender<()>,
    ) -> GatewayResult<()> {
        let network_conf = &global_config().network;
        let address = format!("{}:{}", network_conf.ip, network_conf.port);

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| GatewayError::DetailedIo(format!("cannot listen on {}: {}", address, e)))?;
        info!(
            "gateway listening on {} ({} connection slots)",
            address, network_conf.max_connection
        );

        let server = GatewayServer::new(
            listener,
            Arc::new(Semaphore::new(network_conf.max_connection)),
            shutdown,
            handlers_done_tx,
            service,
        );

        tokio::select! {
            res = server.run() => {
                if let Err(err) = res {
                    error!("accept loop ended with error: {}", err);
                }
            }
            _ = signal::ctrl_c() => {
                info!("ctrl-c received, shutting the gateway down");
            }
        }

        Ok(())
    }
}
