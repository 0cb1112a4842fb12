use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, IngestConfig, SecurityConfig, SecurityMode};
use crate::error::{NodeError, Result};
use crate::grpc::{GrpcJobManager, GrpcServer, PrimarySeed};
use crate::ids::{bootstrap, BootstrapError, HighWaterSource, IdError, JobManagerSeed};
use crate::ingest::{IngestParts, IngestService};
use crate::job_manager::{JobManager, MemoryJobManager};
use crate::sign::{Ed25519Verifier, NoneVerifier, SignatureVerifier};
use crate::store::{KvStore, MemoryStore};
use crate::validator::{JsonValidator, Validate, ValidatorPool};

/// Userid presented to the primary when a peer asks for its high-water
/// timestamp. Only the owner role matters to the primary.
const INSTANCE_OWNER: u32 = 0;

/// One ingest component: its collaborators, id generator, event loop and
/// gRPC surface.
pub struct Node {
    config: IngestConfig,
    store: Option<Arc<dyn KvStore>>,
    job_manager: Option<Arc<dyn JobManager>>,
    validator: Option<Arc<dyn Validate>>,
    listener: Option<TcpListener>,
}

impl Node {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            store: None,
            job_manager: None,
            validator: None,
            listener: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_job_manager(mut self, job_manager: Arc<dyn JobManager>) -> Self {
        self.job_manager = Some(job_manager);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validate>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Serve on a listener bound by the caller instead of `listen_addr`.
    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run the component until it has shut down.
    ///
    /// Startup order:
    /// 1. Validate the configuration and build collaborators
    /// 2. Seed the id generator (job manager on the primary, the primary's
    ///    getinfo elsewhere)
    /// 3. Spawn the ingest event loop
    /// 4. Serve gRPC until the loop stops
    ///
    /// Cancelling `shutdown` starts the same drain as a shutdown request.
    /// A component id outside the generator range is not an error: it is
    /// logged and the component does not serve.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let job_manager: Arc<dyn JobManager> = match (self.job_manager, &self.config.job_manager_addr) {
            (Some(job_manager), _) => job_manager,
            (None, Some(addr)) => Arc::new(GrpcJobManager::connect(addr).await?),
            (None, None) => Arc::new(MemoryJobManager::new()),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KvStore>);
        let validator = match self.validator {
            Some(validator) => validator,
            None => match ValidatorPool::from_config(&self.config.validator) {
                Some(pool) => Arc::new(pool) as Arc<dyn Validate>,
                None => Arc::new(JsonValidator),
            },
        };
        let verifier = build_verifier(&self.config.security)?;

        let source: Box<dyn HighWaterSource> = match &self.config.primary_addr {
            Some(addr) if !self.config.is_primary() => {
                Box::new(PrimarySeed::new(addr.clone(), INSTANCE_OWNER))
            }
            _ => Box::new(JobManagerSeed::new(job_manager.clone())),
        };
        let generator = match bootstrap(self.config.component_id, source.as_ref()).await {
            Ok(generator) => generator,
            Err(BootstrapError::Generator(e @ IdError::GeneratorIdOutOfRange { .. })) => {
                tracing::warn!(
                    component_id = self.config.component_id,
                    error = %e,
                    "Id generator declined, job ingest disabled on this component"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let (service, handle) = IngestService::new(IngestParts {
            generator,
            store,
            job_manager,
            validator,
            verifier,
            batch_timeout: self.config.batch_timeout(),
            shutdown_timeout: self.config.shutdown_timeout(),
        });

        let stopped = CancellationToken::new();
        let service_task = {
            let stopped = stopped.clone();
            tokio::spawn(async move {
                service.run().await;
                stopped.cancel();
            })
        };

        // Forward process shutdown into the drain protocol
        {
            let handle = handle.clone();
            let stopped = stopped.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        if let Err(e) = handle.shutdown().await {
                            tracing::debug!(error = %e, "Shutdown request not delivered");
                        }
                    }
                    _ = stopped.cancelled() => {}
                }
            });
        }

        let server = GrpcServer::new(self.config.listen_addr, handle.clone());
        let until_stopped = {
            let stopped = stopped.clone();
            async move { stopped.cancelled().await }
        };
        let served = match self.listener {
            Some(listener) => server.run_on(listener, until_stopped).await,
            None => server.run_until(until_stopped).await,
        };
        if let Err(e) = served {
            tracing::error!(error = %e, "gRPC server failed");
            let _ = handle.shutdown().await;
            let _ = service_task.await;
            return Err(e.into());
        }

        service_task
            .await
            .map_err(|e| NodeError::Internal(format!("ingest task failed: {e}")))?;
        tracing::info!(component_id = self.config.component_id, "Component stopped");
        Ok(())
    }
}

fn build_verifier(security: &SecurityConfig) -> Result<Arc<dyn SignatureVerifier>> {
    match security.mode {
        SecurityMode::None => Ok(Arc::new(NoneVerifier)),
        SecurityMode::Ed25519 => {
            let path = security
                .trusted_keys
                .as_ref()
                .ok_or(ConfigError::MissingTrustedKeys)?;
            let verifier = Ed25519Verifier::from_key_file(path)?;
            tracing::info!(signers = verifier.signer_count(), path = %path.display(), "Loaded trusted signer keys");
            Ok(Arc::new(verifier))
        }
    }
}
