use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{DogearError, Result};
use crate::config::Config;
use crate::cover::openai::OpenAiImageGenerator;
use crate::cover::{CoverGenerator, ImageGenerator};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::jobs::{CoverChannel, EmailSyncChannel, JobOrchestrator};
use crate::mail::{HttpMailer, Mailer};
use crate::pipeline::Pipeline;
use crate::push::{DeviceRegistry, HttpPushTransport, ProviderTokenSigner, PushService, PushTransport};
use crate::queue::JobQueue;
use crate::readiness::ReadinessTracker;
use crate::reader::{ChromeRenderer, ContentReader, Renderer};
use crate::store::{KvStore, Repository, SqliteStore};

/// External capabilities the pipeline talks to.
pub struct Capabilities {
    pub fetcher: Arc<dyn Fetcher>,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub images: Arc<dyn ImageGenerator>,
    pub mailer: Arc<dyn Mailer>,
    pub push_transport: Arc<dyn PushTransport>,
    pub push_signer: Option<Arc<ProviderTokenSigner>>,
}

impl Capabilities {
    /// HTTP adapters configured from `config`.
    ///
    /// Absent credentials are not an error here; they surface when a job
    /// first needs them.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
            config.reader.fetch_timeout(),
            config.reader.user_agent.as_deref(),
        )?);
        let renderer: Option<Arc<dyn Renderer>> = if config.reader.render_enabled {
            Some(Arc::new(ChromeRenderer::new(config.reader.clone())))
        } else {
            None
        };

        let push_signer = match config.push.signer() {
            Ok(signer) => Some(Arc::new(signer)),
            Err(DogearError::ConfigMissing(field)) => {
                tracing::debug!("Push disabled: {} not configured", field);
                None
            }
            Err(e) => {
                tracing::warn!("Push credentials unusable: {}", e);
                None
            }
        };

        Ok(Self {
            fetcher,
            renderer,
            images: Arc::new(OpenAiImageGenerator::new(config.cover.clone())?),
            mailer: Arc::new(HttpMailer::new(&config.kindle)?),
            push_transport: Arc::new(HttpPushTransport::with_hosts(
                config.push.timeout(),
                &config.push.sandbox_host,
                &config.push.production_host,
            )?),
            push_signer,
        })
    }
}

pub struct AppContext {
    pub config: Config,
    pub repo: Repository,
    pub queue: Arc<dyn JobQueue>,
    pub pipeline: Arc<Pipeline>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let db_path = match &config.worker.db_path {
            Some(p) => p.clone(),
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let capabilities = Capabilities::from_config(&config)?;
        Ok(Self::assemble(config, store.clone(), store, capabilities))
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let capabilities = Capabilities::from_config(&config)?;
        Ok(Self::assemble(config, store.clone(), store, capabilities))
    }

    /// Wire every stage on top of the given substrate and capabilities.
    pub fn assemble(
        config: Config,
        kv: Arc<dyn KvStore>,
        queue: Arc<dyn JobQueue>,
        capabilities: Capabilities,
    ) -> Self {
        let repo = Repository::new(kv);
        let reader = Arc::new(ContentReader::new(
            capabilities.fetcher.clone(),
            capabilities.renderer,
            config.reader.clone(),
        ));
        let readiness = Arc::new(ReadinessTracker::new(repo.clone(), config.reader.min_words));

        let generator = Arc::new(CoverGenerator::new(
            repo.clone(),
            capabilities.images,
            capabilities.fetcher,
            config.cover.clone(),
        ));
        let cover = JobOrchestrator::new(
            CoverChannel::new(repo.clone(), reader.clone(), generator),
            repo.clone(),
            Some(queue.clone()),
            readiness.clone(),
            config.cover.retry.clone(),
        );
        let kindle = JobOrchestrator::new(
            EmailSyncChannel::new(
                repo.clone(),
                reader.clone(),
                capabilities.mailer,
                config.kindle.clone(),
            ),
            repo.clone(),
            Some(queue.clone()),
            readiness.clone(),
            config.kindle.retry.clone(),
        );

        let push = Arc::new(PushService::new(
            DeviceRegistry::new(repo.clone()),
            capabilities.push_transport,
            capabilities.push_signer,
            config.push.topic.clone(),
        ));

        let pipeline = Arc::new(Pipeline::new(
            repo.clone(),
            reader,
            readiness,
            cover,
            kindle,
            push,
            config.kindle.auto_sync,
        ));

        Self {
            config,
            repo,
            queue,
            pipeline,
        }
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| DogearError::Config("Could not find data directory".into()))?;
        let dogear_dir = data_dir.join("dogear");
        std::fs::create_dir_all(&dogear_dir)?;
        Ok(dogear_dir.join("dogear.db"))
    }
}
