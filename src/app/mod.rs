//! Process wiring: the services a binary needs, built once from
//! [`Settings`], plus the in-process plumbing they run on.

pub mod blob_store;
pub mod http;
pub mod notifier;
pub mod queue;

use std::sync::Arc;

use anyhow::Context as _;

use crate::config::{LlmEngine, Settings};
use crate::entitlement::EntitlementService;
use crate::generation::{Generator, NoopGenerator, OpenAiGenerator};
use crate::ledger::{FileLedger, Ledger};
use crate::payment::PaymentProcessor;
use crate::pipeline::{Collaborators, Pipeline, PipelineOptions};
use crate::render::DocxRenderer;
use blob_store::{BlobStore, LocalFsBlobStore};
use notifier::{HttpNotifier, LogNotifier, Notifier};
use queue::TaskQueue;

#[derive(Clone)]
pub struct Services {
    pub settings: Arc<Settings>,
    pub ledger: Ledger,
    pub entitlement: EntitlementService,
    pub pipeline: Arc<Pipeline>,
    pub payments: PaymentProcessor,
    pub blobs: Arc<dyn BlobStore>,
}

impl Services {
    /// File-backed ledger and blobs under `data_dir`, generator and notifier
    /// chosen by the settings.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        settings.validate().context("validate settings")?;

        let ledger = Ledger::new(Arc::new(FileLedger::new(settings.ledger_dir())));
        let generator: Arc<dyn Generator> = match settings.engine {
            LlmEngine::Noop => Arc::new(NoopGenerator),
            LlmEngine::Openai => {
                Arc::new(OpenAiGenerator::from_settings(&settings).context("init openai generator")?)
            }
        };
        let blobs: Arc<dyn BlobStore> = Arc::new(
            LocalFsBlobStore::new(settings.blob_dir())
                .with_public_base_url(settings.public_base_url.clone()),
        );
        let notifier: Arc<dyn Notifier> = match &settings.notifier_url {
            Some(url) => Arc::new(HttpNotifier::new(
                url.clone(),
                settings.notifier_token.clone(),
                settings.notifier_from.clone(),
            )),
            None => Arc::new(LogNotifier),
        };
        tracing::info!(
            data_dir = %settings.data_dir.display(),
            engine = ?settings.engine,
            http_notifier = settings.notifier_url.is_some(),
            "services configured"
        );

        Ok(Self::with_components(
            settings,
            ledger,
            Collaborators {
                generator,
                renderer: Arc::new(DocxRenderer),
                blobs,
                notifier,
            },
        ))
    }

    /// Wires the services around caller-supplied storage and collaborators.
    pub fn with_components(settings: Settings, ledger: Ledger, collaborators: Collaborators) -> Self {
        let entitlement = EntitlementService::new(ledger.clone(), settings.checkout_base_url.clone());
        let payments = PaymentProcessor::new(
            ledger.clone(),
            entitlement.clone(),
            settings.webhook_token.clone(),
        );
        let blobs = Arc::clone(&collaborators.blobs);
        let pipeline = Arc::new(Pipeline::new(
            ledger.clone(),
            entitlement.clone(),
            collaborators,
            TaskQueue::new(settings.max_concurrency),
            PipelineOptions::from_settings(&settings),
        ));
        Self {
            settings: Arc::new(settings),
            ledger,
            entitlement,
            pipeline,
            payments,
            blobs,
        }
    }
}
