//! End-to-end resolution of one asset.
//!
//! ```text
//!  source ─► container ─┬─► envelope ─► key store ──┬─► discovery ─► assembly
//!                       └─► manifest ─► template ───┘
//! ```
//!
//! Key recovery and the manifest fetch run concurrently; everything after
//! them is sequential. Progress and status flow to the caller through an
//! unbounded channel, and every fatal error ends the run with one
//! [`ResolveEvent::Error`] naming the stage it happened in.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    assemble::{AssembledTrack, TrackAssembler},
    container::{decode_container, Playlist},
    dash::{estimate_segment_count, parse_audio_template, SegmentTemplate},
    discovery::{DiscoveryOptions, HttpProbe, SegmentCountDiscovery},
    envelope::Envelope,
    error::{OtoError, OtoResult},
    fetch::{fetch_text, SegmentFetcher},
    keystore::{scan_key_store, ContentKeyState, KeyStore},
    locate::AssetLocator,
    util::http::HttpClient,
};

/// Where the manifest container comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerSource {
    /// Looked up through the resolver's [`AssetLocator`].
    Asset(String),
    Url(Url),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub source: ContainerSource,
    /// Destination of the assembled track.
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    Locate,
    Container,
    Key,
    Manifest,
    Discovery,
    Assembly,
}

impl fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Locate => "locate",
            Self::Container => "container",
            Self::Key => "key",
            Self::Manifest => "manifest",
            Self::Discovery => "discovery",
            Self::Assembly => "assembly",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveEvent {
    /// Assembly progress in percent.
    Progress(f32),
    Status(String),
    Error { stage: ResolveStage, reason: String },
    Finished(ResolvedAsset),
}

/// Everything the decrypt/remux step needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsset {
    pub key: ContentKeyState,
    pub track: AssembledTrack,
    pub segment_count: u64,
    pub probes: u32,
}

/// Where content keys are looked up.
#[derive(Debug, Clone)]
pub enum KeyStoreSource {
    /// A table loaded once and shared between requests.
    Table(Arc<KeyStore>),
    /// A file scanned on every lookup.
    File(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    pub discovery: DiscoveryOptions,
    /// Timeout of a single existence probe.
    pub probe_timeout: Option<Duration>,
    /// Parent of the per-request scratch directories, the system temp dir
    /// when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Required for [`ContainerSource::Asset`].
    pub locator: Option<AssetLocator>,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    client: HttpClient,
    key_store: Option<KeyStoreSource>,
    options: ResolverOptions,
}

impl Resolver {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            key_store: None,
            options: ResolverOptions::default(),
        }
    }

    pub fn with_key_store(mut self, store: KeyStoreSource) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Run a resolution on a background task.
    pub fn spawn(&self, request: ResolveRequest) -> ResolveHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let resolver = self.clone();
        let task_cancel = cancel.clone();
        let task =
            tokio::spawn(async move { resolver.resolve(request, sender, task_cancel).await });

        ResolveHandle {
            events: receiver,
            cancel,
            task,
        }
    }

    /// Resolve one asset, reporting to `events`.
    ///
    /// The last event sent is either [`ResolveEvent::Finished`] or
    /// [`ResolveEvent::Error`].
    pub async fn resolve(
        &self,
        request: ResolveRequest,
        events: UnboundedSender<ResolveEvent>,
        cancel: CancellationToken,
    ) -> OtoResult<ResolvedAsset> {
        let session = Session { events, cancel };

        match self.run(request, &session).await {
            Ok(asset) => {
                session.send(ResolveEvent::Finished(asset.clone()));
                Ok(asset)
            }
            Err(Failure { stage, error }) => {
                log::error!("Resolution failed at {stage}: {error}");
                session.send(ResolveEvent::Error {
                    stage,
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        request: ResolveRequest,
        session: &Session,
    ) -> Result<ResolvedAsset, Failure> {
        session.check(ResolveStage::Locate)?;
        let (container, container_url) = self
            .load_container(&request.source, session)
            .await
            .at(ResolveStage::Locate)?;

        session.check(ResolveStage::Container)?;
        let manifest = decode_container(&container).at(ResolveStage::Container)?;
        let playlist = manifest
            .primary_playlist()
            .cloned()
            .ok_or_else(|| OtoError::ManifestParseError("container lists no playlist".to_string()))
            .at(ResolveStage::Container)?;
        log::debug!(
            "Container type {}, playlist {} ({}) at {}",
            manifest.kind.as_deref().unwrap_or("unknown"),
            playlist.kind,
            playlist.language.as_deref().unwrap_or("und"),
            playlist.url
        );
        let envelope = manifest.envelope().map(str::to_string);

        let (key, (template, base_url, estimate)) = tokio::try_join!(
            async {
                self.recover_key(envelope, session)
                    .await
                    .at(ResolveStage::Key)
            },
            async {
                self.load_template(&playlist, container_url.as_ref(), session)
                    .await
                    .at(ResolveStage::Manifest)
            },
        )?;

        session.check(ResolveStage::Discovery)?;
        session.status(format!("Probing segments, estimated {estimate}"));
        let mut probe = HttpProbe::new(self.client.clone(), template.clone(), base_url.clone());
        if let Some(timeout) = self.options.probe_timeout {
            probe = probe.with_timeout(timeout);
        }
        let outcome = SegmentCountDiscovery::new(probe)
            .with_options(self.options.discovery.clone())
            .with_cancellation(session.cancel.clone())
            .discover(estimate)
            .await
            .at(ResolveStage::Discovery)?;
        let template = template.with_total_count(outcome.count);
        if let Some(numbers) = template.segment_numbers() {
            session.status(format!(
                "Found {} segments (numbers {}..{}) with {} probes",
                outcome.count, numbers.start, numbers.end, outcome.probes
            ));
        }

        session.check(ResolveStage::Assembly)?;
        let track = self
            .assemble(&template, &base_url, outcome.count, &request.output, session)
            .await
            .at(ResolveStage::Assembly)?;

        Ok(ResolvedAsset {
            key,
            track,
            segment_count: outcome.count,
            probes: outcome.probes,
        })
    }

    async fn load_container(
        &self,
        source: &ContainerSource,
        session: &Session,
    ) -> OtoResult<(Vec<u8>, Option<Url>)> {
        let url = match source {
            ContainerSource::File(path) => {
                session.status(format!("Reading container {}", path.display()));
                return Ok((tokio::fs::read(path).await?, None));
            }
            ContainerSource::Url(url) => url.clone(),
            ContainerSource::Asset(asset_id) => {
                let locator = self.options.locator.as_ref().ok_or_else(|| {
                    OtoError::AssetDescriptorError(format!(
                        "no descriptor location configured for asset {asset_id}"
                    ))
                })?;
                session.status(format!("Locating asset {asset_id}"));
                locator.container_url(&self.client, asset_id).await?
            }
        };

        session.status(format!("Downloading container {url}"));
        let data = self.client.fetch(&url).await?;
        Ok((data.to_vec(), Some(url)))
    }

    async fn recover_key(
        &self,
        envelope: Option<String>,
        session: &Session,
    ) -> OtoResult<ContentKeyState> {
        let Some(encoded) = envelope else {
            session.status("Container declares no envelope, asset is not encrypted");
            return Ok(ContentKeyState::Clear);
        };

        let envelope = Envelope::decode(&encoded)?;
        let nonce = envelope.nonce.clone();
        let Some(store) = self.key_store.clone() else {
            return Err(OtoError::KeyNotFound(format!(
                "{nonce} (no key store configured)"
            )));
        };

        session.status("Looking up content key");
        let key = tokio::task::spawn_blocking(move || match store {
            KeyStoreSource::Table(store) => {
                Ok(store.find_key(&envelope.nonce, &envelope.wrapped_key))
            }
            KeyStoreSource::File(path) => {
                scan_key_store(path, &envelope.nonce, &envelope.wrapped_key)
            }
        })
        .await
        .map_err(std::io::Error::from)??;

        key.map(ContentKeyState::Key)
            .ok_or(OtoError::KeyNotFound(nonce))
    }

    async fn load_template(
        &self,
        playlist: &Playlist,
        container_url: Option<&Url>,
        session: &Session,
    ) -> OtoResult<(SegmentTemplate, Url, u64)> {
        let manifest_url = match container_url {
            Some(base) => base.join(&playlist.url)?,
            None => Url::parse(&playlist.url)?,
        };

        let xml = match playlist.data.as_deref().filter(|data| !data.trim().is_empty()) {
            Some(data) => data.to_string(),
            None => {
                session.status(format!("Downloading manifest {manifest_url}"));
                fetch_text(&self.client, &manifest_url).await?
            }
        };

        let template = parse_audio_template(&xml)?;
        let base_url = template.base_url(&manifest_url)?;
        let estimate =
            estimate_segment_count(&xml, template.segment_duration, template.timescale);
        Ok((template, base_url, estimate))
    }

    async fn assemble(
        &self,
        template: &SegmentTemplate,
        base_url: &Url,
        count: u64,
        output: &Path,
        session: &Session,
    ) -> OtoResult<AssembledTrack> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut scratch = tempfile::Builder::new();
        scratch.prefix("oto-");
        let scratch = match &self.options.scratch_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                scratch.tempdir_in(dir)?
            }
            None => scratch.tempdir()?,
        };

        session.status(format!("Downloading {count} segments"));
        session.send(ResolveEvent::Progress(0.0));
        TrackAssembler::new(self.client.clone(), scratch.path())
            .with_cancellation(session.cancel.clone())
            .assemble(template, base_url, count, output, |done, total| {
                session.send(ResolveEvent::Progress(done as f32 * 100.0 / total as f32));
            })
            .await
    }
}

/// A resolution running on a background task.
pub struct ResolveHandle {
    events: UnboundedReceiver<ResolveEvent>,
    cancel: CancellationToken,
    task: JoinHandle<OtoResult<ResolvedAsset>>,
}

impl ResolveHandle {
    pub fn events(&mut self) -> &mut UnboundedReceiver<ResolveEvent> {
        &mut self.events
    }

    /// Stop between two probes or segment downloads.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> OtoResult<ResolvedAsset> {
        self.task.await.map_err(std::io::Error::from)?
    }
}

struct Session {
    events: UnboundedSender<ResolveEvent>,
    cancel: CancellationToken,
}

impl Session {
    fn send(&self, event: ResolveEvent) {
        // Nobody listening is not an error.
        let _ = self.events.send(event);
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{message}");
        self.send(ResolveEvent::Status(message));
    }

    fn check(&self, stage: ResolveStage) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure {
                stage,
                error: OtoError::Cancelled,
            });
        }
        Ok(())
    }
}

struct Failure {
    stage: ResolveStage,
    error: OtoError,
}

trait AtStage<T> {
    fn at(self, stage: ResolveStage) -> Result<T, Failure>;
}

impl<T> AtStage<T> for OtoResult<T> {
    fn at(self, stage: ResolveStage) -> Result<T, Failure> {
        self.map_err(|error| Failure { stage, error })
    }
}
