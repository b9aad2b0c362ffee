use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{StreamExt, stream};
use gantry_archive::{
    ArchiveExtractor, ExtractProgress, PackageAssembler, PackagePiece, ProcessRunner, ProgressFn, TarGzAssembler,
    TarGzExtractor, ToolAssembler, ToolExtractor, ZipAssembler, ZipExtractor,
};
use gantry_fetch::{Fetcher, HttpClient, retry_delay};
use gantry_fs::{FolderLock, Workspace};
use gantry_manifest::{DownloadableInfo, FetchPlan, ManifestError, ManifestResolver, Resolution, VersionHandle};
use gantry_progress::{Progress, ProgressChannel, Step};
use gantry_store::ContentStore;
use gantry_verify::ContentHash;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{InstallConfig, PackageFormat};
use crate::error::{InstallError, Result};
use crate::state::SessionState;

type ChannelListener = Arc<dyn Fn(&Arc<ProgressChannel>) + Send + Sync>;
type StateListener = Arc<dyn Fn(SessionState) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

/// Summary of a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub version:          String,
    pub install_path:     PathBuf,
    /// Entries whose bytes were downloaded by this session.
    pub fetched:          usize,
    /// Entries served from the store without a download.
    pub reused:           usize,
    pub bytes_downloaded: u64,
    pub files_extracted:  u64,
}

/// Shared resources for install sessions: config, store, HTTP fetcher and
/// the assembly/extraction collaborators.
pub struct Installer<C> {
    config:    Arc<InstallConfig>,
    store:     ContentStore,
    fetcher:   Arc<Fetcher<C>>,
    resolver:  ManifestResolver,
    assembler: Arc<dyn PackageAssembler>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl<C: HttpClient> Installer<C> {
    /// Open the store and pick collaborators from `config`.
    pub fn new(config: InstallConfig, client: C) -> Result<Self> {
        let store = ContentStore::open(&config.cache_dir)?;

        let resolver = config.resolver();
        let assembler: Arc<dyn PackageAssembler> = match (&config.assembler, config.package_format) {
            (Some(tool), _) => Arc::new(ToolAssembler::new(ProcessRunner, tool.clone())),
            (None, PackageFormat::Zip) => Arc::new(ZipAssembler),
            (None, PackageFormat::TarGz) => Arc::new(TarGzAssembler),
        };
        let extractor: Arc<dyn ArchiveExtractor> = match (&config.extractor, config.package_format) {
            (Some(tool), _) => Arc::new(ToolExtractor::new(ProcessRunner, tool.clone())),
            (None, PackageFormat::Zip) => Arc::new(ZipExtractor),
            (None, PackageFormat::TarGz) => Arc::new(TarGzExtractor),
        };

        let fetcher = Fetcher::new(client).with_idle_timeout(config.idle_timeout());

        Ok(Self {
            config: Arc::new(config),
            store,
            fetcher: Arc::new(fetcher),
            resolver,
            assembler,
            extractor,
        })
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn PackageAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &InstallConfig { &self.config }

    pub fn store(&self) -> &ContentStore { &self.store }

    pub fn resolver(&self) -> &ManifestResolver { &self.resolver }

    /// Start a session for an already resolved version.
    pub fn session(&self, info: DownloadableInfo) -> InstallSession<C> {
        InstallSession {
            id: Uuid::new_v4(),
            info,
            config: Arc::clone(&self.config),
            store: self.store.clone(),
            fetcher: Arc::clone(&self.fetcher),
            resolver: self.resolver.clone(),
            assembler: Arc::clone(&self.assembler),
            extractor: Arc::clone(&self.extractor),
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Pending),
            channels: Mutex::new(Vec::new()),
            channel_listeners: Mutex::new(Vec::new()),
            state_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Resolve `version` and run a session for it without observers.
    pub async fn install(&self, version: &VersionHandle) -> Result<InstallOutcome> {
        let info = version.resolve().await?.clone();
        self.session(info).run().await
    }
}

/// One distinct blob to download, and every channel waiting on it.
struct FetchJob<'a> {
    plan:      &'a FetchPlan,
    channel:   Arc<ProgressChannel>,
    followers: Vec<Arc<ProgressChannel>>,
}

#[derive(Default)]
struct FetchTotals {
    entries: usize,
    bytes:   u64,
}

/// Installs one version: resolve, fetch, assemble, extract, finalize.
///
/// A session runs once. Observers register with
/// [`on_channel_added`](Self::on_channel_added) and
/// [`on_state_change`](Self::on_state_change) before [`run`](Self::run);
/// callbacks run synchronously on the installing task and must not block.
pub struct InstallSession<C> {
    id:                Uuid,
    info:              DownloadableInfo,
    config:            Arc<InstallConfig>,
    store:             ContentStore,
    fetcher:           Arc<Fetcher<C>>,
    resolver:          ManifestResolver,
    assembler:         Arc<dyn PackageAssembler>,
    extractor:         Arc<dyn ArchiveExtractor>,
    cancel:            CancellationToken,
    state:             Mutex<SessionState>,
    channels:          Mutex<Vec<Arc<ProgressChannel>>>,
    channel_listeners: Mutex<Vec<ChannelListener>>,
    state_listeners:   Mutex<Vec<StateListener>>,
}

impl<C: HttpClient> InstallSession<C> {
    pub fn id(&self) -> Uuid { self.id }

    pub fn version(&self) -> &str { &self.info.version }

    pub fn folder_name(&self) -> &str { &self.info.folder_name }

    /// The public folder this session installs into.
    pub fn install_path(&self) -> PathBuf { self.config.install_root.join(&self.info.folder_name) }

    pub fn state(&self) -> SessionState { *lock(&self.state) }

    /// Channels created so far, entries in manifest order then the package.
    pub fn channels(&self) -> Vec<Arc<ProgressChannel>> { lock(&self.channels).clone() }

    pub fn cancel_token(&self) -> CancellationToken { self.cancel.clone() }

    pub fn cancel(&self) { self.cancel.cancel(); }

    /// Called for every progress channel as the session creates it.
    pub fn on_channel_added<F>(&self, listener: F)
    where
        F: Fn(&Arc<ProgressChannel>) + Send + Sync + 'static,
    {
        lock(&self.channel_listeners).push(Arc::new(listener));
    }

    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        lock(&self.state_listeners).push(Arc::new(listener));
    }

    /// Drive the session to a terminal state.
    ///
    /// Cancellation ends in [`SessionState::Canceled`] with
    /// [`InstallError::Canceled`]; any other error ends in
    /// [`SessionState::Failed`] carrying the first fatal cause. Either way
    /// the session's temporary files are gone before this returns and the
    /// public install folder is untouched. Committed blobs stay in the store.
    pub async fn run(&self) -> Result<InstallOutcome> {
        self.advance(SessionState::Resolving)?;

        let work_dir = self.config.temp_dir.join(format!("session-{}", self.id));
        let result = self.drive(&work_dir).await;
        self.remove_work_dir(&work_dir).await;

        match result {
            Ok(outcome) => {
                self.advance(SessionState::Completed)?;
                info!(
                    version = %outcome.version,
                    path = %outcome.install_path.display(),
                    fetched = outcome.fetched,
                    reused = outcome.reused,
                    "install completed"
                );
                Ok(outcome)
            }
            Err(err) if err.is_cancellation() => {
                self.terminate(SessionState::Canceled);
                info!(version = %self.info.version, "install canceled");
                Err(err)
            }
            Err(err) => {
                self.terminate(SessionState::Failed);
                warn!(version = %self.info.version, error = %err, "install failed");
                Err(err)
            }
        }
    }

    async fn drive(&self, work_dir: &Path) -> Result<InstallOutcome> {
        let folder = &self.info.folder_name;
        self.info.validate()?;
        let _lock = FolderLock::try_acquire(&self.config.install_root, folder).map_err(|e| match e {
            gantry_fs::Error::Locked { .. } => InstallError::Busy { folder: folder.clone() },
            other => other.into(),
        })?;
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|source| InstallError::Io {
                path: work_dir.to_path_buf(),
                source,
            })?;

        let resolution = self.resolver.resolve(&self.info.manifest, &self.store)?;
        let resolution = self.verify_cached(resolution).await?;
        let reused = resolution.cached.len();
        let channels = self.open_entry_channels(&resolution);
        self.checkpoint()?;

        self.advance(SessionState::Fetching)?;
        let totals = self.fetch_all(&resolution, &channels, work_dir).await?;
        self.checkpoint()?;

        self.advance(SessionState::Assembling)?;
        let package = work_dir.join(&self.config.package_name);
        let package_channel = self.assemble(&channels, &package).await?;
        self.checkpoint()?;

        self.advance(SessionState::Extracting)?;
        let workspace = Workspace::beside(self.install_path(), &self.id.to_string())?;
        let report = self.extract(&package, &workspace, &package_channel).await?;

        self.advance(SessionState::Finalizing)?;
        self.checkpoint()?;
        package_channel.move_to_process_step()?;
        let install_path = tokio::task::spawn_blocking(move || workspace.commit())
            .await
            .map_err(|e| InstallError::Task(e.to_string()))??;
        package_channel.mark_complete();

        Ok(InstallOutcome {
            version: self.info.version.clone(),
            install_path,
            fetched: totals.entries,
            reused,
            bytes_downloaded: totals.bytes,
            files_extracted: report.files,
        })
    }

    /// Re-hash every cached blob once. Corrupt blobs are dropped from the
    /// store and their entries move to the fetch list.
    async fn verify_cached(&self, mut resolution: Resolution) -> Result<Resolution> {
        let mut distinct: Vec<(ContentHash, &str)> = Vec::new();
        let mut seen = HashSet::new();
        let keyed = resolution
            .cached
            .iter()
            .filter_map(|entry| entry.hash().map(|hash| (*hash, entry.target_name.as_str())));
        for (hash, name) in keyed {
            if seen.insert(hash) {
                distinct.push((hash, name));
            }
        }

        let checks: Vec<Result<(ContentHash, bool)>> = stream::iter(distinct)
            .map(|(hash, name)| async move {
                match self.store.verify(&hash).await {
                    Ok(intact) => Ok((hash, intact)),
                    Err(gantry_store::Error::NotFound(_)) => Ok((hash, false)),
                    Err(e) => Err(InstallError::from(e).in_entry(name, Step::Verifying)),
                }
            })
            .buffer_unordered(self.config.download_concurrency())
            .collect()
            .await;
        self.checkpoint()?;

        let mut corrupt = HashSet::new();
        for check in checks {
            let (hash, intact) = check?;
            if !intact {
                corrupt.insert(hash);
            }
        }
        if corrupt.is_empty() {
            return Ok(resolution);
        }

        let (stale, intact): (Vec<_>, Vec<_>) = resolution
            .cached
            .into_iter()
            .partition(|entry| entry.hash().is_some_and(|h| corrupt.contains(h)));
        resolution.cached = intact;
        for entry in &stale {
            warn!(entry = %entry.target_name, "cached blob is corrupt, downloading again");
            resolution.to_fetch.push(self.resolver.plan(entry)?);
        }
        Ok(resolution)
    }

    /// One channel per entry: to-fetch entries start Downloading, cached
    /// entries start Verifying with their stored size.
    fn open_entry_channels(&self, resolution: &Resolution) -> HashMap<String, Arc<ProgressChannel>> {
        let cached: HashSet<&str> = resolution.cached.iter().map(|e| e.target_name.as_str()).collect();
        let mut channels = HashMap::with_capacity(self.info.manifest.len());

        for entry in &self.info.manifest {
            let name = entry.target_name.as_str();
            let channel = if cached.contains(name) {
                let channel = ProgressChannel::new(name, Step::Verifying);
                if let Some(blob) = entry.hash().and_then(|h| self.store.blob(h).ok()) {
                    channel.set_progress(Progress::known(blob.size_bytes, blob.size_bytes));
                }
                channel
            } else {
                ProgressChannel::downloading(name)
            };
            let channel = Arc::new(channel);
            self.add_channel(Arc::clone(&channel));
            channels.insert(entry.target_name.clone(), channel);
        }
        channels
    }

    async fn fetch_all(
        &self,
        resolution: &Resolution,
        channels: &HashMap<String, Arc<ProgressChannel>>,
        work_dir: &Path,
    ) -> Result<FetchTotals> {
        let mut jobs: Vec<FetchJob<'_>> = Vec::new();
        let mut by_hash: HashMap<ContentHash, usize> = HashMap::new();
        for plan in &resolution.to_fetch {
            let Some(channel) = channels.get(&plan.entry.target_name).cloned() else {
                continue;
            };
            match by_hash.get(&plan.expected).copied() {
                Some(index) => jobs[index].followers.push(channel),
                None => {
                    by_hash.insert(plan.expected, jobs.len());
                    jobs.push(FetchJob {
                        plan,
                        channel,
                        followers: Vec::new(),
                    });
                }
            }
        }
        debug!(downloads = jobs.len(), entries = resolution.to_fetch.len(), "fetching");

        let abort = self.cancel.child_token();
        let mut results = stream::iter(&jobs)
            .map(|job| self.fetch_one(job, work_dir, &abort))
            .buffer_unordered(self.config.download_concurrency());

        let mut totals = FetchTotals::default();
        let mut first_error = None;
        while let Some(result) = results.next().await {
            match result {
                Ok((entries, bytes)) => {
                    totals.entries += entries;
                    totals.bytes += bytes;
                }
                Err(err) if first_error.is_none() => {
                    abort.cancel();
                    first_error = Some(err);
                }
                Err(err) => debug!(error = %err, "download ended after abort"),
            }
        }

        if self.cancel.is_cancelled() {
            return Err(InstallError::Canceled);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(totals),
        }
    }

    /// Download, verify and commit one blob. Returns entries served and bytes.
    async fn fetch_one(&self, job: &FetchJob<'_>, work_dir: &Path, cancel: &CancellationToken) -> Result<(usize, u64)> {
        let plan = job.plan;
        let name = plan.entry.target_name.as_str();
        let dest = work_dir.join(format!("{}.part", plan.expected));

        let mut attempt = 0;
        loop {
            let fetched = self
                .fetcher
                .fetch(&plan.url, &dest, Some(&plan.expected), &job.channel, cancel)
                .await;
            match fetched {
                Ok(_) => break,
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = retry_delay(attempt, self.config.retry_backoff());
                    warn!(entry = name, attempt = attempt + 1, error = %e, ?delay, "download failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(InstallError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(InstallError::from(e).in_entry(name, Step::Downloading)),
            }
        }

        job.channel
            .move_to_verify_step()
            .map_err(|e| InstallError::from(e).in_entry(name, Step::Verifying))?;
        let blob = self
            .store
            .commit(&dest, &plan.expected)
            .await
            .map_err(|e| InstallError::from(e).in_entry(name, Step::Verifying))?;

        let done = Progress::known(blob.size_bytes, blob.size_bytes);
        for channel in std::iter::once(&job.channel).chain(&job.followers) {
            if channel.step() == Step::Downloading {
                channel.move_to_verify_step()?;
            }
            channel.set_progress(done);
        }
        debug!(entry = name, hash = %plan.expected, bytes = blob.size_bytes, "piece committed");
        Ok((1 + job.followers.len(), blob.size_bytes))
    }

    /// Build the package from store blobs in manifest order. Returns the
    /// package's own channel, created here in Verifying.
    async fn assemble(
        &self,
        channels: &HashMap<String, Arc<ProgressChannel>>,
        package: &Path,
    ) -> Result<Arc<ProgressChannel>> {
        let mut pieces = Vec::with_capacity(self.info.manifest.len());
        for entry in &self.info.manifest {
            let name = entry.target_name.as_str();
            if let Some(channel) = channels.get(name) {
                channel.move_to_process_step()?;
            }
            let hash = entry.hash().ok_or_else(|| {
                InstallError::from(ManifestError::NoUsableSource {
                    target: name.to_owned(),
                    reason: "no content hash",
                })
            })?;
            let blob = self
                .store
                .blob(hash)
                .map_err(|e| InstallError::from(e).in_entry(name, Step::Processing))?;
            pieces.push(PackagePiece::new(blob.storage_path, name));
        }

        let package_name = self.config.package_name.as_str();
        let package_channel = Arc::new(ProgressChannel::new(package_name, Step::Verifying));
        self.add_channel(Arc::clone(&package_channel));

        let assembled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(InstallError::Canceled),
            result = self.assembler.assemble(&pieces, package) => result.map_err(InstallError::from),
        };
        assembled.map_err(|e| e.in_entry(package_name, Step::Processing))?;

        for entry in &self.info.manifest {
            if let Some(channel) = channels.get(&entry.target_name) {
                channel.mark_complete();
            }
        }
        debug!(package = %package.display(), pieces = pieces.len(), "package assembled");
        Ok(package_channel)
    }

    async fn extract(
        &self,
        package: &Path,
        workspace: &Workspace,
        channel: &Arc<ProgressChannel>,
    ) -> Result<gantry_archive::ExtractReport> {
        channel.move_to_extract_step()?;

        let observer = Arc::clone(channel);
        let progress: ProgressFn = Arc::new(move |p: ExtractProgress| {
            observer.set_progress(Progress::counting(p.entries_done, p.entries_total));
        });

        self.extractor
            .extract(package, workspace.path(), progress, &self.cancel)
            .await
            .map_err(|e| InstallError::from(e).in_entry(channel.file_identifier(), Step::Extracting))
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::Canceled);
        }
        Ok(())
    }

    fn advance(&self, next: SessionState) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if !state.can_move_to(next) {
                return Err(InstallError::InvalidState { from: *state, to: next });
            }
            *state = next;
        }
        debug!(version = %self.info.version, state = %next, "session state");
        self.notify_state(next);
        Ok(())
    }

    fn terminate(&self, terminal: SessionState) {
        if self.advance(terminal).is_err() {
            debug!(state = %self.state(), to = %terminal, "session already terminal");
        }
    }

    fn notify_state(&self, state: SessionState) {
        let listeners: Vec<StateListener> = lock(&self.state_listeners).clone();
        for listener in listeners {
            listener(state);
        }
    }

    fn add_channel(&self, channel: Arc<ProgressChannel>) {
        lock(&self.channels).push(Arc::clone(&channel));
        let listeners: Vec<ChannelListener> = lock(&self.channel_listeners).clone();
        for listener in listeners {
            listener(&channel);
        }
    }

    async fn remove_work_dir(&self, work_dir: &Path) {
        match tokio::fs::remove_dir_all(work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %work_dir.display(), error = %e, "failed to remove session temp folder"),
        }
    }
}
