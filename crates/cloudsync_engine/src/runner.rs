//! Starting a loop in the background.

use crate::cancel::CancelToken;
use crate::cluster::{ensure_repository, Cluster, RepositorySettings, SnapshotRepository};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::params::{RunMode, RunParams, StoreType};
use crate::recovery::recover;
use crate::sink::{SinkLoop, SinkStats};
use crate::source::{SourceLoop, SourceStats};
use cloudsync_storage::LedgerStore;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::info;

/// Final statistics of a finished loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopReport {
    /// The source loop finished.
    Source(SourceStats),
    /// The sink loop finished.
    Sink(SinkStats),
}

/// A loop running on its own thread.
#[derive(Debug)]
pub struct LoopHandle {
    mode: RunMode,
    cancel: CancelToken,
    thread: JoinHandle<SyncResult<LoopReport>>,
}

impl LoopHandle {
    /// Which loop is running.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Asks the loop to stop at its next cancellation point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the loop's stop signal.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Returns true once the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the loop, or [`SyncError::Internal`]
    /// if the thread panicked.
    pub fn join(self) -> SyncResult<LoopReport> {
        self.thread
            .join()
            .map_err(|_| SyncError::Internal(format!("{} loop thread panicked", self.mode)))?
    }
}

/// Fails unless the plugin needed by `store` is loaded.
pub fn check_plugin<R: SnapshotRepository + ?Sized>(cluster: &R, store: StoreType) -> SyncResult<()> {
    match store.plugin() {
        Some(plugin) if !cluster.has_plugin(plugin)? => {
            Err(SyncError::PluginMissing(plugin.to_string()))
        }
        _ => Ok(()),
    }
}

/// Validates the environment and starts the loop for `params.mode`.
///
/// Everything that can fail up front happens before this returns: the
/// plugin check, repository registration and, on the source, startup
/// recovery. The loop itself then runs on a dedicated thread.
///
/// The sink registers the repository when `params.location` is given and
/// otherwise expects it to be registered already.
///
/// # Errors
///
/// Returns the start-time failure; no thread is spawned in that case.
pub fn start<C, S>(
    params: &RunParams,
    config: SyncConfig,
    cluster: Arc<C>,
    store: Arc<S>,
) -> SyncResult<LoopHandle>
where
    C: Cluster + ?Sized + 'static,
    S: LedgerStore + ?Sized + 'static,
{
    check_plugin(&*cluster, params.store)?;
    let settings = params
        .location
        .as_deref()
        .map(|location| RepositorySettings::new(params.store, location));
    let cancel = CancelToken::new();

    let thread = match params.mode {
        RunMode::Source => {
            let settings = settings.ok_or(SyncError::MissingParameter("location"))?;
            ensure_repository(&*cluster, &config.repository, &settings)?;
            let outcome = recover(&config, params.indices()?, &*cluster, &*store)?;
            info!(?outcome, "startup recovery finished");

            let source = SourceLoop::new(config, cluster, store).with_cancel(cancel.clone());
            thread::Builder::new()
                .name("cloudsync-source".to_string())
                .spawn(move || source.run().map(LoopReport::Source))?
        }
        RunMode::Sink => {
            match settings {
                Some(settings) => ensure_repository(&*cluster, &config.repository, &settings)?,
                None if cluster.has_repository(&config.repository)? => {}
                None => {
                    return Err(SyncError::RepositoryUnavailable(format!(
                        "repository {} is not registered, provide a location",
                        config.repository
                    )))
                }
            }

            let sink = SinkLoop::new(config, cluster).with_cancel(cancel.clone());
            thread::Builder::new()
                .name("cloudsync-sink".to_string())
                .spawn(move || sink.run().map(LoopReport::Sink))?
        }
    };

    info!(mode = %params.mode, store = %params.store, "loop started");
    Ok(LoopHandle {
        mode: params.mode,
        cancel,
        thread,
    })
}
