use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::progress::Progress;
use crate::step::{InvalidTransition, Step};

/// Handle returned by [`ProgressChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback = dyn Fn(&ProgressChannel) + Send + Sync;

struct Subscriber {
    active:   AtomicBool,
    callback: Box<Callback>,
}

#[derive(Debug, Clone)]
struct ChannelState {
    step:            Step,
    progress:        Progress,
    download_source: Option<String>,
    download_url:    Option<String>,
}

/// Point-in-time copy of a channel's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub file_identifier: String,
    pub step:            Step,
    pub progress:        Progress,
    pub download_source: Option<String>,
    pub download_url:    Option<String>,
}

/// Observable progress for one logical file.
pub struct ProgressChannel {
    file_identifier: String,
    state:           Mutex<ChannelState>,
    subscribers:     Mutex<BTreeMap<SubscriptionId, Arc<Subscriber>>>,
    // Held across a mutation and its fan-out so observers see changes in order.
    delivery:        Mutex<()>,
    next_id:         AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgressChannel {
    pub fn new(file_identifier: impl Into<String>, step: Step) -> Self {
        Self {
            file_identifier: file_identifier.into(),
            state:           Mutex::new(ChannelState {
                step,
                progress: Progress::Indeterminate,
                download_source: None,
                download_url: None,
            }),
            subscribers:     Mutex::new(BTreeMap::new()),
            delivery:        Mutex::new(()),
            next_id:         AtomicU64::new(0),
        }
    }

    pub fn downloading(file_identifier: impl Into<String>) -> Self {
        Self::new(file_identifier, Step::Downloading)
    }

    pub fn file_identifier(&self) -> &str { &self.file_identifier }

    pub fn step(&self) -> Step { lock(&self.state).step }

    pub fn progress(&self) -> Progress { lock(&self.state).progress }

    pub fn current_progress(&self) -> Option<u64> { self.progress().current() }

    pub fn finished_progress(&self) -> Option<u64> { self.progress().finished() }

    pub fn download_source(&self) -> Option<String> { lock(&self.state).download_source.clone() }

    pub fn download_url(&self) -> Option<String> { lock(&self.state).download_url.clone() }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let state = lock(&self.state);
        ChannelSnapshot {
            file_identifier: self.file_identifier.clone(),
            step:            state.step,
            progress:        state.progress,
            download_source: state.download_source.clone(),
            download_url:    state.download_url.clone(),
        }
    }

    /// Register an observer. The callback runs synchronously on every change.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProgressChannel) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber {
            active:   AtomicBool::new(true),
            callback: Box::new(callback),
        });
        lock(&self.subscribers).insert(id, subscriber);
        id
    }

    /// Remove an observer. Unknown or already removed ids are ignored, and it
    /// is safe to call from inside a notification.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match lock(&self.subscribers).remove(&id) {
            Some(subscriber) => {
                subscriber.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize { lock(&self.subscribers).len() }

    /// Set progress; observers are only notified on an actual change.
    pub fn set_progress(&self, progress: Progress) -> bool {
        self.mutate(|state| {
            if state.progress == progress {
                return false;
            }
            state.progress = progress;
            true
        })
    }

    pub fn set_download_source(&self, source: Option<String>, url: Option<String>) -> bool {
        self.mutate(|state| {
            if state.download_source == source && state.download_url == url {
                return false;
            }
            state.download_source = source;
            state.download_url = url;
            true
        })
    }

    /// Downloading -> Verifying, once all bytes are on disk.
    pub fn move_to_verify_step(&self) -> Result<(), InvalidTransition> {
        self.transition(Step::Verifying, |_| {})
    }

    /// Enter Extracting. Clears download metadata and resets progress to
    /// indeterminate until the extractor reports real counts.
    pub fn move_to_extract_step(&self) -> Result<(), InvalidTransition> {
        self.transition(Step::Extracting, |state| {
            state.download_source = None;
            state.download_url = None;
            state.progress = Progress::Indeterminate;
        })
    }

    pub fn move_to_process_step(&self) -> Result<(), InvalidTransition> {
        self.transition(Step::Processing, |state| {
            state.download_source = None;
            state.download_url = None;
        })
    }

    /// Report the current step as fully done.
    pub fn mark_complete(&self) -> bool {
        self.mutate(|state| {
            let total = state.progress.finished().or(state.progress.current()).unwrap_or(1);
            let done = Progress::known(total, total);
            if state.progress == done {
                return false;
            }
            state.progress = done;
            true
        })
    }

    fn transition(&self, to: Step, apply: impl FnOnce(&mut ChannelState)) -> Result<(), InvalidTransition> {
        let mut rejected = None;
        self.mutate(|state| {
            if !state.step.can_move_to(to) {
                rejected = Some(state.step);
                return false;
            }
            state.step = to;
            apply(state);
            true
        });
        match rejected {
            Some(from) => Err(InvalidTransition {
                file: self.file_identifier.clone(),
                from,
                to,
            }),
            None => Ok(()),
        }
    }

    fn mutate(&self, apply: impl FnOnce(&mut ChannelState) -> bool) -> bool {
        let _delivery = lock(&self.delivery);
        let changed = apply(&mut lock(&self.state));
        if changed {
            self.notify();
        }
        changed
    }

    fn notify(&self) {
        let subscribers: Vec<Arc<Subscriber>> = lock(&self.subscribers).values().cloned().collect();
        for subscriber in subscribers {
            if subscriber.active.load(Ordering::Acquire) {
                (subscriber.callback)(self);
            }
        }
    }
}

impl fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ProgressChannel")
            .field("file_identifier", &self.file_identifier)
            .field("step", &state.step)
            .field("progress", &state.progress)
            .field("subscribers", &"{ ... }")
            .finish()
    }
}
