use std::{collections::HashMap, fmt, future::Future, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    task::{Id, JoinSet},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{error::SourceError, transport::source::SourceName};

/// Grace period granted to producers after cancellation before they are aborted.
const DRAIN_GRACE_SECS: u64 = 5;

type Producer<T> =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, SourceError>> + Send>;

// ================================================================================================
// Sources
// ================================================================================================

/// Ordered set of named producers for one logical entity.
///
/// A producer receives a [`CancellationToken`] it may poll at its own I/O
/// boundaries; the orchestrator also drops it at its next await point once
/// the token fires.
pub struct SourceSet<T> {
    entries: Vec<(SourceName, Producer<T>)>,
}

impl<T: Send + 'static> SourceSet<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers `producer` under `name`. Re-registering a name replaces the
    /// earlier producer and keeps its position.
    pub fn add<F, Fut>(&mut self, name: impl Into<SourceName>, producer: F) -> &mut Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        let name = name.into();
        let boxed: Producer<T> = Box::new(move |cx| Box::pin(producer(cx)));
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = boxed,
            None => self.entries.push((name, boxed)),
        }
        self
    }

    pub fn with<F, Fut>(mut self, name: impl Into<SourceName>, producer: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        self.add(name, producer);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &SourceName> {
        self.entries.iter().map(|(n, _)| n)
    }
}

impl<T: Send + 'static> Default for SourceSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SourceSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(n, _)| n))
            .finish()
    }
}

// ================================================================================================
// Options
// ================================================================================================

/// Knobs for [`fetch_all`]. The default imposes no deadline.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    deadline: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every still-pending source once `deadline` has elapsed. Those
    /// sources settle as [`SourceError::DeadlineExceeded`].
    pub fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }

    pub fn with_optional_deadline(self, deadline: Option<Duration>) -> Self {
        Self { deadline, ..self }
    }

    /// Ties the fan-out to a caller token. Sources still pending when it fires
    /// settle as [`SourceError::Cancelled`].
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..self
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

// ================================================================================================
// Results
// ================================================================================================

/// Outcome of one source.
#[derive(Debug)]
pub enum FetchResult<T> {
    Ok(T),
    Failed(SourceError),
}

impl<T> FetchResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_failed(&self) -> bool {
        !self.is_ok()
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            Self::Failed(_) => None,
        }
    }

    pub fn as_ok(&self) -> Option<&T> {
        match self {
            Self::Ok(v) => Some(v),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SourceError> {
        match self {
            Self::Ok(_) => None,
            Self::Failed(e) => Some(e),
        }
    }
}

impl<T> From<Result<T, SourceError>> for FetchResult<T> {
    fn from(value: Result<T, SourceError>) -> Self {
        match value {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Failed(e),
        }
    }
}

/// Every declared source with its outcome, in declaration order.
#[derive(Debug)]
pub struct FetchResults<T> {
    entries: Vec<(SourceName, FetchResult<T>)>,
}

impl<T> FetchResults<T> {
    pub fn get(&self, name: &str) -> Option<&FetchResult<T>> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, r)| r)
    }

    /// Removes and returns the outcome of `name`.
    pub fn take(&mut self, name: &str) -> Option<FetchResult<T>> {
        let index = self.entries.iter().position(|(n, _)| n.as_str() == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Removes `name` and returns its value if it succeeded.
    pub fn take_ok(&mut self, name: &str) -> Option<T> {
        self.take(name).and_then(FetchResult::ok)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ok_count(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.len() - self.ok_count()
    }

    /// `true` when at least one source was declared and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.entries.is_empty() && self.ok_count() == 0
    }

    pub fn names(&self) -> impl Iterator<Item = &SourceName> {
        self.entries.iter().map(|(n, _)| n)
    }

    pub fn failed_names(&self) -> Vec<SourceName> {
        self.entries
            .iter()
            .filter(|(_, r)| r.is_failed())
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceName, &FetchResult<T>)> {
        self.entries.iter().map(|(n, r)| (n, r))
    }
}

impl<T> IntoIterator for FetchResults<T> {
    type Item = (SourceName, FetchResult<T>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ================================================================================================
// Orchestrator
// ================================================================================================

/// Runs every producer concurrently and waits for all of them to settle.
///
/// A failing, panicking or cancelled producer becomes a
/// [`FetchResult::Failed`] entry; it never cancels its siblings and this
/// function never fails. Wall-clock time is bounded by the slowest source, or
/// by the deadline when one is configured.
#[tracing::instrument(skip_all, fields(sources = sources.len(), deadline = ?opts.deadline))]
pub async fn fetch_all<T: Send + 'static>(
    sources: SourceSet<T>,
    opts: &FetchOptions,
) -> FetchResults<T> {
    let started = Instant::now();
    let cx = opts
        .cancellation
        .as_ref()
        .map_or_else(CancellationToken::new, CancellationToken::child_token);

    let mut names = Vec::with_capacity(sources.len());
    let mut slots: Vec<Option<FetchResult<T>>> = Vec::with_capacity(sources.len());
    let mut index_of: HashMap<Id, usize> = HashMap::with_capacity(sources.len());
    let mut tasks = JoinSet::new();

    for (i, (name, producer)) in sources.entries.into_iter().enumerate() {
        let cx = cx.clone();
        let handle = tasks.spawn(async move {
            let work = producer(cx.clone());
            tokio::select! {
            biased;
            _ = cx.cancelled() => Err(SourceError::Cancelled),
            res = work => res,
            }
        });
        index_of.insert(handle.id(), i);
        names.push(name);
        slots.push(None);
    }

    // === 1. Settle (or hit the deadline) ===
    let deadline = opts.deadline.map(|d| started + d);
    let mut deadline_hit = false;
    let mut pending_at_deadline: Vec<bool> = Vec::new();

    loop {
        tokio::select! {
        _ = sleep_until_opt(deadline), if deadline.is_some() => {
            warn!(
                pending = slots.iter().filter(|s| s.is_none()).count(),
                "Fetch deadline exceeded; cancelling pending sources."
            );
            deadline_hit = true;
            pending_at_deadline = slots.iter().map(Option::is_none).collect();
            cx.cancel();
            break;
        }

        joined = tasks.join_next_with_id() => {
            match joined {
                Some(joined) => record(&mut slots, &index_of, joined, false),
                None => break,
            }
        }
        }
    }

    // === 2. Drain cancelled producers ===
    if deadline_hit {
        tasks
            .drain_into(&mut slots, &index_of, DRAIN_GRACE_SECS)
            .await;
    }

    // === 3. Assemble, declaration order ===
    let entries: Vec<(SourceName, FetchResult<T>)> = names
        .into_iter()
        .zip(slots)
        .enumerate()
        .map(|(i, (name, slot))| {
            let mut result = slot.unwrap_or(FetchResult::Failed(SourceError::Cancelled));
            // Only sources cut off by the deadline are relabeled.
            let timed_out = pending_at_deadline.get(i).copied().unwrap_or(false);
            if timed_out && matches!(result, FetchResult::Failed(SourceError::Cancelled)) {
                result = FetchResult::Failed(SourceError::DeadlineExceeded);
            }
            if let FetchResult::Failed(e) = &result {
                warn!(source = %name, error = %e, "Source failed");
            }
            (name, result)
        })
        .collect();

    let results = FetchResults { entries };
    info!(
        ok = results.ok_count(),
        failed = results.failed_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Fetch fan-out settled"
    );
    results
}

fn record<T>(
    slots: &mut [Option<FetchResult<T>>],
    index_of: &HashMap<Id, usize>,
    joined: Result<(Id, Result<T, SourceError>), tokio::task::JoinError>,
    draining: bool,
) {
    let (id, outcome) = match joined {
        Ok((id, res)) => (id, FetchResult::from(res)),
        Err(e) if e.is_cancelled() => (e.id(), FetchResult::Failed(SourceError::Cancelled)),
        Err(e) => {
            error!(error = %e, "Source task panicked");
            (e.id(), FetchResult::Failed(SourceError::Panicked(e.to_string())))
        }
    };

    match index_of.get(&id) {
        Some(&i) => slots[i] = Some(outcome),
        None => error!(?id, draining, "Joined a task that was never spawned by this fan-out"),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ================================================================================================
// Drainer
// ================================================================================================

trait DrainInto<T> {
    async fn drain_into(
        &mut self,
        slots: &mut [Option<FetchResult<T>>],
        index_of: &HashMap<Id, usize>,
        secs: u64,
    );
}

impl<T: Send + 'static> DrainInto<T> for JoinSet<Result<T, SourceError>> {
    async fn drain_into(
        &mut self,
        slots: &mut [Option<FetchResult<T>>],
        index_of: &HashMap<Id, usize>,
        secs: u64,
    ) {
        let drain = async {
            while let Some(joined) = self.join_next_with_id().await {
                record(slots, index_of, joined, true);
            }
        };

        tokio::select! {
        _ = drain => {
            debug!("All sources drained after cancellation.");
        },
        _ = tokio::time::sleep(Duration::from_secs(secs)) => {
            warn!("Sources stuck during cancellation (timeout). Aborting.");
        }
        }
        self.abort_all();
    }
}
