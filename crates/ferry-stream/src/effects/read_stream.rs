//! Prefetching reader over a paginated source.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::data::{FetchFailure, ReadOptions, ReadState};
use crate::effects::task_queue::TaskQueue;
use crate::error::{Result, StreamError};

/// One page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Position in the load sequence, starting at 0.
    pub index: u64,
    /// Source-side page number.
    pub page: u64,
    /// Page size asked for.
    pub records: u64,
    /// This is the last page; request nothing after it.
    pub exhaust: bool,
}

/// Records returned for one [`FetchRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    /// The source has nothing after this page.
    pub terminate: bool,
    /// Collection size, when the source reports it.
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data,
            terminate: false,
            total: None,
        }
    }

    #[must_use]
    pub fn terminate(mut self) -> Self {
        self.terminate = true;
        self
    }

    #[must_use]
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

/// External read collaborator.
///
/// `request` maps a load index to a page and must not depend on earlier
/// calls: loads are issued ahead of time and resolve in any order.
pub trait Source: Send + Sync + 'static {
    type Record: Send + 'static;
    type Error: std::error::Error + Send + 'static;

    /// Runs once before the first page is requested.
    fn init(&self) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send {
        async { Ok(()) }
    }

    fn request(&self, index: u64) -> FetchRequest;

    fn get(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = std::result::Result<Page<Self::Record>, Self::Error>> + Send;
}

/// Prefetch admission and termination policy.
pub trait Strategy<T>: Send + Sync + 'static {
    /// Called once after [`Source::init`]; `true` starts loading right away.
    fn initialize(&self, _state: &ReadState) -> bool { false }

    /// Whether another page may be requested now.
    fn shall_load(&self, state: &ReadState) -> bool;

    /// Stops the stream at `record`. The record itself is discarded.
    fn terminate(&self, _record: &T, _state: &ReadState) -> bool { false }
}

/// Keeps up to `high_watermark` records requested or waiting to be read.
#[derive(Debug, Clone)]
pub struct Watermark {
    high_watermark: u64,
    eager: bool,
}

impl Watermark {
    pub fn new(options: &ReadOptions) -> Self {
        Self {
            high_watermark: options.high_watermark,
            eager: false,
        }
    }

    /// Starts prefetching on [`BufferedReadStream::open`] rather than on the
    /// first read.
    #[must_use]
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    /// Ends the stream at the first record matching `predicate`.
    pub fn until<F>(self, predicate: F) -> Until<F> {
        Until {
            watermark: self,
            predicate,
        }
    }
}

impl Default for Watermark {
    fn default() -> Self { Self::new(&ReadOptions::default()) }
}

impl<T> Strategy<T> for Watermark {
    fn initialize(&self, _state: &ReadState) -> bool { self.eager }

    fn shall_load(&self, state: &ReadState) -> bool { state.outstanding() < self.high_watermark }
}

/// [`Watermark`] admission with a termination predicate.
#[derive(Debug, Clone)]
pub struct Until<F> {
    watermark: Watermark,
    predicate: F,
}

impl<T, F> Strategy<T> for Until<F>
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn initialize(&self, state: &ReadState) -> bool {
        Strategy::<T>::initialize(&self.watermark, state)
    }

    fn shall_load(&self, state: &ReadState) -> bool {
        Strategy::<T>::shall_load(&self.watermark, state)
    }

    fn terminate(&self, record: &T, _state: &ReadState) -> bool { (self.predicate)(record) }
}

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Transform<T> = Arc<dyn Fn(T) -> T + Send + Sync>;
type OnLoad<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct Hooks<T> {
    filter: Option<Filter<T>>,
    transform: Option<Transform<T>>,
    on_load: Option<OnLoad<T>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            filter: None,
            transform: None,
            on_load: None,
        }
    }
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            transform: self.transform.clone(),
            on_load: self.on_load.clone(),
        }
    }
}

struct Shared<T> {
    state: ReadState,
    /// One bucket per resolved page, in page order.
    buckets: VecDeque<VecDeque<T>>,
    failures: Vec<FetchFailure>,
}

impl<T: 'static> Shared<T> {
    fn front(&mut self) -> Option<&T> {
        while self.buckets.front().is_some_and(VecDeque::is_empty) {
            self.buckets.pop_front();
        }
        self.buckets.front().and_then(VecDeque::front)
    }

    fn pop(&mut self) -> Option<T> {
        self.front()?;
        let record = self.buckets.front_mut()?.pop_front()?;
        self.state.records.served += 1;
        Some(record)
    }

    fn is_done(&self) -> bool {
        self.state.terminated || (self.state.exhausted && self.state.loads_in_flight() == 0)
    }

    fn resolve<E: std::fmt::Display>(
        &mut self,
        request: &FetchRequest,
        result: std::result::Result<Page<T>, E>,
        strategy: &dyn Strategy<T>,
        hooks: &Hooks<T>,
    ) {
        let state = &mut self.state;
        state.loads.resolved += 1;
        state.in_flight = state.in_flight.saturating_sub(request.records);
        if state.terminated {
            return;
        }

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(page = request.page, error = %err, "fetch failed; ending stream");
                self.failures.push(FetchFailure {
                    page: request.page,
                    message: err.to_string(),
                });
                state.exhausted = true;
                state.terminated = true;
                return;
            }
        };

        tracing::debug!(page = request.page, records = page.data.len(), "page resolved");
        state.records.resolved += page.data.len() as u64;
        if let Some(total) = page.total {
            state.total = Some(total);
            if state.records.requested >= total {
                state.exhausted = true;
            }
        }
        if page.data.is_empty() {
            state.exhausted = true;
        }
        if page.terminate {
            state.exhausted = true;
            state.terminated = true;
        }

        if let Some(on_load) = &hooks.on_load {
            on_load(&page.data);
        }

        let mut bucket = VecDeque::with_capacity(page.data.len());
        for record in page.data {
            if strategy.terminate(&record, state) {
                tracing::debug!(page = request.page, "termination predicate matched");
                state.exhausted = true;
                state.terminated = true;
                break;
            }
            if hooks.filter.as_ref().is_some_and(|filter| !filter(&record)) {
                continue;
            }
            let record = match &hooks.transform {
                Some(transform) => transform(record),
                None => record,
            };
            state.records.accepted += 1;
            bucket.push_back(record);
        }

        if !bucket.is_empty() {
            self.buckets.push_back(bucket);
        }
    }
}

/// Reads records in source order while fetching pages ahead in parallel.
///
/// Loads are admitted by the [`Strategy`] and run as spawned tasks. Pages
/// may resolve in any order; a [`TaskQueue`] appends them in load order, so
/// [`read`](BufferedReadStream::read) always returns records in the order the
/// source lists them.
///
/// A failed fetch ends the stream after the records already queued, and is
/// kept in [`failures`](BufferedReadStream::failures).
///
/// Must be driven from inside a tokio runtime.
///
/// # Examples
///
/// ```no_run
/// use ferry_stream::effects::{
///     ApiSource, ApiSourceOptions, BufferedReadStream, ReqwestClient, Watermark,
/// };
///
/// # async fn example() -> ferry_stream::Result<()> {
/// let source = ApiSource::new(
///     ReqwestClient::new(),
///     ApiSourceOptions::new("https://shop.example/wp-json/wc/v3/products"),
/// );
/// let mut stream = BufferedReadStream::new(source, Watermark::default())
///     .filter(|product| product["status"] == "publish")
///     .open()
///     .await?;
///
/// while let Some(product) = stream.read().await? {
///     println!("{}", product["id"]);
/// }
/// # Ok(())
/// # }
/// ```
pub struct BufferedReadStream<S: Source, St> {
    source: Arc<S>,
    strategy: Arc<St>,
    hooks: Arc<Hooks<S::Record>>,
    queue: Arc<TaskQueue>,
    shared: Arc<Mutex<Shared<S::Record>>>,
    ready: Arc<Notify>,
    initialized: bool,
}

impl<S, St> BufferedReadStream<S, St>
where
    S: Source,
    St: Strategy<S::Record>,
{
    /// Builds the stream without touching the source.
    pub fn new(source: S, strategy: St) -> Self {
        Self {
            source: Arc::new(source),
            strategy: Arc::new(strategy),
            hooks: Arc::new(Hooks::default()),
            queue: Arc::new(TaskQueue::new()),
            shared: Arc::new(Mutex::new(Shared {
                state: ReadState::default(),
                buckets: VecDeque::new(),
                failures: Vec::new(),
            })),
            ready: Arc::new(Notify::new()),
            initialized: false,
        }
    }

    /// Drops records for which `filter` returns false.
    ///
    /// Hooks apply to pages resolved after they are set, so set them before
    /// the first read.
    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&S::Record) -> bool + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.hooks).filter = Some(Arc::new(filter));
        self
    }

    /// Rewrites each accepted record before it is queued.
    #[must_use]
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(S::Record) -> S::Record + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.hooks).transform = Some(Arc::new(transform));
        self
    }

    /// Observes every resolved page, in page order, before its records are
    /// served.
    #[must_use]
    pub fn on_load<F>(mut self, on_load: F) -> Self
    where
        F: Fn(&[S::Record]) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.hooks).on_load = Some(Arc::new(on_load));
        self
    }

    /// Initializes the source and, if the strategy asks for it, starts
    /// prefetching.
    ///
    /// # Errors
    ///
    /// [`StreamError::SourceInit`] if [`Source::init`] fails.
    pub async fn open(mut self) -> Result<Self> {
        self.ensure_initialized().await?;
        Ok(self)
    }

    /// Next record in source order, or `None` once the stream is done.
    ///
    /// # Errors
    ///
    /// [`StreamError::SourceInit`] if the stream was not opened and
    /// initializing the source fails.
    pub async fn read(&mut self) -> Result<Option<S::Record>> {
        if !self.wait_front().await? {
            return Ok(None);
        }
        let record = self.shared.lock().pop();
        self.fill();
        Ok(record)
    }

    /// Next record without consuming it.
    pub async fn peek(&mut self) -> Result<Option<S::Record>>
    where
        S::Record: Clone,
    {
        if !self.wait_front().await? {
            return Ok(None);
        }
        Ok(self.shared.lock().front().cloned())
    }

    pub fn state(&self) -> ReadState { self.shared.lock().state.clone() }

    /// Pages that failed to load.
    pub fn failures(&self) -> Vec<FetchFailure> { self.shared.lock().failures.clone() }

    /// Adapts the stream into a [`Stream`]. It ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<S::Record>> + Send {
        futures_util::stream::unfold(Some(self), |stream| async move {
            let mut stream = stream?;
            match stream.read().await {
                Ok(Some(record)) => Some((Ok(record), Some(stream))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    async fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.source
            .init()
            .await
            .map_err(|err| StreamError::SourceInit(err.to_string()))?;
        self.initialized = true;

        let eager = {
            let shared = self.shared.lock();
            self.strategy.initialize(&shared.state)
        };
        if eager {
            self.fill();
        }
        Ok(())
    }

    /// Waits until a record is queued (`true`) or the stream is done (`false`).
    async fn wait_front(&mut self) -> Result<bool> {
        self.ensure_initialized().await?;
        loop {
            self.fill();
            let ready = self.ready.notified();
            let starved = {
                let mut shared = self.shared.lock();
                if shared.front().is_some() {
                    return Ok(true);
                }
                if shared.is_done() {
                    return Ok(false);
                }
                shared.state.loads_in_flight() == 0
            };
            if starved {
                // nothing queued or in flight: load one page regardless of the strategy
                self.load(true);
                continue;
            }
            ready.await;
        }
    }

    /// Issues loads while the strategy admits them.
    fn fill(&self) { self.load(false) }

    /// Like [`fill`](Self::fill), but issues the first load even if the
    /// strategy refuses it.
    fn load(&self, mut force: bool) {
        loop {
            let request = {
                let mut shared = self.shared.lock();
                let state = &mut shared.state;
                if state.exhausted || !(force || self.strategy.shall_load(state)) {
                    return;
                }
                force = false;

                let request = self.source.request(self.queue.request());
                state.loads.requested += 1;
                state.records.requested += request.records;
                state.in_flight += request.records;
                let covers_total = state
                    .total
                    .is_some_and(|total| state.records.requested >= total);
                if request.exhaust || request.records == 0 || covers_total {
                    state.exhausted = true;
                }
                request
            };
            self.spawn_load(request);
        }
    }

    fn spawn_load(&self, request: FetchRequest) {
        let source = Arc::clone(&self.source);
        let strategy = Arc::clone(&self.strategy);
        let hooks = Arc::clone(&self.hooks);
        let queue = Arc::clone(&self.queue);
        let shared = Arc::clone(&self.shared);
        let ready = Arc::clone(&self.ready);

        tokio::spawn(async move {
            let result = source.get(&request).await;
            let index = request.index;
            let appended = queue
                .push(index, move || async move {
                    shared
                        .lock()
                        .resolve(&request, result, &*strategy, &hooks);
                })
                .await;
            if let Err(err) = appended {
                tracing::error!(index, error = %err, "page dropped");
            }
            ready.notify_one();
        });
    }
}

impl<S: Source, St> std::fmt::Debug for BufferedReadStream<S, St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedReadStream")
            .field("state", &self.shared.lock().state)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}
