use serde::{Deserialize, Serialize};

/// Framing and size caps for outgoing payloads.
///
/// # Examples
///
/// ```
/// use ferry_stream::data::BufferOptions;
///
/// // `{"data":[...]}` bodies, at most 250 records each
/// let options = BufferOptions::default()
///     .prefix("{\"data\":[")
///     .suffix("]}")
///     .records_per_request(Some(250));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BufferOptions {
    /// Written before the first record of every payload.
    ///
    /// Default: `"["`
    pub prefix: String,

    /// Written after the last record of every payload.
    ///
    /// Default: `"]"`
    pub suffix: String,

    /// Written between records.
    ///
    /// Default: `","`
    pub delimiter: String,

    /// Maximum records per payload; `None` disables the cap.
    ///
    /// Default: 100
    pub records_per_request: Option<u64>,

    /// Maximum estimated bytes per payload; `None` disables the cap.
    ///
    /// The estimate doubles the UTF-16 length of the text, so it is an upper
    /// bound rather than the real `Content-Length`.
    ///
    /// Default: 4 MiB
    pub bytes_per_request: Option<u64>,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            prefix: "[".to_string(),
            suffix: "]".to_string(),
            delimiter: ",".to_string(),
            records_per_request: Some(100),
            bytes_per_request: Some(4 * 1024 * 1024),
        }
    }
}

impl BufferOptions {
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    #[must_use]
    pub fn records_per_request(mut self, records: Option<u64>) -> Self {
        self.records_per_request = records;
        self
    }

    #[must_use]
    pub fn bytes_per_request(mut self, bytes: Option<u64>) -> Self {
        self.bytes_per_request = bytes;
        self
    }
}

/// Throughput targets enforced by the [`SinkGate`](crate::core::SinkGate).
///
/// Every target is optional; an unset target never blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateOptions {
    pub writes_per_second: Option<f64>,
    pub records_per_second: Option<f64>,
    pub bytes_per_second: Option<f64>,

    /// Replace the configured record and byte targets with the speed the
    /// service has actually shown, once enough samples exist.
    ///
    /// Default: false
    pub adaptive: bool,

    /// Completed writes needed before adaptive targets apply.
    ///
    /// Default: 10
    pub adaptive_samples: u64,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            writes_per_second: None,
            records_per_second: None,
            bytes_per_second: None,
            adaptive: false,
            adaptive_samples: 10,
        }
    }
}

impl RateOptions {
    #[must_use]
    pub fn writes_per_second(mut self, rate: f64) -> Self {
        self.writes_per_second = Some(rate);
        self
    }

    #[must_use]
    pub fn records_per_second(mut self, rate: f64) -> Self {
        self.records_per_second = Some(rate);
        self
    }

    #[must_use]
    pub fn bytes_per_second(mut self, rate: f64) -> Self {
        self.bytes_per_second = Some(rate);
        self
    }

    #[must_use]
    pub fn adaptive(mut self, samples: u64) -> Self {
        self.adaptive = true;
        self.adaptive_samples = samples;
        self
    }

    pub fn is_limited(&self) -> bool {
        self.writes_per_second.is_some()
            || self.records_per_second.is_some()
            || self.bytes_per_second.is_some()
    }
}

/// Configuration for a [`WriteChannel`](crate::effects::WriteChannel).
///
/// # Examples
///
/// ```
/// use ferry_stream::data::{BufferOptions, RateOptions, WriteOptions};
///
/// let options = WriteOptions::default()
///     .buffer(BufferOptions::default().records_per_request(Some(50)))
///     .rate(RateOptions::default().writes_per_second(2.0))
///     .max_pending(4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteOptions {
    #[serde(flatten)]
    pub buffer: BufferOptions,

    #[serde(flatten)]
    pub rate: RateOptions,

    /// Writes allowed in flight before new input waits for one to settle.
    ///
    /// Default: 15
    pub max_pending: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            buffer: BufferOptions::default(),
            rate: RateOptions::default(),
            max_pending: 15,
        }
    }
}

impl WriteOptions {
    #[must_use]
    pub fn buffer(mut self, buffer: BufferOptions) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub fn rate(mut self, rate: RateOptions) -> Self {
        self.rate = rate;
        self
    }

    #[must_use]
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }
}

/// Configuration for a [`BufferedReadStream`](crate::effects::BufferedReadStream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadOptions {
    /// Records the prefetcher tries to keep requested or unserved.
    ///
    /// Default: 500
    pub high_watermark: u64,
}

impl Default for ReadOptions {
    fn default() -> Self { Self { high_watermark: 500 } }
}

impl ReadOptions {
    #[must_use]
    pub fn high_watermark(mut self, high_watermark: u64) -> Self {
        self.high_watermark = high_watermark;
        self
    }
}
