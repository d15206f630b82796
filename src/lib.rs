//! # rotalog
//!
//! rotalog decides, for every append, which file on disk the bytes belong
//! to. Each file covers one *bucket*: a span of time that starts when the
//! bucket is opened and ends when either the rotation interval has elapsed
//! or the file would grow past the rotation size. Buckets are named after
//! their start timestamp, so a plain directory listing is already in
//! chronological order.
//!
//! Rotation is evaluated on every write, with a fixed priority:
//!
//! 1. **Init**: the first write of a rotator always opens a new bucket at
//!    the current time, whatever is already on disk.
//! 2. **Interval**: once the interval has elapsed, the bucket start is
//!    fast-forwarded by a whole number of intervals, so an idle process
//!    never leaves empty files behind for the periods it skipped.
//! 3. **Size**: if the active file plus the new payload reaches the
//!    rotation size, a new bucket starts at the current time.
//!
//! No file handle is kept between writes. The rotator is not synchronized:
//! share it behind a `Mutex` or route all writes through a single worker,
//! for example `tracing_appender::non_blocking`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use {
//!    rotalog::{LogRotatorBuilder, RotationSize, TimeZone},
//!    std::time::Duration,
//!    tracing_subscriber::util::SubscriberInitExt,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let appender = LogRotatorBuilder::new("./logs")
//!        .rotation_interval(Duration::from_secs(60 * 60))
//!        .rotation_size(RotationSize::MiB(10))
//!        .time_zone(TimeZone::UTC)
//!        .build()?;
//!    let (non_blocking, _guard) = tracing_appender::non_blocking(appender);
//!    tracing_subscriber::fmt()
//!        .with_writer(non_blocking)
//!        .with_ansi(false)
//!        .finish()
//!        .try_init()?;
//!
//!    tracing::info!("This is an info message");
//!    tracing::warn!("This is a warning message");
//!
//!    Ok(())
//! }
//! ```
use {
    chrono::{DateTime, FixedOffset, Local, Offset, TimeDelta, Utc},
    regex::Regex,
    std::{
        fmt,
        fs,
        io::{self, Write as _},
        path::{Path, PathBuf},
        str::FromStr,
        sync::{Arc, Mutex, PoisonError},
        time::Duration,
    },
};

#[cfg(unix)]
use std::{
    fs::Permissions,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
};

/// Extension shared by every bucket file.
pub const FILE_EXTENSION: &str = "log";

/// The shortest rotation interval a rotator accepts.
pub const MIN_ROTATION_INTERVAL: Duration = Duration::from_secs(1);

/// Mode bits requested for newly created bucket files, before the umask.
pub const DEFAULT_FILE_MODE: u32 = 0o666;

/// Timestamp layout of bucket file names. Fixed width and zero padded, so
/// names sort lexically in the same order as their timestamps. No colons,
/// to stay valid on filesystems that reserve them.
const FILENAME_LAYOUT: &str = "%Y-%m-%dT%H-%M-%S%.9f%z";

/// Matches file names produced with [`FILENAME_LAYOUT`].
const BUCKET_FILE_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}\.\d{9}[+-]\d{4}\.log$";

const NANOS_PER_SEC: u128 = 1_000_000_000;

const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Defines size thresholds for rotating log files in binary units.
///
/// A bucket is closed once its file plus the incoming payload would reach
/// this size.
///
/// * `Bytes` - Direct byte count
/// * `KiB` - Kibibytes (1 KiB = 1024 bytes)
/// * `MiB` - Mebibytes (1 MiB = 1024 KiB)
/// * `GiB` - Gibibytes (1 GiB = 1024 MiB)
///
/// Sizes can also be parsed from strings such as `"10MiB"`:
///
/// ```
/// use rotalog::RotationSize;
///
/// let size: RotationSize = "10MiB".parse().unwrap();
/// assert_eq!(size, RotationSize::MiB(10));
/// assert_eq!(size.bytes(), 10 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationSize {
    /// Raw byte count
    Bytes(u64),
    /// Kibibytes (1 KiB = 1024 bytes)
    KiB(u64),
    /// Mebibytes (1 MiB = 1024 KiB = 1,048,576 bytes)
    MiB(u64),
    /// Gibibytes (1 GiB = 1024 MiB = 1,073,741,824 bytes)
    GiB(u64),
}

/// Recognized unit suffixes, longest first.
static SIZE_UNITS: [(&str, fn(u64) -> RotationSize); 4] = [
    ("KiB", RotationSize::KiB),
    ("MiB", RotationSize::MiB),
    ("GiB", RotationSize::GiB),
    ("B", RotationSize::Bytes),
];

impl RotationSize {
    /// Get the size in bytes, saturating at `u64::MAX`.
    pub fn bytes(&self) -> u64 {
        self.checked_bytes().unwrap_or(u64::MAX)
    }

    fn checked_bytes(&self) -> Option<u64> {
        match self {
            RotationSize::Bytes(b) => Some(*b),
            RotationSize::KiB(kib) => kib.checked_mul(1 << 10),
            RotationSize::MiB(mib) => mib.checked_mul(1 << 20),
            RotationSize::GiB(gib) => gib.checked_mul(1 << 30),
        }
    }
}

impl FromStr for RotationSize {
    type Err = ConfigError;

    /// Parse `<digits><unit>` where unit is one of `B`, `KiB`, `MiB`, `GiB`.
    ///
    /// The unit is the run of ASCII letters at the end of the input. When
    /// that run is not a unit on its own but ends with a multi-letter unit
    /// (`"abcMiB"`), the leading letters belong to the number instead and
    /// the number is reported as malformed.
    fn from_str(size: &str) -> Result<Self, Self::Err> {
        let letters = size.len() - size.trim_end_matches(|c: char| c.is_ascii_alphabetic()).len();
        let suffix = &size[size.len() - letters..];

        let (unit, make) = SIZE_UNITS
            .iter()
            .find(|(unit, _)| *unit == suffix)
            .or_else(|| {
                SIZE_UNITS
                    .iter()
                    .find(|(unit, _)| unit.len() > 1 && suffix.ends_with(unit))
            })
            .ok_or_else(|| ConfigError::UnknownUnit(suffix.to_string()))?;

        let number = &size[..size.len() - unit.len()];
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::MalformedNumber(number.to_string()));
        }
        let count = number
            .parse::<u64>()
            .map_err(|_| ConfigError::MalformedNumber(number.to_string()))?;

        let rotation_size = make(count);
        match rotation_size.checked_bytes() {
            Some(_) => Ok(rotation_size),
            None => Err(ConfigError::MalformedNumber(size.to_string())),
        }
    }
}

/// Parse a human size string such as `"10MiB"` into a byte count.
///
/// ```
/// assert_eq!(rotalog::parse_size("7B").unwrap(), 7);
/// assert_eq!(rotalog::parse_size("1GiB").unwrap(), 1 << 30);
/// assert!(rotalog::parse_size("5TB").is_err());
/// ```
pub fn parse_size(size: &str) -> Result<u64, ConfigError> {
    size.parse::<RotationSize>().map(|s| s.bytes())
}

/// Parse a rotation interval such as `"1h30m"` and check it against
/// [`MIN_ROTATION_INTERVAL`].
pub fn parse_interval(interval: &str) -> Result<Duration, ConfigError> {
    let parsed = humantime::parse_duration(interval).map_err(|source| ConfigError::MalformedDuration {
        input: interval.to_string(),
        source,
    })?;
    validate_interval(parsed)
}

/// Reject rotation intervals shorter than one second.
pub fn validate_interval(interval: Duration) -> Result<Duration, ConfigError> {
    if interval < MIN_ROTATION_INTERVAL {
        return Err(ConfigError::DurationTooSmall(interval));
    }
    Ok(interval)
}

/// Specifies the time zone used to render bucket file names.
///
/// The offset is resolved once when the rotator is built, so names stay
/// sortable for the rotator's whole life even across daylight saving
/// changes.
///
/// # Examples
/// ```
/// use rotalog::TimeZone;
/// use chrono::FixedOffset;
///
/// let utc = TimeZone::UTC;
/// let local = TimeZone::Local;
/// let china = TimeZone::Fix(FixedOffset::east_opt(8 * 3600).unwrap());
/// ```
#[derive(Debug, Clone)]
pub enum TimeZone {
    /// Use UTC time zone. This is the default.
    UTC,
    /// Use the system's local offset, captured at build time.
    Local,
    /// Use a fixed time zone offset.
    Fix(FixedOffset),
}

impl TimeZone {
    fn offset(&self) -> FixedOffset {
        match self {
            TimeZone::UTC => Utc.fix(),
            TimeZone::Local => Local::now().offset().to_owned(),
            TimeZone::Fix(fixed_offset) => *fixed_offset,
        }
    }
}

/// Source of wall-clock time for rotation decisions.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can hand one clone to a rotator
/// and keep another to advance it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward, saturating at the largest representable time.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Jump to an arbitrary time, backwards included.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Which rotation rule produced a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First write of the rotator; a bucket was opened at `now`.
    Init,
    /// The interval elapsed; the bucket start moved forward by `intervals`
    /// whole intervals.
    Interval { intervals: u64 },
    /// The active file would reach the rotation size; a bucket was opened
    /// at `now`.
    Size,
    /// The active bucket is kept.
    None,
}

/// Outcome of evaluating the rotation rules for one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Start of the bucket the write belongs to.
    pub bucket_start: DateTime<Utc>,
    /// The rule that fired.
    pub trigger: Trigger,
}

impl Decision {
    /// Whether this write starts a new bucket.
    pub fn rotated(&self) -> bool {
        self.trigger != Trigger::None
    }
}

/// The immutable thresholds of a rotator, and the pure rotation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    interval: Duration,
    max_bytes: u64,
}

impl RotationPolicy {
    /// Create a policy, rejecting intervals shorter than one second.
    pub fn new(interval: Duration, max_bytes: u64) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: validate_interval(interval)?,
            max_bytes,
        })
    }

    /// Longest span a bucket may cover.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// File size at which a new bucket starts.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Decide which bucket a write of `payload_len` bytes belongs to.
    ///
    /// Rules are checked in order and only the first match applies: init,
    /// interval, size. `existing_size` is asked for the size of the active
    /// bucket's file only when the size rule is reached, and its error is
    /// returned unchanged.
    ///
    /// # Arguments
    /// * `now` - The current time.
    /// * `current` - Start of the active bucket, `None` before the first write.
    /// * `payload_len` - Size of the pending write in bytes.
    /// * `existing_size` - Looks up the file size of the bucket starting at
    ///   the given time.
    pub fn decide<E, F>(
        &self,
        now: DateTime<Utc>,
        current: Option<DateTime<Utc>>,
        payload_len: u64,
        existing_size: F,
    ) -> Result<Decision, E>
    where
        F: FnOnce(DateTime<Utc>) -> Result<u64, E>,
    {
        let Some(start) = current else {
            return Ok(Decision {
                bucket_start: now,
                trigger: Trigger::Init,
            });
        };

        if let Some((bucket_start, intervals)) = self.fast_forward(start, now) {
            return Ok(Decision {
                bucket_start,
                trigger: Trigger::Interval { intervals },
            });
        }

        if existing_size(start)?.saturating_add(payload_len) >= self.max_bytes {
            // Strictly after the full bucket, even if the clock stalled or
            // stepped backwards.
            let after_start = start.checked_add_signed(TimeDelta::nanoseconds(1)).unwrap_or(start);
            return Ok(Decision {
                bucket_start: now.max(after_start),
                trigger: Trigger::Size,
            });
        }

        Ok(Decision {
            bucket_start: start,
            trigger: Trigger::None,
        })
    }

    /// Advance `start` by the number of whole intervals elapsed until `now`.
    /// Returns `None` if not even one interval has elapsed.
    fn fast_forward(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Option<(DateTime<Utc>, u64)> {
        let elapsed = now.signed_duration_since(start).to_std().ok()?;
        let interval = self.interval.as_nanos();
        let intervals = elapsed.as_nanos() / interval;
        if intervals == 0 {
            return None;
        }

        // Never more than `elapsed`, so it converts back without loss.
        let advance = intervals * interval;
        let advance = Duration::new(
            u64::try_from(advance / NANOS_PER_SEC).ok()?,
            u32::try_from(advance % NANOS_PER_SEC).ok()?,
        );
        let bucket_start = start.checked_add_signed(TimeDelta::from_std(advance).ok()?)?;
        Some((bucket_start, u64::try_from(intervals).unwrap_or(u64::MAX)))
    }
}

/// File name of the bucket starting at `bucket_start`, rendered in
/// `time_zone`.
///
/// ```
/// use chrono::{DateTime, Offset, Utc};
///
/// let start = DateTime::from_timestamp(1_760_716_442, 5).unwrap();
/// assert_eq!(
///     rotalog::bucket_file_name(start, Utc.fix()),
///     "2025-10-17T15-54-02.000000005+0000.log"
/// );
/// ```
pub fn bucket_file_name(bucket_start: DateTime<Utc>, time_zone: FixedOffset) -> String {
    format!(
        "{}.{FILE_EXTENSION}",
        bucket_start.with_timezone(&time_zone).format(FILENAME_LAYOUT)
    )
}

/// List the bucket files in `directory`, oldest first.
///
/// Only regular files whose names match the bucket layout are returned.
pub fn list_log_files<P: AsRef<Path>>(directory: P) -> Result<Vec<PathBuf>, RollError> {
    let directory = directory.as_ref();
    let file_pattern = Regex::new(BUCKET_FILE_PATTERN).map_err(|err| RollError::Internal(err.to_string()))?;

    let files =
        fs::read_dir(directory).map_err(|source| RollError::file_access(FileOp::ReadDir, directory, source))?;

    let mut log_files = Vec::new();
    for file in files {
        let file = file.map_err(|source| RollError::file_access(FileOp::ReadDir, directory, source))?;
        let metadata = file
            .metadata()
            .map_err(|source| RollError::file_access(FileOp::Stat, &file.path(), source))?;
        if !metadata.is_file() {
            continue;
        }
        if let Some(file_name) = file.file_name().to_str() {
            if file_pattern.is_match(file_name) {
                log_files.push(file.path());
            }
        }
    }

    // Names sort chronologically
    log_files.sort();

    Ok(log_files)
}

/// Configuration of the rotator. Fixed once built.
#[derive(Debug, Clone)]
struct LogRotatorMeta {
    /// The directory where the log files are stored, without trailing
    /// separators.
    directory: PathBuf,
    /// Interval and size thresholds.
    policy: RotationPolicy,
    /// The offset used to render file names.
    time_zone: FixedOffset,
    /// The file permissions to force on newly rotated files (Unix-like
    /// systems only). When unset, files are created with
    /// [`DEFAULT_FILE_MODE`] filtered by the process umask.
    file_mode: Option<u32>,
}

/// State for the rotator.
#[derive(Debug, Default)]
struct LogRotatorState {
    /// Start of the active bucket, `None` until the first write.
    bucket_start: Option<DateTime<Utc>>,
}

impl LogRotatorMeta {
    /// Path of the file backing the bucket that starts at `bucket_start`.
    fn bucket_path(&self, bucket_start: DateTime<Utc>) -> PathBuf {
        self.directory.join(bucket_file_name(bucket_start, self.time_zone))
    }

    /// Size in bytes of an existing bucket file.
    fn file_size(&self, log_path: &Path) -> Result<u64, RollError> {
        fs::metadata(log_path)
            .map(|m| m.len())
            .map_err(|source| RollError::file_access(FileOp::Stat, log_path, source))
    }

    /// Open a log file for appending.
    /// The file is created if missing. If opening fails the parent
    /// directory is created and the open is retried once.
    /// # Arguments
    /// * `log_path` - The path to the log file.
    /// * `new_bucket` - Whether the write starts a new bucket, in which case
    ///   the configured file mode is enforced.
    /// # Returns
    /// The log file.
    fn open_log_file(&self, log_path: &Path, new_bucket: bool) -> Result<fs::File, RollError> {
        let mut open_options = fs::OpenOptions::new();
        open_options.append(true).create(true);
        #[cfg(unix)]
        open_options.mode(self.file_mode.unwrap_or(DEFAULT_FILE_MODE));

        let mut open_log_file_res = open_options.open(log_path);
        if open_log_file_res.is_err() {
            // Create the directory if it doesn't exist
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|source| RollError::file_access(FileOp::CreateDir, parent, source))?;
                open_log_file_res = open_options.open(log_path);
            }
        }

        let log_file =
            open_log_file_res.map_err(|source| RollError::file_access(FileOp::Open, log_path, source))?;

        if new_bucket {
            self.set_permissions(log_path)?;
        }

        Ok(log_file)
    }

    /// Set the permissions for a file based on the configured file mode.
    ///
    /// Only has an effect when a file mode has been configured and the
    /// platform is Unix-like. Elsewhere a warning is logged and nothing
    /// happens.
    fn set_permissions(&self, path: &Path) -> Result<(), RollError> {
        if let Some(mode) = self.file_mode {
            #[cfg(unix)]
            {
                let perms = Permissions::from_mode(mode);
                fs::set_permissions(path, perms)
                    .map_err(|source| RollError::file_access(FileOp::SetPermissions, path, source))?
            }
            #[cfg(not(unix))]
            {
                let _ = mode;
                tracing::warn!(
                    path = %path.display(),
                    "setting file permissions is not supported on non-Unix platforms"
                );
            }
        }
        Ok(())
    }
}

/// Rotating append-only log writer.
///
/// Every call to [`append`](LogRotator::append) picks a bucket, opens its
/// file in append mode, writes the whole payload and closes the file
/// again.
///
/// The rotator takes `&mut self` for writes and has no internal locking.
/// Callers that write from several threads must serialize access
/// themselves.
pub struct LogRotator {
    meta: LogRotatorMeta,
    state: LogRotatorState,
    clock: Box<dyn Clock>,
}

impl LogRotator {
    /// Create a rotator from the three configuration strings.
    ///
    /// # Arguments
    /// * `directory` - Where bucket files are written.
    /// * `rotation_interval` - A duration such as `"1h30m"`, at least `1s`.
    /// * `rotation_size` - A size such as `"10MiB"`.
    ///
    /// ```
    /// use rotalog::{ConfigError, LogRotator};
    ///
    /// let rotator = LogRotator::new("./logs", "1h", "10MiB").unwrap();
    /// assert_eq!(rotator.policy().max_bytes(), 10 * 1024 * 1024);
    ///
    /// let err = LogRotator::new("./logs", "500ms", "10MiB").unwrap_err();
    /// assert!(matches!(err, ConfigError::DurationTooSmall(_)));
    /// ```
    pub fn new<P: AsRef<Path>>(directory: P, rotation_interval: &str, rotation_size: &str) -> Result<Self, ConfigError> {
        LogRotatorBuilder::new(directory)
            .rotation_interval(parse_interval(rotation_interval)?)
            .rotation_size(rotation_size.parse()?)
            .build()
    }

    /// Append `buf` to the file of the bucket it belongs to.
    ///
    /// Returns the number of bytes written, which is always `buf.len()` on
    /// success.
    ///
    /// If the size check cannot stat the active file, nothing changes and
    /// the error is returned. If the bucket was decided but opening or
    /// writing the file fails, the new bucket stays in effect and the
    /// payload is lost; retry the write to land it in that bucket.
    pub fn append(&mut self, buf: &[u8]) -> Result<usize, RollError> {
        let now = self.clock.now();
        let meta = &self.meta;

        let decision = meta
            .policy
            .decide(now, self.state.bucket_start, buf.len() as u64, |start| {
                meta.file_size(&meta.bucket_path(start))
            })?;
        self.state.bucket_start = Some(decision.bucket_start);

        let log_path = meta.bucket_path(decision.bucket_start);
        if decision.rotated() {
            tracing::debug!(
                trigger = ?decision.trigger,
                path = %log_path.display(),
                "starting new log bucket"
            );
        }

        let mut log_file = meta.open_log_file(&log_path, decision.rotated())?;
        log_file
            .write_all(buf)
            .map_err(|source| RollError::file_access(FileOp::Write, &log_path, source))?;
        tracing::trace!(bytes = buf.len(), path = %log_path.display(), "appended to log bucket");

        Ok(buf.len())
    }

    /// Start of the active bucket, `None` before the first write.
    pub fn bucket_start(&self) -> Option<DateTime<Utc>> {
        self.state.bucket_start
    }

    /// Path of the active bucket's file, `None` before the first write.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state.bucket_start.map(|start| self.meta.bucket_path(start))
    }

    /// Directory the bucket files are written to.
    pub fn directory(&self) -> &Path {
        &self.meta.directory
    }

    /// Interval and size thresholds the rotator was built with.
    pub fn policy(&self) -> RotationPolicy {
        self.meta.policy
    }

    /// List this rotator's bucket files, oldest first.
    pub fn list_log_files(&self) -> Result<Vec<PathBuf>, RollError> {
        list_log_files(&self.meta.directory)
    }
}

impl fmt::Debug for LogRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRotator")
            .field("meta", &self.meta)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl io::Write for LogRotator {
    /// Each call is one append, so a record split across several `write`
    /// calls may straddle a rotation. Write whole records at once.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf).map_err(io::Error::other)
    }

    /// Nothing is buffered between writes.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The filesystem operation behind a [`RollError::FileAccess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Stat,
    Open,
    Write,
    CreateDir,
    SetPermissions,
    ReadDir,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileOp::Stat => "stat",
            FileOp::Open => "open",
            FileOp::Write => "write",
            FileOp::CreateDir => "create directory",
            FileOp::SetPermissions => "set permissions on",
            FileOp::ReadDir => "read directory",
        })
    }
}

/// Errors raised while validating rotator configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Rotation interval must be at least 1s, got {0:?}")]
    DurationTooSmall(Duration),
    #[error("Could not parse rotation interval '{input}': {source}")]
    MalformedDuration {
        input: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("Unknown file size unit '{0}'")]
    UnknownUnit(String),
    #[error("Could not parse file size '{0}'")]
    MalformedNumber(String),
}

/// Errors that can occur when using the rotator.
#[derive(Debug, thiserror::Error)]
pub enum RollError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to {op} '{path}': {source}")]
    FileAccess {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RollError {
    fn file_access(op: FileOp, path: &Path, source: io::Error) -> Self {
        RollError::FileAccess {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Provides a fluent interface for configuring [`LogRotator`] instances.
///
/// # Default Configuration
///
/// * Rotate every 24 hours
/// * Rotate at 100 MiB
/// * File names in UTC
/// * Files created with mode `0o666`, filtered by the umask
/// * System clock
///
/// # Examples
///
/// ```rust
/// use rotalog::{LogRotatorBuilder, RotationSize, TimeZone};
/// use std::time::Duration;
///
/// let rotator = LogRotatorBuilder::new("./logs")
///     .rotation_interval(Duration::from_secs(60 * 60))
///     .rotation_size(RotationSize::MiB(10))
///     .time_zone(TimeZone::Local)
///     .file_mode(0o640)
///     .build()
///     .unwrap();
/// assert!(rotator.bucket_start().is_none());
/// ```
pub struct LogRotatorBuilder {
    directory: PathBuf,
    rotation_interval: Duration,
    rotation_size: RotationSize,
    time_zone: TimeZone,
    file_mode: Option<u32>,
    clock: Box<dyn Clock>,
}

impl LogRotatorBuilder {
    /// Create a new rotator builder.
    /// # Arguments
    /// * `directory` - The directory where the log files are stored. Trailing
    ///   separators are ignored; an empty path means the working directory.
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        LogRotatorBuilder {
            directory: directory.as_ref().components().collect(),
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            rotation_size: RotationSize::MiB(100),
            time_zone: TimeZone::UTC,
            file_mode: None,
            clock: Box::new(SystemClock),
        }
    }

    /// Set how long a bucket may span. Must be at least one second.
    pub fn rotation_interval(self, rotation_interval: Duration) -> Self {
        Self {
            rotation_interval,
            ..self
        }
    }

    /// Set the file size at which a new bucket starts.
    pub fn rotation_size(self, rotation_size: RotationSize) -> Self {
        Self { rotation_size, ..self }
    }

    /// Set the time zone for the log file names.
    pub fn time_zone(self, time_zone: TimeZone) -> Self {
        Self { time_zone, ..self }
    }

    /// Set the file permissions for log files (Unix-like systems only).
    /// This sets the file mode bits in octal notation like when using chmod.
    /// For example, 0o644 for rw-r--r-- permissions.
    pub fn file_mode(self, mode: u32) -> Self {
        Self {
            file_mode: Some(mode),
            ..self
        }
    }

    /// Replace the time source.
    pub fn clock<C: Clock + 'static>(self, clock: C) -> Self {
        Self {
            clock: Box::new(clock),
            ..self
        }
    }

    /// Build the rotator. No file is touched until the first write.
    pub fn build(self) -> Result<LogRotator, ConfigError> {
        Ok(LogRotator {
            meta: LogRotatorMeta {
                directory: self.directory,
                policy: RotationPolicy::new(self.rotation_interval, self.rotation_size.bytes())?,
                time_zone: self.time_zone.offset(),
                file_mode: self.file_mode,
            },
            state: LogRotatorState::default(),
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, nanos).unwrap()
    }

    fn policy(interval_secs: u64, max_bytes: u64) -> RotationPolicy {
        RotationPolicy::new(Duration::from_secs(interval_secs), max_bytes).unwrap()
    }

    fn no_stat(_: DateTime<Utc>) -> Result<u64, io::Error> {
        panic!("size rule must not be evaluated")
    }

    #[test]
    fn parse_size_binary_units() {
        assert_eq!(parse_size("7B").unwrap(), 7);
        assert_eq!(parse_size("3KiB").unwrap(), 3 * 1024);
        assert_eq!(parse_size("10MiB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("1GiB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("0B").unwrap(), 0);
    }

    #[test]
    fn parse_size_unknown_unit_names_suffix() {
        let err = parse_size("5TB").unwrap_err();
        assert!(matches!(&err, ConfigError::UnknownUnit(unit) if unit == "TB"));
        assert_eq!(err.to_string(), "Unknown file size unit 'TB'");

        assert!(matches!(parse_size("10"), Err(ConfigError::UnknownUnit(unit)) if unit.is_empty()));
        assert!(matches!(parse_size("10mib"), Err(ConfigError::UnknownUnit(unit)) if unit == "mib"));
        assert!(matches!(parse_size("10KB"), Err(ConfigError::UnknownUnit(unit)) if unit == "KB"));
    }

    #[test]
    fn parse_size_reports_original_number() {
        assert!(matches!(parse_size("abcMiB"), Err(ConfigError::MalformedNumber(n)) if n == "abc"));
        assert!(matches!(parse_size("MiB"), Err(ConfigError::MalformedNumber(n)) if n.is_empty()));
        assert!(matches!(parse_size("-5KiB"), Err(ConfigError::MalformedNumber(n)) if n == "-5"));
        assert!(matches!(parse_size("1.5GiB"), Err(ConfigError::MalformedNumber(n)) if n == "1.5"));
        assert!(matches!(parse_size(" 5B"), Err(ConfigError::MalformedNumber(n)) if n == " 5"));
        assert!(matches!(
            parse_size("99999999999999999999B"),
            Err(ConfigError::MalformedNumber(n)) if n == "99999999999999999999"
        ));
    }

    #[test]
    fn parse_size_rejects_overflowing_product() {
        let input = format!("{}GiB", u64::MAX);
        assert!(matches!(parse_size(&input), Err(ConfigError::MalformedNumber(n)) if n == input));
    }

    #[test]
    fn rotation_size_from_str() {
        assert_eq!("4KiB".parse::<RotationSize>().unwrap(), RotationSize::KiB(4));
        assert_eq!("12B".parse::<RotationSize>().unwrap(), RotationSize::Bytes(12));
        assert_eq!(RotationSize::GiB(2).bytes(), 2 << 30);
        assert_eq!(RotationSize::GiB(u64::MAX).bytes(), u64::MAX);
    }

    #[test]
    fn parse_interval_accepts_composed_units() {
        assert_eq!(parse_interval("1h30m").unwrap(), Duration::from_secs(90 * 60));
        assert_eq!(parse_interval("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_interval("1500ms").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn parse_interval_rejects_sub_second() {
        let err = parse_interval("500ms").unwrap_err();
        assert!(matches!(err, ConfigError::DurationTooSmall(d) if d == Duration::from_millis(500)));
        assert!(matches!(
            parse_interval("999ms 999us"),
            Err(ConfigError::DurationTooSmall(_))
        ));
    }

    #[test]
    fn parse_interval_rejects_garbage() {
        let err = parse_interval("soon").unwrap_err();
        assert!(matches!(&err, ConfigError::MalformedDuration { input, .. } if input == "soon"));
        assert!(err.to_string().starts_with("Could not parse rotation interval 'soon'"));
        assert!(matches!(parse_interval(""), Err(ConfigError::MalformedDuration { .. })));
    }

    #[test]
    fn policy_rejects_sub_second_interval() {
        assert!(matches!(
            RotationPolicy::new(Duration::from_millis(999), 10),
            Err(ConfigError::DurationTooSmall(_))
        ));
    }

    #[test]
    fn first_write_opens_bucket_at_now() {
        let decision = policy(60, 100).decide(at(5, 0), None, 10, no_stat).unwrap();
        assert_eq!(
            decision,
            Decision {
                bucket_start: at(5, 0),
                trigger: Trigger::Init
            }
        );
        assert!(decision.rotated());
    }

    #[test]
    fn elapsed_intervals_fast_forward() {
        let decision = policy(1, 100)
            .decide(at(2, 500_000_000), Some(at(0, 0)), 10, no_stat)
            .unwrap();
        assert_eq!(decision.bucket_start, at(2, 0));
        assert_eq!(decision.trigger, Trigger::Interval { intervals: 2 });
    }

    #[test]
    fn exact_interval_boundary_rotates() {
        let decision = policy(60, 100).decide(at(60, 0), Some(at(0, 0)), 1, no_stat).unwrap();
        assert_eq!(decision.bucket_start, at(60, 0));
        assert_eq!(decision.trigger, Trigger::Interval { intervals: 1 });
    }

    #[test]
    fn long_idle_skips_to_current_bucket() {
        let start = at(0, 250);
        let decision = policy(3600, 100)
            .decide(at(10 * 24 * 3600 + 1800, 0), Some(start), 1, no_stat)
            .unwrap();
        assert_eq!(decision.bucket_start, at(240 * 3600, 250));
        assert_eq!(decision.trigger, Trigger::Interval { intervals: 240 });
    }

    #[test]
    fn size_threshold_starts_bucket_at_now() {
        let checked = Cell::new(None);
        let decision = policy(60, 100)
            .decide(at(1, 0), Some(at(0, 0)), 60, |start| {
                checked.set(Some(start));
                Ok::<_, io::Error>(60)
            })
            .unwrap();
        assert_eq!(checked.get(), Some(at(0, 0)));
        assert_eq!(decision.bucket_start, at(1, 0));
        assert_eq!(decision.trigger, Trigger::Size);
    }

    #[test]
    fn size_threshold_is_inclusive() {
        let decision = policy(60, 100)
            .decide(at(1, 0), Some(at(0, 0)), 40, |_| Ok::<_, io::Error>(60))
            .unwrap();
        assert_eq!(decision.trigger, Trigger::Size);

        let decision = policy(60, 100)
            .decide(at(1, 0), Some(at(0, 0)), 39, |_| Ok::<_, io::Error>(60))
            .unwrap();
        assert_eq!(decision.trigger, Trigger::None);
        assert_eq!(decision.bucket_start, at(0, 0));
        assert!(!decision.rotated());
    }

    #[test]
    fn interval_takes_priority_over_size() {
        // Payload alone exceeds the threshold, yet only one advance happens.
        let decision = policy(1, 10).decide(at(3, 0), Some(at(0, 0)), 1_000, no_stat).unwrap();
        assert_eq!(decision.trigger, Trigger::Interval { intervals: 3 });
        assert_eq!(decision.bucket_start, at(3, 0));
    }

    #[test]
    fn stat_error_propagates() {
        let err = policy(60, 100)
            .decide(at(1, 0), Some(at(0, 0)), 1, |_| {
                Err::<u64, _>(io::Error::from(io::ErrorKind::NotFound))
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn clock_going_backwards_never_moves_bucket_back() {
        let decision = policy(60, 100)
            .decide(at(-30, 0), Some(at(0, 0)), 1, |_| Ok::<_, io::Error>(0))
            .unwrap();
        assert_eq!(decision.trigger, Trigger::None);
        assert_eq!(decision.bucket_start, at(0, 0));

        let decision = policy(60, 100)
            .decide(at(-30, 0), Some(at(0, 0)), 100, |_| Ok::<_, io::Error>(0))
            .unwrap();
        assert_eq!(decision.trigger, Trigger::Size);
        assert_eq!(decision.bucket_start, at(0, 1));
    }

    #[test]
    fn size_rotation_on_frozen_clock_moves_past_full_bucket() {
        let decision = policy(60, 100)
            .decide(at(0, 0), Some(at(0, 0)), 60, |_| Ok::<_, io::Error>(60))
            .unwrap();
        assert_eq!(decision.trigger, Trigger::Size);
        assert_eq!(decision.bucket_start, at(0, 1));
        assert!(decision.rotated());
    }

    #[test]
    fn file_name_layout() {
        let start = DateTime::from_timestamp(1_760_716_442, 123_456_789).unwrap();
        assert_eq!(
            bucket_file_name(start, Utc.fix()),
            "2025-10-17T15-54-02.123456789+0000.log"
        );
        let east = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(bucket_file_name(start, east), "2025-10-17T23-54-02.123456789+0800.log");
        let west = FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap();
        assert_eq!(bucket_file_name(start, west), "2025-10-17T10-24-02.123456789-0530.log");
    }

    #[test]
    fn file_names_sort_chronologically() {
        let pattern = Regex::new(BUCKET_FILE_PATTERN).unwrap();
        let starts = [
            at(0, 0),
            at(0, 9),
            at(0, 10),
            at(0, 999_999_999),
            at(9, 0),
            at(10, 0),
            at(86_400 * 400, 1),
        ];
        let names: Vec<String> = starts.iter().map(|s| bucket_file_name(*s, Utc.fix())).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.iter().all(|n| pattern.is_match(n)));
    }

    #[test]
    fn directory_trailing_separators_are_ignored() {
        let start = at(0, 0);
        let expected = PathBuf::from("logs").join(bucket_file_name(start, Utc.fix()));
        for dir in ["logs", "logs/", "logs//"] {
            let rotator = LogRotatorBuilder::new(dir).build().unwrap();
            assert_eq!(rotator.directory(), Path::new("logs"));
            assert_eq!(rotator.meta.bucket_path(start), expected);
        }
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(at(0, 0));
        let handle = clock.clone();
        handle.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), at(1, 500_000_000));
        handle.set(at(-5, 0));
        assert_eq!(clock.now(), at(-5, 0));
    }

    #[test]
    fn builder_defaults() {
        let rotator = LogRotatorBuilder::new("logs").build().unwrap();
        assert_eq!(rotator.policy().interval(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(rotator.policy().max_bytes(), 100 * 1024 * 1024);
        assert_eq!(rotator.meta.time_zone, Utc.fix());
        assert!(rotator.bucket_start().is_none());
        assert!(rotator.current_path().is_none());
    }

    #[test]
    fn file_access_error_message_names_operation_and_path() {
        let err = RollError::file_access(
            FileOp::Stat,
            Path::new("logs/a.log"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(err.to_string().starts_with("Failed to stat 'logs/a.log': "));
    }
}
