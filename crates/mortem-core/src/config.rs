//! # Session Configuration
//!
//! Tunables for a [`crate::controller::SessionController`] and the session it
//! drives. Built with `with_*` methods or loaded from the environment:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `MORTEM_WAIT_TIMEOUT_MS` | wait bound for stop events, `0` = wait forever | `30000` |
//! | `MORTEM_MAX_FRAMES` | unwind depth cap | `256` |
//! | `MORTEM_PLATFORM` | platform override (`darwin`, `linux`, ...) | inferior's |
//! | `MORTEM_CSTRING_LIMIT` | max bytes read for a `char *` summary | `256` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MortemError, MortemResult};
use crate::types::Platform;

/// Environment variable for the wait timeout in milliseconds.
pub const ENV_WAIT_TIMEOUT_MS: &str = "MORTEM_WAIT_TIMEOUT_MS";
/// Environment variable for the unwind depth cap.
pub const ENV_MAX_FRAMES: &str = "MORTEM_MAX_FRAMES";
/// Environment variable for the platform override.
pub const ENV_PLATFORM: &str = "MORTEM_PLATFORM";
/// Environment variable for the C string summary limit.
pub const ENV_CSTRING_LIMIT: &str = "MORTEM_CSTRING_LIMIT";

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FRAMES: usize = 256;
const DEFAULT_CSTRING_LIMIT: usize = 256;

/// Configuration for an inspection session
///
/// ```rust
/// use std::time::Duration;
///
/// use mortem_core::config::SessionConfig;
/// use mortem_core::types::Platform;
///
/// let config = SessionConfig::default()
///     .with_wait_timeout(Some(Duration::from_millis(500)))
///     .with_platform(Platform::Darwin)
///     .with_max_frames(16);
/// assert_eq!(config.max_frames, 16);
/// assert_eq!(config.platform, Some(Platform::Darwin));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig
{
    /// How long a blocking call waits for a stop or exit event. `None`
    /// waits forever.
    pub wait_timeout: Option<Duration>,
    /// Maximum number of frames an unwind yields.
    pub max_frames: usize,
    /// Platform override; `None` asks the inferior.
    pub platform: Option<Platform>,
    /// Maximum bytes read when summarizing a `char *`.
    pub cstring_limit: usize,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        Self {
            wait_timeout: Some(DEFAULT_WAIT_TIMEOUT),
            max_frames: DEFAULT_MAX_FRAMES,
            platform: None,
            cstring_limit: DEFAULT_CSTRING_LIMIT,
        }
    }
}

impl SessionConfig
{
    /// Set the wait bound.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self
    {
        self.wait_timeout = timeout;
        self
    }

    /// Set the unwind depth cap (at least one frame).
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: usize) -> Self
    {
        self.max_frames = max_frames.max(1);
        self
    }

    /// Force the platform used for classification and the step policy.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self
    {
        self.platform = Some(platform);
        self
    }

    /// Set the C string summary limit.
    #[must_use]
    pub fn with_cstring_limit(mut self, limit: usize) -> Self
    {
        self.cstring_limit = limit;
        self
    }

    /// Defaults overridden by the `MORTEM_*` environment variables.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` if a variable is set but does not parse.
    pub fn from_env() -> MortemResult<Self>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`], reading values through `lookup`.
    ///
    /// ```rust
    /// use mortem_core::config::SessionConfig;
    ///
    /// let config = SessionConfig::from_lookup(|key| match key {
    ///     "MORTEM_WAIT_TIMEOUT_MS" => Some("0".to_string()),
    ///     "MORTEM_PLATFORM" => Some("android".to_string()),
    ///     _ => None,
    /// })?;
    /// assert_eq!(config.wait_timeout, None);
    /// # Ok::<(), mortem_core::error::MortemError>(())
    /// ```
    pub fn from_lookup<F>(lookup: F) -> MortemResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(millis) = lookup(ENV_WAIT_TIMEOUT_MS) {
            let millis: u64 = parse_var(ENV_WAIT_TIMEOUT_MS, &millis)?;
            config.wait_timeout = (millis > 0).then_some(Duration::from_millis(millis));
        }
        if let Some(frames) = lookup(ENV_MAX_FRAMES) {
            let frames: usize = parse_var(ENV_MAX_FRAMES, &frames)?;
            if frames == 0 {
                return Err(MortemError::InvalidArgument(format!("{ENV_MAX_FRAMES} must be at least 1")));
            }
            config.max_frames = frames;
        }
        if let Some(platform) = lookup(ENV_PLATFORM) {
            config.platform = Some(platform.parse()?);
        }
        if let Some(limit) = lookup(ENV_CSTRING_LIMIT) {
            config.cstring_limit = parse_var(ENV_CSTRING_LIMIT, &limit)?;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> MortemResult<T>
{
    value
        .trim()
        .parse()
        .map_err(|_| MortemError::InvalidArgument(format!("{key}: cannot parse {value:?}")))
}
