//! Engine configuration.
//!
//! Built once through [`ConfigBuilder`] and immutable afterwards. All strings
//! are copied into fixed-size buffers, so the builder is where length and
//! topic-level validation happens.

use embassy_time::Duration;
use heapless::String;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;
use crate::value::is_valid_level;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;
pub const MAX_BROKER_LEN: usize = 64;
pub const MAX_PREFIX_LEN: usize = 32;
pub const MAX_DEVICE_ID_LEN: usize = 32;

/// Topic prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "register";

/// Validated, immutable engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) ssid: String<MAX_SSID_LEN>,
    pub(crate) password: String<MAX_PASSWORD_LEN>,
    pub(crate) broker: String<MAX_BROKER_LEN>,
    pub(crate) prefix: String<MAX_PREFIX_LEN>,
    pub(crate) device_id: String<MAX_DEVICE_ID_LEN>,
    pub(crate) client_id: String<MAX_DEVICE_ID_LEN>,
    pub(crate) debug: bool,
    pub(crate) poll_interval: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) wifi_backoff: BackoffPolicy,
    pub(crate) broker_backoff: BackoffPolicy,
    pub(crate) set_batch_limit: usize,
}

impl Config {
    /// Starts a configuration for the given device id.
    pub fn builder(device_id: &str) -> ConfigBuilder<'_> {
        ConfigBuilder::new(device_id)
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn wifi_backoff(&self) -> &BackoffPolicy {
        &self.wifi_backoff
    }

    pub fn broker_backoff(&self) -> &BackoffPolicy {
        &self.broker_backoff
    }

    pub fn set_batch_limit(&self) -> usize {
        self.set_batch_limit
    }

    /// Seed for backoff jitter, derived from the device id so that devices
    /// sharing a broker spread their retries differently.
    pub(crate) fn jitter_seed(&self) -> u32 {
        // FNV-1a
        self.device_id.bytes().fold(0x811C_9DC5u32, |hash, b| {
            (hash ^ b as u32).wrapping_mul(0x0100_0193)
        })
    }
}

/// Builder for [`Config`].
///
/// ```ignore
/// let config = Config::builder("boiler")
///     .with_wifi("home", "secret")
///     .with_broker("192.168.1.10:1883")
///     .with_debug(true)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder<'a> {
    device_id: &'a str,
    ssid: &'a str,
    password: &'a str,
    broker: &'a str,
    prefix: &'a str,
    client_id: Option<&'a str>,
    debug: bool,
    poll_interval: Duration,
    connect_timeout: Duration,
    wifi_backoff: BackoffPolicy,
    broker_backoff: BackoffPolicy,
    set_batch_limit: usize,
}

impl<'a> ConfigBuilder<'a> {
    pub fn new(device_id: &'a str) -> Self {
        Self {
            device_id,
            ssid: "",
            password: "",
            broker: "",
            prefix: DEFAULT_PREFIX,
            client_id: None,
            debug: false,
            poll_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(10),
            wifi_backoff: BackoffPolicy::default(),
            broker_backoff: BackoffPolicy::default(),
            set_batch_limit: 8,
        }
    }

    pub fn with_wifi(mut self, ssid: &'a str, password: &'a str) -> Self {
        self.ssid = ssid;
        self.password = password;
        self
    }

    pub fn with_broker(mut self, broker: &'a str) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }

    /// Overrides the MQTT client id, which defaults to the device id.
    pub fn with_client_id(mut self, client_id: &'a str) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_wifi_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.wifi_backoff = policy;
        self
    }

    pub fn with_broker_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.broker_backoff = policy;
        self
    }

    /// Maximum number of inbound messages handled per tick.
    pub fn with_set_batch_limit(mut self, limit: usize) -> Self {
        self.set_batch_limit = limit;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if !is_valid_level(self.device_id) {
            return Err(ConfigError::InvalidDeviceId);
        }
        if !is_valid_prefix(self.prefix) {
            return Err(ConfigError::InvalidPrefix);
        }
        if self.ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        if self.broker.is_empty() {
            return Err(ConfigError::MissingBroker);
        }
        let client_id = self.client_id.unwrap_or(self.device_id);
        if client_id.is_empty() {
            return Err(ConfigError::InvalidClientId);
        }
        if self.poll_interval.as_ticks() == 0 || self.connect_timeout.as_ticks() == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        self.wifi_backoff.validate()?;
        self.broker_backoff.validate()?;
        if self.set_batch_limit == 0 {
            return Err(ConfigError::InvalidBatchLimit);
        }

        Ok(Config {
            ssid: copy(self.ssid, "ssid")?,
            password: copy(self.password, "password")?,
            broker: copy(self.broker, "broker")?,
            prefix: copy(self.prefix, "prefix")?,
            device_id: copy(self.device_id, "device id")?,
            client_id: copy(client_id, "client id")?,
            debug: self.debug,
            poll_interval: self.poll_interval,
            connect_timeout: self.connect_timeout,
            wifi_backoff: self.wifi_backoff,
            broker_backoff: self.broker_backoff,
            set_batch_limit: self.set_batch_limit,
        })
    }
}

fn copy<const N: usize>(s: &str, field: &'static str) -> Result<String<N>, ConfigError> {
    String::try_from(s).map_err(|_| ConfigError::TooLong(field))
}

/// A prefix is one or more topic levels joined by `/`.
fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.split('/').all(is_valid_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConfigBuilder<'static> {
        Config::builder("boiler")
            .with_wifi("home", "secret")
            .with_broker("10.0.0.2:1883")
    }

    #[test]
    fn defaults_are_applied() {
        let config = base().build().unwrap();
        assert_eq!(config.prefix(), DEFAULT_PREFIX);
        assert_eq!(config.client_id(), "boiler");
        assert!(!config.debug());
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.set_batch_limit(), 8);
    }

    #[test]
    fn prefix_may_have_several_levels() {
        let config = base().with_prefix("home/regs").build().unwrap();
        assert_eq!(config.prefix(), "home/regs");
        assert_eq!(
            base().with_prefix("home//regs").build().unwrap_err(),
            ConfigError::InvalidPrefix
        );
        assert_eq!(
            base().with_prefix("home/#").build().unwrap_err(),
            ConfigError::InvalidPrefix
        );
        assert_eq!(
            base().with_prefix("/home").build().unwrap_err(),
            ConfigError::InvalidPrefix
        );
    }

    #[test]
    fn rejects_invalid_identity() {
        assert_eq!(
            Config::builder("a/b")
                .with_wifi("home", "secret")
                .with_broker("b")
                .build()
                .unwrap_err(),
            ConfigError::InvalidDeviceId
        );
        assert_eq!(
            Config::builder("")
                .with_wifi("home", "")
                .with_broker("b")
                .build()
                .unwrap_err(),
            ConfigError::InvalidDeviceId
        );
        assert_eq!(
            base().with_client_id("").build().unwrap_err(),
            ConfigError::InvalidClientId
        );
    }

    #[test]
    fn rejects_missing_network_settings() {
        assert_eq!(
            Config::builder("boiler").with_broker("b").build().unwrap_err(),
            ConfigError::MissingSsid
        );
        assert_eq!(
            Config::builder("boiler")
                .with_wifi("home", "secret")
                .build()
                .unwrap_err(),
            ConfigError::MissingBroker
        );
    }

    #[test]
    fn rejects_bad_timing() {
        assert_eq!(
            base()
                .with_poll_interval(Duration::from_ticks(0))
                .build()
                .unwrap_err(),
            ConfigError::InvalidInterval
        );
        assert_eq!(
            base().with_set_batch_limit(0).build().unwrap_err(),
            ConfigError::InvalidBatchLimit
        );
        let broken = BackoffPolicy::new(Duration::from_secs(2), 2, Duration::from_secs(1));
        assert_eq!(
            base().with_broker_backoff(broken).build().unwrap_err(),
            ConfigError::InvalidBackoff
        );
    }

    #[test]
    fn rejects_oversized_strings() {
        let long = "s".repeat(MAX_SSID_LEN + 1);
        assert_eq!(
            Config::builder("boiler")
                .with_wifi(&long, "secret")
                .with_broker("b")
                .build()
                .unwrap_err(),
            ConfigError::TooLong("ssid")
        );
    }

    #[test]
    fn jitter_seed_depends_on_device() {
        let a = base().build().unwrap();
        let b = Config::builder("pump")
            .with_wifi("home", "secret")
            .with_broker("b")
            .build()
            .unwrap();
        assert_ne!(a.jitter_seed(), b.jitter_seed());
    }
}
