//! Run settings loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working configuration against the quote endpoint.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target: TargetSettings,
    pub timing: TimingSettings,
    pub proxies: ProxySettings,
    pub store: StoreSettings,
    pub export: ExportSettings,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("bad settings {}: {msg}", path.display())),
            other => other,
        })
    }

    /// Load settings from a file if it exists, falling back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate settings.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would stall or abort a run partway through.
    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        timing.politeness.validate("timing.politeness")?;
        timing.backoff.validate("timing.backoff")?;
        timing.cooldown.validate("timing.cooldown")?;
        if !(timing.backoff_growth.is_finite() && timing.backoff_growth > 0.0) {
            return Err(Error::Config(format!(
                "timing.backoff_growth must be a positive number, got {}",
                timing.backoff_growth
            )));
        }
        if timing.max_attempts == 0 {
            return Err(Error::Config("timing.max_attempts must be at least 1".to_string()));
        }
        if !valid_secs(self.store.retry_delay_secs) {
            return Err(Error::Config(format!(
                "store.retry_delay_secs must be within 0..={MAX_DELAY_SECS}, got {}",
                self.store.retry_delay_secs
            )));
        }
        if self.store.max_consecutive_failures == 0 {
            return Err(Error::Config(
                "store.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        for field in &self.target.random_fields {
            if field.min > field.max {
                return Err(Error::Config(format!(
                    "random field {} has min {} above max {}",
                    field.name, field.min, field.max
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Target endpoint and request template
// ---------------------------------------------------------------------------

/// A form field filled with a random integer in `min..=max` per request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RandomField {
    pub name: String,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// POST endpoint receiving the quote form.
    pub endpoint: String,
    /// Page fetched after a session refresh to pick up fresh cookies.
    pub warmup_url: String,
    pub timeout_secs: u64,
    pub warmup_timeout_secs: u64,
    /// A 200 whose body contains this marker is treated as rate-limited.
    pub rate_limit_marker: String,
    /// Headers sent with every request. The user agent is set per attempt.
    pub headers: BTreeMap<String, String>,
    /// Static form fields.
    pub form: BTreeMap<String, String>,
    pub key_field: String,
    pub name_field: String,
    pub email_field: String,
    pub phone_field: String,
    pub random_fields: Vec<RandomField>,
}

impl Default for TargetSettings {
    fn default() -> Self {
        let headers = [
            ("authority", "unitsstorage.com"),
            ("accept", "application/json, text/javascript, */*; q=0.01"),
            ("accept-language", "en-US,en;q=0.9"),
            ("origin", "https://unitsstorage.com"),
            ("referer", "https://unitsstorage.com/san-antonio-tx/storage-calculator/"),
            ("x-requested-with", "XMLHttpRequest"),
        ];
        let form = [
            ("action", "submit_quote_function"),
            ("data[date]", "09/29/2025"),
            ("data[discount]", "n"),
            ("data[distance]", "0"),
            ("data[formtype]", "storage"),
            ("data[homecubicft]", "830"),
            ("data[homelinearft]", "12"),
            ("data[ldate]", "2025-09-26"),
            ("data[location]", "onsite"),
            ("data[months]", "1"),
            ("data[newsletter]", "false"),
            ("data[q]", "quoterequest"),
            ("data[sixteens]", "0"),
            ("data[warehouseDistance]", "0"),
            ("data[zip2]", ""),
            ("data[promocode]", ""),
            ("data[track]", ""),
            ("track", ""),
        ];

        Self {
            endpoint: "https://unitsstorage.com/san-antonio-tx/wp-admin/admin-ajax.php".to_string(),
            warmup_url: "https://unitsstorage.com/san-antonio-tx/storage-calculator/".to_string(),
            timeout_secs: 30,
            warmup_timeout_secs: 10,
            rate_limit_marker: "\"limit_reached\"".to_string(),
            headers: to_map(&headers),
            form: to_map(&form),
            key_field: "data[zip1]".to_string(),
            name_field: "data[name]".to_string(),
            email_field: "data[email]".to_string(),
            phone_field: "data[phone]".to_string(),
            random_fields: vec![
                RandomField {
                    name: "data[rooms]".to_string(),
                    min: 2,
                    max: 5,
                },
                RandomField {
                    name: "data[twelves]".to_string(),
                    min: 1,
                    max: 5,
                },
            ],
        }
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Upper bound for any configured delay: one day.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

fn valid_secs(secs: f64) -> bool {
    secs.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&secs)
}

fn clamp_secs(secs: f64) -> f64 {
    if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, MAX_DELAY_SECS)
    }
}

/// A uniform random delay range, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DelayWindow {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayWindow {
    pub const ZERO: DelayWindow = DelayWindow {
        min_secs: 0.0,
        max_secs: 0.0,
    };

    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    /// This window with both bounds multiplied by `factor`.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            min_secs: self.min_secs * factor,
            max_secs: self.max_secs * factor,
        }
    }

    /// Draw a delay uniformly from the window. Bounds are clamped to
    /// `0..=MAX_DELAY_SECS`, so a grown backoff never overflows.
    pub fn sample<R: rand::Rng>(&self, rng: &mut R) -> Duration {
        let lo = clamp_secs(self.min_secs);
        let hi = clamp_secs(self.max_secs).max(lo);
        let secs = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if valid_secs(self.min_secs) && valid_secs(self.max_secs) && self.min_secs <= self.max_secs {
            return Ok(());
        }
        Err(Error::Config(format!(
            "{name} must satisfy 0 <= min_secs <= max_secs <= {MAX_DELAY_SECS}, got {}..{}",
            self.min_secs, self.max_secs
        )))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Pre-request delay before every attempt.
    pub politeness: DelayWindow,
    /// Delay between attempts for the same item.
    pub backoff: DelayWindow,
    /// Multiplier applied to the backoff window per retry index. 1.0 keeps it flat.
    pub backoff_growth: f64,
    /// Long pause taken every `cooldown_every` processed items.
    pub cooldown: DelayWindow,
    pub cooldown_every: u64,
    pub checkpoint_every: u64,
    pub max_attempts: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            politeness: DelayWindow::new(3.0, 10.0),
            backoff: DelayWindow::new(15.0, 30.0),
            backoff_growth: 1.0,
            cooldown: DelayWindow::new(120.0, 300.0),
            cooldown_every: 200,
            checkpoint_every: 50,
            max_attempts: 2,
        }
    }
}

impl TimingSettings {
    /// No waiting at all. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            politeness: DelayWindow::ZERO,
            backoff: DelayWindow::ZERO,
            cooldown: DelayWindow::ZERO,
            ..Self::default()
        }
    }

    /// Backoff window for the given zero-based retry index.
    pub fn backoff_window(&self, retry_index: u32) -> DelayWindow {
        let growth = if self.backoff_growth.is_finite() && self.backoff_growth > 0.0 {
            self.backoff_growth
        } else {
            1.0
        };
        self.backoff.scaled(growth.powi(retry_index.min(i32::MAX as u32) as i32))
    }
}

// ---------------------------------------------------------------------------
// Proxies, store, export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// When false, every request goes out directly.
    pub enabled: bool,
    /// Static proxy endpoints.
    pub list: Vec<String>,
    /// URL returning a newline-separated proxy list. Takes precedence over `list`.
    pub source_url: Option<String>,
    pub fetch_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            list: Vec::new(),
            source_url: None,
            fetch_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// An `in_progress` item untouched for this long is considered stalled.
    pub stall_after_secs: u64,
    /// Consecutive claim (or terminal mark) failures tolerated before the
    /// run aborts.
    pub max_consecutive_failures: u32,
    /// Pause between claim retries after a store failure.
    pub retry_delay_secs: f64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            stall_after_secs: 15 * 60,
            max_consecutive_failures: 3,
            retry_delay_secs: 5.0,
        }
    }
}

impl StoreSettings {
    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_after_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(clamp_secs(self.retry_delay_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "storage_prices".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn flat_backoff_by_default() {
        let timing = TimingSettings::default();
        assert_eq!(timing.backoff_window(0), timing.backoff_window(3));
    }

    #[test]
    fn growth_widens_backoff_per_retry() {
        let timing = TimingSettings {
            backoff_growth: 2.0,
            ..TimingSettings::default()
        };
        assert_eq!(timing.backoff_window(2), DelayWindow::new(60.0, 120.0));
    }

    #[test]
    fn sample_stays_inside_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let window = DelayWindow::new(3.0, 10.0);
        for _ in 0..200 {
            let d = window.sample(&mut rng).as_secs_f64();
            assert!((3.0..=10.0).contains(&d), "{d} outside window");
        }
        assert_eq!(DelayWindow::ZERO.sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn unbounded_window_is_clamped() {
        let mut rng = StdRng::seed_from_u64(7);
        let d = DelayWindow::new(0.0, f64::INFINITY).sample(&mut rng);
        assert!(d <= Duration::from_secs_f64(MAX_DELAY_SECS));
        assert_eq!(DelayWindow::new(f64::NAN, f64::NAN).sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn runaway_growth_stays_sampleable() {
        let timing = TimingSettings {
            backoff_growth: 1e6,
            ..TimingSettings::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let d = timing.backoff_window(100).sample(&mut rng);
        assert_eq!(d, Duration::from_secs_f64(MAX_DELAY_SECS));
    }

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }
}
