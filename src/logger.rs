//! Application-facing logger that composes structured events and ships them.
//!
//! Each call builds a nested document
//! `{message, metadata{..}, user_info{..}, errors[..]}`, flattens it, merges
//! the shipping token and hands it to the [`LogShipper`]. The message is also
//! mirrored to the `log` facade so local output keeps working.

use std::{
    error::Error,
    panic::Location,
    path::Path,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::{error::ShipError, level::ShipLevel, shipper::LogShipper};

pub const LOG_TYPE_KEY: &str = "log_type";
const MESSAGE_KEY: &str = "message";
const METADATA_KEY: &str = "metadata";
const USER_INFO_KEY: &str = "user_info";
const ERRORS_KEY: &str = "errors";

/// Static parts of every composed event.
#[derive(Clone, Debug, Default)]
struct Composer {
    defaults: Map<String, Value>,
    app_version: Option<String>,
}

impl Composer {
    fn compose(
        &self,
        level: ShipLevel,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
        user_info: Option<Map<String, Value>>,
        caller: &Location<'_>,
        now: DateTime<Utc>,
    ) -> Map<String, Value> {
        let mut event = Map::new();
        event.insert(MESSAGE_KEY.into(), Value::from(message));
        event.insert(
            METADATA_KEY.into(),
            Value::Object(self.metadata(caller, now)),
        );

        let mut info = self.defaults.clone();
        info.insert(LOG_TYPE_KEY.into(), Value::from(level.as_str()));
        info.extend(user_info.unwrap_or_default());
        event.insert(USER_INFO_KEY.into(), Value::Object(info));

        if let Some(error) = error {
            event.insert(ERRORS_KEY.into(), Value::Array(error_chain(error)));
        }
        event
    }

    fn metadata(&self, caller: &Location<'_>, now: DateTime<Utc>) -> Map<String, Value> {
        let file = Path::new(caller.file())
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(caller.file());
        let mut metadata = Map::new();
        metadata.insert("file".into(), Value::from(file));
        metadata.insert("line".into(), Value::from(caller.line().to_string()));
        metadata.insert("column".into(), Value::from(caller.column().to_string()));
        metadata.insert("os".into(), Value::from(std::env::consts::OS));
        metadata.insert(
            "timestamp".into(),
            Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        if let Some(version) = &self.app_version {
            metadata.insert("app_version".into(), Value::from(version.as_str()));
        }
        metadata
    }
}

/// One entry per error in the `source()` chain, outermost first.
fn error_chain(error: &(dyn Error + 'static)) -> Vec<Value> {
    std::iter::successors(Some(error), |&err| err.source())
        .enumerate()
        .map(|(depth, err)| {
            let mut entry = Map::new();
            entry.insert("error_description".into(), Value::from(err.to_string()));
            entry.insert("error_depth".into(), Value::from(depth));
            Value::Object(entry)
        })
        .collect()
}

fn level_from_u8(value: u8) -> ShipLevel {
    match value {
        0 => ShipLevel::Verbose,
        1 => ShipLevel::Debug,
        2 => ShipLevel::Info,
        3 => ShipLevel::Warning,
        _ => ShipLevel::Error,
    }
}

/// Structured logger on top of a [`LogShipper`].
#[derive(Debug)]
pub struct Logger {
    shipper: LogShipper,
    composer: Composer,
    min_level: AtomicU8,
    mirror_to_log: bool,
}

impl Logger {
    pub fn new(shipper: LogShipper) -> Self {
        Self {
            shipper,
            composer: Composer::default(),
            min_level: AtomicU8::new(ShipLevel::Verbose as u8),
            mirror_to_log: true,
        }
    }

    /// Fields merged into `user_info` of every event. Per-call values win.
    pub fn with_default_user_info(mut self, defaults: Map<String, Value>) -> Self {
        self.composer.defaults = defaults;
        self
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.composer.app_version = Some(version.into());
        self
    }

    /// Forward composed messages to the `log` facade. On by default.
    pub fn with_log_mirror(mut self, enabled: bool) -> Self {
        self.mirror_to_log = enabled;
        self
    }

    pub fn with_min_level(self, level: ShipLevel) -> Self {
        self.set_level(level);
        self
    }

    /// Drop events below `level` before they are composed.
    pub fn set_level(&self, level: ShipLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self) -> ShipLevel {
        level_from_u8(self.min_level.load(Ordering::Relaxed))
    }

    pub fn is_enabled_for(&self, level: ShipLevel) -> bool {
        level >= self.level()
    }

    pub fn shipper(&self) -> &LogShipper {
        &self.shipper
    }

    /// Compose an event at `level` and enqueue it for shipping.
    #[track_caller]
    pub fn log(
        &self,
        level: ShipLevel,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
        user_info: Option<Map<String, Value>>,
    ) -> Result<(), ShipError> {
        if !self.is_enabled_for(level) {
            return Ok(());
        }
        let caller = Location::caller();
        if self.mirror_to_log {
            log::log!(
                target: "logship",
                level.as_log_level(),
                "{}:{}: {message}",
                caller.file(),
                caller.line()
            );
        }
        let event = self
            .composer
            .compose(level, message, error, user_info, caller, Utc::now());
        self.shipper.ship_object(event)
    }

    #[track_caller]
    pub fn verbose(&self, message: &str) -> Result<(), ShipError> {
        self.log(ShipLevel::Verbose, message, None, None)
    }

    #[track_caller]
    pub fn debug(&self, message: &str) -> Result<(), ShipError> {
        self.log(ShipLevel::Debug, message, None, None)
    }

    #[track_caller]
    pub fn info(&self, message: &str) -> Result<(), ShipError> {
        self.log(ShipLevel::Info, message, None, None)
    }

    #[track_caller]
    pub fn warning(&self, message: &str) -> Result<(), ShipError> {
        self.log(ShipLevel::Warning, message, None, None)
    }

    /// Log at error level with the full `source()` chain of `error`.
    #[track_caller]
    pub fn error(
        &self,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    ) -> Result<(), ShipError> {
        self.log(ShipLevel::Error, message, error, None)
    }

    /// See [`LogShipper::force_send`].
    pub fn force_send(&self, on_complete: impl FnOnce(Result<(), ShipError>) + Send + 'static) {
        self.shipper.force_send(on_complete);
    }

    pub fn flush(&self, timeout: Duration) -> Result<(), ShipError> {
        self.shipper.flush(timeout)
    }

    pub fn cancel_sending(&self) {
        self.shipper.cancel_sending();
    }
}
