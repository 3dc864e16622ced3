// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Numeric tuning parameters, overridable from a key=value text file.
//!
//! Lines starting with `#` and blank lines are skipped; unknown keys are
//! logged and ignored; a missing file means built-in defaults. Key matching
//! is case-insensitive.

use std::path::Path;
use std::time::Duration;

use log::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtpConfig {
    /// Largest single bulk transfer accepted from the host; a larger inbound
    /// transfer is dropped as malformed.
    pub read_usb_size: usize,
    /// Largest single bulk transfer handed to the gadget driver; outbound
    /// Data containers are sized to fit it.
    pub write_usb_size: usize,
    /// Chunk size for reading object payloads from disk.
    pub read_file_size: usize,
    /// Chunk size for writing object payloads to disk.
    pub write_file_size: usize,
    /// Upper bound for any single in-memory I/O buffer.
    pub max_io_buf_size: usize,
    /// Optional pacing delay between file read chunks.
    pub read_file_delay: Duration,
    /// A data phase with no forward progress for this long aborts the
    /// transaction as a transport failure.
    pub data_phase_timeout: Duration,
    /// Bounded depth of the outbound event queue.
    pub event_queue_depth: usize,
}

impl Default for MtpConfig {
    fn default() -> Self {
        Self {
            read_usb_size: 512 * 1024,
            write_usb_size: 512 * 1024,
            read_file_size: 512 * 1024,
            write_file_size: 512 * 1024,
            max_io_buf_size: 4 * 1024 * 1024,
            read_file_delay: Duration::ZERO,
            data_phase_timeout: Duration::from_secs(5),
            event_queue_depth: 16,
        }
    }
}

impl MtpConfig {
    /// Reads overrides from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                debug!("no config at {} ({}); using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parses key=value overrides on top of the defaults.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("ignoring config line without '=': {:?}", line);
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "read_usb_size" => set_usize(&mut config.read_usb_size, &key, value),
                "write_usb_size" => set_usize(&mut config.write_usb_size, &key, value),
                "read_file_size" => set_usize(&mut config.read_file_size, &key, value),
                "write_file_size" => set_usize(&mut config.write_file_size, &key, value),
                "max_io_buf_size" => set_usize(&mut config.max_io_buf_size, &key, value),
                "event_queue_depth" => set_usize(&mut config.event_queue_depth, &key, value),
                "read_file_delay" => set_millis(&mut config.read_file_delay, &key, value),
                "data_phase_timeout" => set_millis(&mut config.data_phase_timeout, &key, value),
                _ => warn!("unknown config key ignored: {:?}", key),
            }
        }
        config
    }
}

fn set_usize(slot: &mut usize, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("bad value for {}: {:?}; keeping {}", key, value, slot),
    }
}

fn set_millis(slot: &mut Duration, key: &str, value: &str) {
    match value.parse::<u64>() {
        Ok(ms) => *slot = Duration::from_millis(ms),
        Err(_) => warn!("bad value for {}: {:?}; keeping {:?}", key, value, slot),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_used_without_overrides() {
        let config = MtpConfig::parse("");
        assert_eq!(config, MtpConfig::default());
    }

    #[test]
    fn known_keys_override_defaults() {
        let config = MtpConfig::parse(
            "# tuning\n\
             read_usb_size=1024\n\
             WRITE_USB_SIZE = 2048\n\
             data_phase_timeout=250\n\
             event_queue_depth=4\n",
        );
        assert_eq!(config.read_usb_size, 1024);
        assert_eq!(config.write_usb_size, 2048);
        assert_eq!(config.data_phase_timeout, Duration::from_millis(250));
        assert_eq!(config.event_queue_depth, 4);
        assert_eq!(config.read_file_size, MtpConfig::default().read_file_size);
    }

    #[test]
    fn unknown_keys_and_bad_values_keep_defaults() {
        let config = MtpConfig::parse(
            "mmap_threshold=131072\n\
             read_usb_size=not-a-number\n",
        );
        assert_eq!(config, MtpConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = MtpConfig::load(Path::new("/nonexistent/mtp-responder.conf"));
        assert_eq!(config, MtpConfig::default());
    }
}
