// src/ops/realtime.rs

use super::batch::{driver_inputs, driver_outputs, file_inputs, DIR_INPUT, REGEX_INPUT};
use super::{compile, matching_files};
use crate::operation::{InputPoller, IoSpec, OpIo, OpKind, Operation};
use crate::value::Value;
use crate::workflow::driver::RealtimeDriver;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DELAY_INPUT: &str = "delay_ms";
pub const IDLE_INPUT: &str = "max_idle_polls";

/// Watches a directory and runs the sub-workflow once for every new file
/// whose name matches the regex. Stops on request or after
/// `max_idle_polls` empty polls in a row.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealtimeFromFiles;

#[async_trait]
impl Operation for RealtimeFromFiles {
    fn type_name(&self) -> &'static str {
        "RealtimeFromFiles"
    }

    fn input_specs(&self) -> Vec<IoSpec> {
        let mut specs = file_inputs();
        specs.extend(driver_inputs());
        specs.push(IoSpec::new(DELAY_INPUT, "pause between empty polls (engine default if unset)"));
        specs.push(IoSpec::new(IDLE_INPUT, "empty polls tolerated before stopping (engine default if unset)"));
        specs
    }

    fn output_specs(&self) -> Vec<IoSpec> {
        driver_outputs()
    }

    fn kind(&self) -> OpKind {
        OpKind::Realtime
    }

    async fn run(&self, io: &mut OpIo) -> Result<()> {
        let delay = poll_delay(io.input(DELAY_INPUT)?)?.unwrap_or_else(|| io.config().realtime_delay());
        let max_idle = idle_budget(io.input(IDLE_INPUT)?)?.unwrap_or(io.config().realtime_max_idle_polls);
        let driver = RealtimeDriver::from_io(io, delay, max_idle)?;

        let mut poller = NewFiles {
            dir: PathBuf::from(io.input_str(DIR_INPUT)?),
            pattern: compile(io.input_str(REGEX_INPUT)?)?,
            seen: HashSet::new(),
        };
        driver.drive(io, &mut poller).await
    }
}

/// Yields one unseen matching file per poll, oldest name first.
struct NewFiles {
    dir: PathBuf,
    pattern: Regex,
    seen: HashSet<PathBuf>,
}

#[async_trait]
impl InputPoller for NewFiles {
    async fn poll(&mut self) -> Result<Option<Vec<Value>>> {
        let fresh = matching_files(&self.dir, &self.pattern)
            .await?
            .into_iter()
            .find(|f| !self.seen.contains(f));
        Ok(fresh.map(|f| {
            let tuple = vec![Value::from(f.as_path())];
            self.seen.insert(f);
            tuple
        }))
    }
}

/// `delay_ms` as a duration; None when unset. Fractional milliseconds are
/// accepted.
fn poll_delay(value: &Value) -> Result<Option<Duration>> {
    match value {
        Value::Null => Ok(None),
        other => {
            let ms = other
                .as_f64()
                .ok_or_else(|| anyhow!("'{}' must be a number, got {}", DELAY_INPUT, other.type_name()))?;
            if !ms.is_finite() || ms < 0.0 {
                bail!("'{}' must be a non-negative number, got {}", DELAY_INPUT, ms);
            }
            Ok(Some(Duration::from_secs_f64(ms / 1000.0)))
        }
    }
}

/// `max_idle_polls`; None when unset.
fn idle_budget(value: &Value) -> Result<Option<u32>> {
    match value {
        Value::Null => Ok(None),
        Value::Int(n) => u32::try_from(*n)
            .map(Some)
            .map_err(|_| anyhow!("'{}' must be between 0 and {}, got {}", IDLE_INPUT, u32::MAX, n)),
        other => bail!("'{}' must be an integer, got {}", IDLE_INPUT, other.type_name()),
    }
}
