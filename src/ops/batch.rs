// src/ops/batch.rs
//
// =============================================================================
// SAXSFLOW: BATCH OPERATIONS (v 0.1 )
// =============================================================================
//
// Operations that run a sub-workflow once per input tuple.
//
// Shared inputs:
//   workflow      EntireWorkflow locator naming the sub-workflow
//   input_routes  sub-workflow addresses (`tag.inputs.name`) fed per tuple
//   harvest       addresses to collect per iteration (empty: all outputs)
//   reset         reset the sub-workflow before each iteration
//
// Outputs: batch_inputs, batch_outputs (one entry per iteration).

use super::{compile, matching_files};
use crate::locator::{InputLocator, TypeTag};
use crate::operation::{IoSpec, OpIo, OpKind, Operation, BATCH_INPUTS, BATCH_OUTPUTS, ROUTES_INPUT, WORKFLOW_INPUT};
use crate::value::Value;
use crate::workflow::driver::{BatchDriver, HARVEST_INPUT, RESET_INPUT};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;

pub(crate) fn driver_inputs() -> Vec<IoSpec> {
    vec![
        IoSpec::new(WORKFLOW_INPUT, "sub-workflow to execute"),
        IoSpec::new(ROUTES_INPUT, "sub-workflow input addresses written per iteration"),
        IoSpec::new(HARVEST_INPUT, "sub-workflow addresses collected per iteration"),
        IoSpec::new(RESET_INPUT, "reset the sub-workflow before each iteration").with_default(
            InputLocator::literal(TypeTag::Bool, false).unwrap_or_default(),
        ),
    ]
}

pub(crate) fn driver_outputs() -> Vec<IoSpec> {
    vec![
        IoSpec::new(BATCH_INPUTS, "input tuple of each iteration, route -> value"),
        IoSpec::new(BATCH_OUTPUTS, "harvested outputs of each iteration"),
    ]
}

// ============================================================================
// 1. EXPLICIT TUPLES
// ============================================================================

/// Iterates over an explicit list. Each item is a tuple (one value per
/// route); with a single route, bare values are accepted too.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchFromList;

pub const INPUT_TUPLES: &str = "input_tuples";

#[async_trait]
impl Operation for BatchFromList {
    fn type_name(&self) -> &'static str {
        "BatchFromList"
    }

    fn input_specs(&self) -> Vec<IoSpec> {
        let mut specs = driver_inputs();
        specs.insert(2, IoSpec::new(INPUT_TUPLES, "list of input tuples"));
        specs
    }

    fn output_specs(&self) -> Vec<IoSpec> {
        driver_outputs()
    }

    fn kind(&self) -> OpKind {
        OpKind::Batch
    }

    async fn run(&self, io: &mut OpIo) -> Result<()> {
        let driver = BatchDriver::from_io(io)?;
        let tuples = match io.input(INPUT_TUPLES)? {
            Value::Null => Vec::new(),
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::List(tuple) => tuple.clone(),
                    single => vec![single.clone()],
                })
                .collect(),
            other => bail!("'{}' must be a list, got {}", INPUT_TUPLES, other.type_name()),
        };
        driver.drive(io, tuples).await
    }
}

// ============================================================================
// 2. FILES IN A DIRECTORY
// ============================================================================

/// Iterates over the files of a directory whose name matches a regex, in
/// sorted order. Each file path is written to the single route.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchFromFiles;

pub const DIR_INPUT: &str = "dir_path";
pub const REGEX_INPUT: &str = "regex";

pub(crate) fn file_inputs() -> Vec<IoSpec> {
    vec![
        IoSpec::new(DIR_INPUT, "directory to scan"),
        IoSpec::new(REGEX_INPUT, "file name pattern")
            .with_default(InputLocator::literal(TypeTag::String, ".*").unwrap_or_default()),
    ]
}

#[async_trait]
impl Operation for BatchFromFiles {
    fn type_name(&self) -> &'static str {
        "BatchFromFiles"
    }

    fn input_specs(&self) -> Vec<IoSpec> {
        let mut specs = file_inputs();
        specs.extend(driver_inputs());
        specs
    }

    fn output_specs(&self) -> Vec<IoSpec> {
        driver_outputs()
    }

    fn kind(&self) -> OpKind {
        OpKind::Batch
    }

    async fn run(&self, io: &mut OpIo) -> Result<()> {
        let driver = BatchDriver::from_io(io)?;
        let dir = io.input_str(DIR_INPUT)?.to_string();
        let pattern = compile(io.input_str(REGEX_INPUT)?)?;
        let files = matching_files(Path::new(&dir), &pattern).await?;
        io.message(format!("{} files match in {}", files.len(), dir));

        let tuples = files.iter().map(|f| vec![Value::from(f.as_path())]).collect();
        driver.drive(io, tuples).await
    }
}
