// src/ops/basic.rs

use crate::operation::{IoSpec, OpIo, Operation};
use anyhow::Result;
use async_trait::async_trait;

/// Passes its single input through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

#[async_trait]
impl Operation for Identity {
    fn type_name(&self) -> &'static str {
        "Identity"
    }

    fn input_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("value", "any value")]
    }

    fn output_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("value", "the input, unchanged")]
    }

    async fn run(&self, io: &mut OpIo) -> Result<()> {
        let value = io.input("value")?.clone();
        io.set_output("value", value)
    }
}
