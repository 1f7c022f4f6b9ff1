//! Scalar gain

use crate::runtime::block::{Advance, Block, Signature};
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::ports::{InputStream, OutputStream};
use crate::runtime::stream::DEFAULT_CHUNK;
use crate::runtime::types::REAL32;

/// Multiplies a real32 stream by a constant factor.
pub struct Gain {
    name: String,
    gain: f32,
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self {
            name: "gain".to_string(),
            gain,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Block for Gain {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::typed(&[REAL32], &[REAL32])]
    }

    fn process(
        &mut self,
        inputs: &mut [InputStream],
        outputs: &mut [OutputStream],
    ) -> WorkResult<Advance> {
        let reader = inputs[0]
            .get::<f32>()
            .ok_or_else(|| WorkError::Block("input port does not carry real32".to_string()))?;

        if !outputs[0].is_connected() {
            // Nothing downstream; keep the pipeline draining
            let n = reader.peek()?.len();
            reader.advance(n);
            return Ok(Advance::Items(n));
        }
        let writer = outputs[0]
            .get::<f32>()
            .ok_or_else(|| WorkError::Block("output port does not carry real32".to_string()))?;

        let src = reader.peek()?;
        let n = src.len().min(DEFAULT_CHUNK);
        let dst = writer.reserve(n);
        for (d, s) in dst.iter_mut().zip(&src[..n]) {
            *d = s * self.gain;
        }
        writer.commit(n)?;
        reader.advance(n);
        Ok(Advance::Items(n))
    }
}
