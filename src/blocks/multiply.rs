//! Element-wise multiply

use std::ops::Mul;

use num_complex::Complex;

use crate::runtime::block::{Advance, Block, ResolvedSignature, Signature};
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::ports::{InputStream, OutputStream};
use crate::runtime::stream::DEFAULT_CHUNK;
use crate::runtime::types::{COMPLEX32, REAL32};

/// Multiplies two streams element by element.
///
/// Declares a complex32 and a real32 variant; the resolver narrows to
/// whichever the neighbors support, complex preferred when both fit.
pub struct Multiply {
    name: String,
    complex: bool,
}

impl Multiply {
    pub fn new() -> Self {
        Self {
            name: "multiply".to_string(),
            complex: false,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn run<T>(
        &self,
        inputs: &mut [InputStream],
        outputs: &mut [OutputStream],
    ) -> WorkResult<Advance>
    where
        T: Copy + Default + Send + Mul<Output = T> + 'static,
    {
        let (a_ports, b_ports) = inputs.split_at_mut(1);
        let a = a_ports[0]
            .get::<T>()
            .ok_or_else(|| WorkError::Block("input 0 carries an unexpected type".to_string()))?;
        let b = b_ports[0]
            .get::<T>()
            .ok_or_else(|| WorkError::Block("input 1 carries an unexpected type".to_string()))?;

        let av = a.peek()?;
        let bv = b.peek()?;
        let n = av.len().min(bv.len()).min(DEFAULT_CHUNK);

        if outputs[0].is_connected() {
            let writer = outputs[0].get::<T>().ok_or_else(|| {
                WorkError::Block("output port carries an unexpected type".to_string())
            })?;
            let dst = writer.reserve(n);
            for i in 0..n {
                dst[i] = av[i] * bv[i];
            }
            writer.commit(n)?;
        }

        a.advance(n);
        b.advance(n);
        Ok(Advance::Items(n))
    }
}

impl Default for Multiply {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for Multiply {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Signature> {
        vec![
            Signature::typed(&[COMPLEX32, COMPLEX32], &[COMPLEX32]),
            Signature::typed(&[REAL32, REAL32], &[REAL32]),
        ]
    }

    fn initialize(&mut self, resolved: &ResolvedSignature, _input_rate: f64) -> WorkResult {
        self.complex = resolved.index == 0;
        Ok(())
    }

    fn process(
        &mut self,
        inputs: &mut [InputStream],
        outputs: &mut [OutputStream],
    ) -> WorkResult<Advance> {
        if self.complex {
            self.run::<Complex<f32>>(inputs, outputs)
        } else {
            self.run::<f32>(inputs, outputs)
        }
    }
}
