//! Pass-through pacing

use std::thread;
use std::time::Duration;

use crate::runtime::block::{Advance, Block, Signature};
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::ports::{InputStream, OutputStream};
use crate::runtime::stream::DEFAULT_CHUNK;

/// Copies its input to its output, sleeping after every chunk. Useful for
/// simulating a slow consumer or limiting a demo's output rate; the
/// upstream producer is paced through ordinary back-pressure.
pub struct Throttle<T> {
    name: String,
    type_name: String,
    pause: Duration,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Clone + Default + Send + 'static> Throttle<T> {
    pub fn new(type_name: impl Into<String>, pause: Duration) -> Self {
        Self {
            name: "throttle".to_string(),
            type_name: type_name.into(),
            pause,
            _marker: std::marker::PhantomData,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Clone + Default + Send + 'static> Block for Throttle<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::typed(
            &[self.type_name.as_str()],
            &[self.type_name.as_str()],
        )]
    }

    fn process(
        &mut self,
        inputs: &mut [InputStream],
        outputs: &mut [OutputStream],
    ) -> WorkResult<Advance> {
        let reader = inputs[0]
            .get::<T>()
            .ok_or_else(|| WorkError::Block("input port carries a different type".to_string()))?;

        let n = if outputs[0].is_connected() {
            let writer = outputs[0].get::<T>().ok_or_else(|| {
                WorkError::Block("output port carries a different type".to_string())
            })?;
            let src = reader.peek()?;
            let n = src.len().min(DEFAULT_CHUNK);
            let dst = writer.reserve(n);
            dst.clone_from_slice(&src[..n]);
            writer.commit(n)?;
            n
        } else {
            reader.peek()?.len()
        };
        reader.advance(n);

        thread::sleep(self.pause);
        Ok(Advance::Items(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::REAL32;

    #[test]
    fn test_mirrors_type_on_both_ports() {
        let throttle = Throttle::<f32>::new(REAL32, Duration::from_millis(1));
        let sigs = throttle.signatures();
        assert_eq!(sigs[0].inputs.len(), 1);
        assert_eq!(sigs[0].outputs, vec![REAL32.to_string()]);
    }
}
