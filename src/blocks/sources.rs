//! Source blocks

use crate::runtime::block::{Advance, Block, ResolvedSignature, Signature};
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::ports::{InputStream, OutputStream};
use crate::runtime::stream::DEFAULT_CHUNK;
use crate::runtime::types::{self, ObjectCodec};

/// Emits a fixed vector of samples, one chunk per `process` call, then
/// signals end-of-stream.
pub struct VectorSource<T> {
    name: String,
    type_name: String,
    rate: f64,
    data: Vec<T>,
    pos: usize,
    chunk: usize,
}

impl<T: Clone + Default + Send + 'static> VectorSource<T> {
    pub fn new(type_name: impl Into<String>, rate: f64, data: Vec<T>) -> Self {
        Self {
            name: "vector_source".to_string(),
            type_name: type_name.into(),
            rate,
            data,
            pos: 0,
            chunk: DEFAULT_CHUNK,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cap the number of samples emitted per `process` call. Must not
    /// exceed the capacity of the downstream stream.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }
}

impl<T: Clone + Default + Send + 'static> Block for VectorSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![], vec![self.type_name.clone()])]
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(self.rate)
    }

    fn process(
        &mut self,
        _inputs: &mut [InputStream],
        outputs: &mut [OutputStream],
    ) -> WorkResult<Advance> {
        if !outputs[0].is_connected() {
            return Ok(Advance::Finished);
        }
        let writer = outputs[0]
            .get::<T>()
            .ok_or_else(|| WorkError::Block("output port carries a different type".to_string()))?;

        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            return Ok(Advance::Finished);
        }
        let n = remaining.min(self.chunk);
        let dst = writer.reserve(n);
        dst.clone_from_slice(&self.data[self.pos..self.pos + n]);
        writer.commit(n)?;
        self.pos += n;
        Ok(Advance::Items(n))
    }
}

/// Emits a fixed list of structured objects, encoding each with the codec
/// registered for its type, then signals end-of-stream.
pub struct PacketSource<T> {
    name: String,
    type_name: String,
    rate: f64,
    items: Vec<T>,
    pos: usize,
    codec: Option<ObjectCodec<T>>,
}

impl<T: Send + 'static> PacketSource<T> {
    pub fn new(type_name: impl Into<String>, rate: f64, items: Vec<T>) -> Self {
        Self {
            name: "packet_source".to_string(),
            type_name: type_name.into(),
            rate,
            items,
            pos: 0,
            codec: None,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Send + 'static> Block for PacketSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(vec![], vec![self.type_name.clone()])]
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(self.rate)
    }

    fn initialize(&mut self, _resolved: &ResolvedSignature, _input_rate: f64) -> WorkResult {
        self.codec = types::codec::<T>(&self.type_name);
        if self.codec.is_none() {
            return Err(WorkError::Block(format!(
                "no codec registered for object type '{}'",
                self.type_name
            )));
        }
        Ok(())
    }

    fn process(
        &mut self,
        _inputs: &mut [InputStream],
        outputs: &mut [OutputStream],
    ) -> WorkResult<Advance> {
        if !outputs[0].is_connected() {
            return Ok(Advance::Finished);
        }
        let writer = outputs[0]
            .frames()
            .ok_or_else(|| WorkError::Block("output port is not an object stream".to_string()))?;
        let codec = self
            .codec
            .as_ref()
            .ok_or_else(|| WorkError::Block("packet source not initialized".to_string()))?;

        let remaining = self.items.len() - self.pos;
        if remaining == 0 {
            return Ok(Advance::Finished);
        }
        let n = remaining.min(32);
        let dst = writer.reserve(n);
        for (slot, item) in dst.iter_mut().zip(&self.items[self.pos..self.pos + n]) {
            *slot = codec.encode(item);
        }
        writer.commit(n)?;
        self.pos += n;
        Ok(Advance::Items(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::REAL32;

    #[test]
    fn test_vector_source_declares_rate_and_type() {
        let source = VectorSource::new(REAL32, 48_000.0, vec![1.0f32, 2.0]).with_name("sig");
        assert_eq!(source.name(), "sig");
        assert_eq!(source.sample_rate(), Some(48_000.0));

        let sigs = source.signatures();
        assert_eq!(sigs.len(), 1);
        assert!(sigs[0].inputs.is_empty());
        assert_eq!(sigs[0].outputs, vec![REAL32.to_string()]);
    }

    #[test]
    fn test_packet_source_requires_codec() {
        let mut source = PacketSource::new("test_sources_unregistered", 10.0, vec![1u64]);
        let resolved = ResolvedSignature {
            index: 0,
            inputs: vec![],
            outputs: vec!["test_sources_unregistered".to_string()],
            rate_scale: vec![1.0],
        };
        assert!(source.initialize(&resolved, 10.0).is_err());
    }
}
