//! Sink blocks

use std::sync::{Arc, Mutex};

use crate::runtime::block::{Advance, Block, PortPattern, ResolvedSignature, Signature};
use crate::runtime::errors::{WorkError, WorkResult};
use crate::runtime::ports::{InputStream, OutputStream};
use crate::runtime::types::{self, CAP_JSON};

/// Collects every received sample into a shared vector.
pub struct VectorSink<T> {
    name: String,
    type_name: String,
    values: Arc<Mutex<Vec<T>>>,
    seen_rate: Arc<Mutex<Option<f64>>>,
}

impl<T: Clone + Default + Send + 'static> VectorSink<T> {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            name: "vector_sink".to_string(),
            type_name: type_name.into(),
            values: Arc::new(Mutex::new(Vec::new())),
            seen_rate: Arc::new(Mutex::new(None)),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shared handle to the collected samples. Clone before moving the sink
    /// into a graph.
    pub fn values(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.values)
    }

    /// The input rate this sink saw at `initialize`.
    pub fn seen_rate(&self) -> Arc<Mutex<Option<f64>>> {
        Arc::clone(&self.seen_rate)
    }
}

impl<T: Clone + Default + Send + 'static> Block for VectorSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(
            vec![PortPattern::of(self.type_name.clone())],
            vec![],
        )]
    }

    fn initialize(&mut self, _resolved: &ResolvedSignature, input_rate: f64) -> WorkResult {
        *self.seen_rate.lock().unwrap() = Some(input_rate);
        Ok(())
    }

    fn process(
        &mut self,
        inputs: &mut [InputStream],
        _outputs: &mut [OutputStream],
    ) -> WorkResult<Advance> {
        let reader = inputs[0]
            .get::<T>()
            .ok_or_else(|| WorkError::Block("input port carries a different type".to_string()))?;
        let items = reader.peek()?;
        let n = items.len();
        self.values.lock().unwrap().extend_from_slice(items);
        reader.advance(n);
        Ok(Advance::Items(n))
    }
}

/// Accepts any object type carrying a JSON codec and collects the rendered
/// JSON strings in production order.
pub struct JsonSink {
    name: String,
    input_type: Option<String>,
    rendered: Arc<Mutex<Vec<String>>>,
}

impl JsonSink {
    pub fn new() -> Self {
        Self {
            name: "json_sink".to_string(),
            input_type: None,
            rendered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shared handle to the rendered JSON documents.
    pub fn rendered(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.rendered)
    }
}

impl Default for JsonSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for JsonSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn signatures(&self) -> Vec<Signature> {
        vec![Signature::new(
            vec![PortPattern::capability(CAP_JSON)],
            vec![],
        )]
    }

    fn initialize(&mut self, resolved: &ResolvedSignature, _input_rate: f64) -> WorkResult {
        self.input_type = Some(resolved.inputs[0].clone());
        Ok(())
    }

    fn process(
        &mut self,
        inputs: &mut [InputStream],
        _outputs: &mut [OutputStream],
    ) -> WorkResult<Advance> {
        let type_name = self
            .input_type
            .clone()
            .ok_or_else(|| WorkError::Block("json sink not initialized".to_string()))?;
        let reader = inputs[0]
            .frames()
            .ok_or_else(|| WorkError::Block("input port is not an object stream".to_string()))?;

        let frames = reader.peek()?;
        let n = frames.len();
        let mut batch = Vec::with_capacity(n);
        for frame in frames {
            let json = types::json_of(&type_name, frame).ok_or_else(|| {
                WorkError::Block(format!("type '{type_name}' has no JSON codec"))
            })?;
            batch.push(json.map_err(WorkError::Block)?);
        }
        self.rendered.lock().unwrap().extend(batch);
        reader.advance(n);
        Ok(Advance::Items(n))
    }
}
