//! Sample type registry
//!
//! Process-wide, append-only registry of the sample kinds that may flow over
//! graph edges. Two variants exist: *fixed records* (size and alignment
//! derived from the Rust element type) and *structured objects* (a codec
//! pair, carried on the wire as [`Frame`] blobs). Each entry also holds a
//! type-erased stream factory so the scheduler can allocate a correctly
//! typed ring from a type name alone, and a capability set consulted by
//! predicate-typed input ports.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::mem::{align_of, size_of};
use std::sync::{Arc, Mutex};

use num_complex::Complex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::errors::FlowError;
use super::stream::{self, AllocatedStream, StreamSpec};

/// Built-in fixed sample type names.
pub const REAL32: &str = "real32";
pub const COMPLEX32: &str = "complex32";
pub const BYTE: &str = "byte";
pub const BIT: &str = "bit";

/// Capability tag carried by types registered with a JSON codec.
pub const CAP_JSON: &str = "json";

/// One encoded structured object on the wire. Cheap to clone across
/// fan-out readers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Arc<[u8]>);

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self(Vec::new().into())
    }
}

/// The two sample-type variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Identical-sized contiguous records, addressable by index
    Fixed { size: usize, align: usize },
    /// Variable-sized framed objects
    Object,
}

/// Public view of one registered type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: String,
    pub kind: TypeKind,
    pub capabilities: HashSet<String>,
}

/// Encode/decode pair for one structured object type. `decode(encode(v))`
/// must reproduce `v` for every value.
pub struct ObjectCodec<T> {
    encode: Arc<dyn Fn(&T) -> Vec<u8> + Send + Sync>,
    decode: Arc<dyn Fn(&[u8]) -> Result<T, String> + Send + Sync>,
}

impl<T> Clone for ObjectCodec<T> {
    fn clone(&self) -> Self {
        Self {
            encode: Arc::clone(&self.encode),
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<T> ObjectCodec<T> {
    pub fn encode(&self, value: &T) -> Frame {
        Frame::new((self.encode)(value))
    }

    pub fn decode(&self, frame: &Frame) -> Result<T, String> {
        (self.decode)(frame.as_bytes())
    }
}

type StreamFactory = Box<dyn Fn(&StreamSpec) -> AllocatedStream + Send + Sync>;
type JsonFn = Arc<dyn Fn(&Frame) -> Result<String, String> + Send + Sync>;

struct TypeEntry {
    kind: TypeKind,
    rust_type: TypeId,
    capabilities: HashSet<String>,
    factory: StreamFactory,
    /// `ObjectCodec<T>` behind `Any`, present for object types
    codec: Option<Box<dyn Any + Send + Sync>>,
    to_json: Option<JsonFn>,
}

struct Registry {
    entries: HashMap<String, TypeEntry>,
}

impl Registry {
    fn register_fixed<T>(&mut self, name: &str) -> Result<(), FlowError>
    where
        T: Clone + Default + Send + 'static,
    {
        let kind = TypeKind::Fixed {
            size: size_of::<T>(),
            align: align_of::<T>(),
        };
        if let Some(existing) = self.entries.get(name) {
            if existing.kind == kind && existing.rust_type == TypeId::of::<T>() {
                return Ok(());
            }
            return Err(FlowError::TypeConflict { name: name.to_string() });
        }
        self.entries.insert(
            name.to_string(),
            TypeEntry {
                kind,
                rust_type: TypeId::of::<T>(),
                capabilities: HashSet::new(),
                factory: Box::new(|spec| stream::allocate_erased::<T>(spec)),
                codec: None,
                to_json: None,
            },
        );
        Ok(())
    }

    fn register_object<T>(
        &mut self,
        name: &str,
        codec: ObjectCodec<T>,
        to_json: Option<JsonFn>,
        capabilities: HashSet<String>,
    ) -> Result<(), FlowError>
    where
        T: Send + 'static,
    {
        if let Some(existing) = self.entries.get(name) {
            if existing.kind == TypeKind::Object && existing.rust_type == TypeId::of::<T>() {
                return Ok(());
            }
            return Err(FlowError::TypeConflict { name: name.to_string() });
        }
        self.entries.insert(
            name.to_string(),
            TypeEntry {
                kind: TypeKind::Object,
                rust_type: TypeId::of::<T>(),
                capabilities,
                factory: Box::new(stream::allocate_erased::<Frame>),
                codec: Some(Box::new(codec)),
                to_json,
            },
        );
        Ok(())
    }
}

lazy_static::lazy_static! {
    static ref REGISTRY: Arc<Mutex<Registry>> = {
        let mut registry = Registry { entries: HashMap::new() };

        // Numeric primitives every graph can rely on
        registry.register_fixed::<f32>(REAL32).expect("fresh registry");
        registry.register_fixed::<Complex<f32>>(COMPLEX32).expect("fresh registry");
        registry.register_fixed::<u8>(BYTE).expect("fresh registry");
        registry.register_fixed::<u8>(BIT).expect("fresh registry");

        Arc::new(Mutex::new(registry))
    };
}

/// Register a fixed-record sample type backed by the Rust element `T`.
/// Idempotent for an identical definition.
pub fn register_fixed<T>(name: &str) -> Result<(), FlowError>
where
    T: Clone + Default + Send + 'static,
{
    REGISTRY.lock().unwrap().register_fixed::<T>(name)
}

/// Register a structured object type with an explicit codec pair.
pub fn register_object<T, E, D>(name: &str, encode: E, decode: D) -> Result<(), FlowError>
where
    T: Send + 'static,
    E: Fn(&T) -> Vec<u8> + Send + Sync + 'static,
    D: Fn(&[u8]) -> Result<T, String> + Send + Sync + 'static,
{
    let codec = ObjectCodec {
        encode: Arc::new(encode),
        decode: Arc::new(decode),
    };
    REGISTRY
        .lock()
        .unwrap()
        .register_object(name, codec, None, HashSet::new())
}

/// Register a structured object type carried as JSON. Installs serde_json
/// codecs and grants the `"json"` capability consulted by predicate inputs.
pub fn register_json_object<T>(name: &str) -> Result<(), FlowError>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    let codec = ObjectCodec {
        encode: Arc::new(|value: &T| {
            serde_json::to_vec(value).expect("JSON encoding is total for registered object types")
        }),
        decode: Arc::new(|bytes: &[u8]| {
            serde_json::from_slice::<T>(bytes).map_err(|e| e.to_string())
        }),
    };
    let to_json: JsonFn = Arc::new(|frame: &Frame| {
        serde_json::from_slice::<serde_json::Value>(frame.as_bytes())
            .map(|v| v.to_string())
            .map_err(|e| e.to_string())
    });
    let mut capabilities = HashSet::new();
    capabilities.insert(CAP_JSON.to_string());
    REGISTRY
        .lock()
        .unwrap()
        .register_object(name, codec, Some(to_json), capabilities)
}

/// Attach a capability tag to an already registered type.
pub fn add_capability(name: &str, capability: &str) -> Result<(), FlowError> {
    let mut registry = REGISTRY.lock().unwrap();
    let entry = registry
        .entries
        .get_mut(name)
        .ok_or_else(|| FlowError::UnknownType { name: name.to_string() })?;
    entry.capabilities.insert(capability.to_string());
    Ok(())
}

/// Look up a registered type by name.
pub fn lookup(name: &str) -> Option<TypeInfo> {
    let registry = REGISTRY.lock().unwrap();
    registry.entries.get(name).map(|entry| TypeInfo {
        name: name.to_string(),
        kind: entry.kind,
        capabilities: entry.capabilities.clone(),
    })
}

/// Whether `name` is registered and carries `capability`.
pub fn has_capability(name: &str, capability: &str) -> bool {
    let registry = REGISTRY.lock().unwrap();
    registry
        .entries
        .get(name)
        .is_some_and(|entry| entry.capabilities.contains(capability))
}

/// The codec registered for object type `name`, if `T` matches.
pub fn codec<T: 'static>(name: &str) -> Option<ObjectCodec<T>> {
    let registry = REGISTRY.lock().unwrap();
    registry
        .entries
        .get(name)?
        .codec
        .as_ref()?
        .downcast_ref::<ObjectCodec<T>>()
        .cloned()
}

/// Render one frame of object type `name` as a JSON string, if the type
/// was registered with a JSON codec.
pub fn json_of(name: &str, frame: &Frame) -> Option<Result<String, String>> {
    let to_json = {
        let registry = REGISTRY.lock().unwrap();
        registry.entries.get(name)?.to_json.as_ref().map(Arc::clone)
    };
    to_json.map(|f| f(frame))
}

/// Item size of a fixed type, `None` for object types or unknown names.
pub(crate) fn fixed_size(name: &str) -> Option<usize> {
    match lookup(name)?.kind {
        TypeKind::Fixed { size, .. } => Some(size),
        TypeKind::Object => None,
    }
}

/// Allocate a stream for type `name` via its registered factory.
pub(crate) fn open_stream(name: &str, spec: &StreamSpec) -> Option<AllocatedStream> {
    let registry = REGISTRY.lock().unwrap();
    registry.entries.get(name).map(|entry| (entry.factory)(spec))
}
