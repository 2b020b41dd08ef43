//! State serialization
//!
//! A state is written as one JSON envelope:
//!
//! ```text
//! { "version": 1,
//!   "nodes": [ { "<key>": <value>, ... }, ... ],
//!   "root":  { "status", "kind", "id", "fqn", "seq", "data",
//!              "props", "oldProps"?, "output" } }
//! ```
//!
//! Shared map nodes are written once into `nodes` and referenced as
//! `{"$ref": <index>}`, which makes cycles representable. Secrets are written
//! as `{"__secret__": true, "value": ...}` (plus `"encrypted": true` when a
//! passphrase is configured). A plain map using one of the reserved keys is
//! wrapped as `{"$map": {...}}`.

use std::collections::{BTreeMap, HashMap};

use alchemy_core::{Scope, Secret, SharedMap, Value};
use serde_json::{Map, Value as Json};

use crate::backend::{StoreError, StoreResult};
use crate::secret::SecretCipher;
use crate::state::{State, StateStatus};

/// Envelope format version
pub const FORMAT_VERSION: u64 = 1;

const REF_TAG: &str = "$ref";
const MAP_TAG: &str = "$map";
const SECRET_TAG: &str = "__secret__";
const RESERVED_KEYS: [&str; 3] = [REF_TAG, MAP_TAG, SECRET_TAG];

/// Converts states to and from their stored bytes
#[derive(Debug, Clone, Default)]
pub struct StateCodec {
    cipher: Option<SecretCipher>,
}

impl StateCodec {
    /// Codec storing secrets in clear text (still tagged as secrets)
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec encrypting secrets with a passphrase-derived key
    pub fn with_passphrase(passphrase: &str) -> Self {
        Self {
            cipher: Some(SecretCipher::from_passphrase(passphrase)),
        }
    }

    /// Codec for an optional passphrase
    pub fn from_passphrase(passphrase: Option<&str>) -> Self {
        passphrase.map(Self::with_passphrase).unwrap_or_default()
    }

    pub fn encrypts_secrets(&self) -> bool {
        self.cipher.is_some()
    }

    /// Serialize a state to pretty-printed JSON bytes
    pub fn serialize(&self, state: &State) -> StoreResult<Vec<u8>> {
        let document = self.to_document(state)?;
        serde_json::to_vec_pretty(&document).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Parse stored bytes, attaching `scope` as the state's read context
    pub fn deserialize(&self, bytes: &[u8], scope: Option<&Scope>) -> StoreResult<State> {
        let document: Json = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::InvalidState(format!("Failed to parse state: {}", e)))?;
        self.from_document(&document, scope)
    }

    /// Build the envelope for a state
    pub fn to_document(&self, state: &State) -> StoreResult<Json> {
        let mut encoder = Encoder::new(self.cipher.as_ref());

        let mut root = Map::new();
        root.insert(
            "status".to_string(),
            serde_json::to_value(state.status)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        );
        root.insert("kind".to_string(), Json::String(state.kind.clone()));
        root.insert("id".to_string(), Json::String(state.id.clone()));
        root.insert("fqn".to_string(), Json::String(state.fqn.clone()));
        root.insert("seq".to_string(), Json::from(state.seq));
        root.insert("data".to_string(), encoder.encode_map(&state.data)?);
        root.insert("props".to_string(), encoder.encode(&state.props)?);
        if let Some(old_props) = &state.old_props {
            root.insert("oldProps".to_string(), encoder.encode(old_props)?);
        }
        root.insert("output".to_string(), encoder.encode(&state.output)?);

        let mut document = Map::new();
        document.insert("version".to_string(), Json::from(FORMAT_VERSION));
        document.insert("nodes".to_string(), Json::Array(encoder.nodes));
        document.insert("root".to_string(), Json::Object(root));
        Ok(Json::Object(document))
    }

    /// Rebuild a state from its envelope
    pub fn from_document(&self, document: &Json, scope: Option<&Scope>) -> StoreResult<State> {
        let envelope = document
            .as_object()
            .ok_or_else(|| invalid("envelope must be a JSON object"))?;

        let version = envelope
            .get("version")
            .and_then(Json::as_u64)
            .ok_or_else(|| invalid("missing format version"))?;
        if version != FORMAT_VERSION {
            return Err(invalid(format!("unsupported format version {}", version)));
        }

        let nodes = match envelope.get("nodes") {
            Some(Json::Array(nodes)) => nodes.as_slice(),
            None => &[],
            Some(_) => return Err(invalid("'nodes' must be an array")),
        };
        let root = envelope
            .get("root")
            .and_then(Json::as_object)
            .ok_or_else(|| invalid("missing 'root' object"))?;

        let decoder = Decoder::new(self.cipher.as_ref(), nodes)?;

        let status: StateStatus = serde_json::from_value(
            root.get("status")
                .cloned()
                .ok_or_else(|| invalid("missing 'status'"))?,
        )
        .map_err(|e| invalid(format!("bad 'status': {}", e)))?;

        let data = match root.get("data") {
            None => BTreeMap::new(),
            Some(data) => match decoder.decode(data)? {
                Value::Map(map) => map,
                _ => return Err(invalid("'data' must be a map")),
            },
        };

        Ok(State {
            status,
            kind: string_field(root, "kind")?,
            id: string_field(root, "id")?,
            fqn: string_field(root, "fqn")?,
            seq: root
                .get("seq")
                .and_then(Json::as_u64)
                .ok_or_else(|| invalid("missing 'seq'"))?,
            data,
            props: decoder.decode(root.get("props").unwrap_or(&Json::Null))?,
            old_props: root
                .get("oldProps")
                .map(|props| decoder.decode(props))
                .transpose()?,
            output: decoder.decode(root.get("output").unwrap_or(&Json::Null))?,
            scope: scope.cloned(),
        })
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidState(message.into())
}

fn string_field(object: &Map<String, Json>, field: &str) -> StoreResult<String> {
    object
        .get(field)
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("missing '{}'", field)))
}

fn tagged(tag: &str, value: Json) -> Json {
    let mut object = Map::new();
    object.insert(tag.to_string(), value);
    Json::Object(object)
}

/// Graph walk that flattens shared nodes into a node table
struct Encoder<'a> {
    cipher: Option<&'a SecretCipher>,
    nodes: Vec<Json>,
    /// Node address -> index in `nodes`
    ids: HashMap<usize, usize>,
    /// Keeps every visited node alive so addresses stay unique for the walk
    pinned: Vec<SharedMap>,
}

impl<'a> Encoder<'a> {
    fn new(cipher: Option<&'a SecretCipher>) -> Self {
        Self {
            cipher,
            nodes: Vec::new(),
            ids: HashMap::new(),
            pinned: Vec::new(),
        }
    }

    fn encode(&mut self, value: &Value) -> StoreResult<Json> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| {
                    StoreError::Serialization(format!("cannot serialize non-finite number {}", f))
                })?,
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.encode(item))
                    .collect::<StoreResult<_>>()?,
            ),
            Value::Map(map) => self.encode_map(map)?,
            Value::Secret(secret) => self.encode_secret(secret)?,
            Value::Shared(node) => tagged(REF_TAG, Json::from(self.intern(node)?)),
        })
    }

    fn encode_map(&mut self, map: &BTreeMap<String, Value>) -> StoreResult<Json> {
        let entries = self.encode_entries(map)?;
        if map.keys().any(|key| RESERVED_KEYS.contains(&key.as_str())) {
            Ok(tagged(MAP_TAG, entries))
        } else {
            Ok(entries)
        }
    }

    fn encode_entries(&mut self, map: &BTreeMap<String, Value>) -> StoreResult<Json> {
        let mut entries = Map::new();
        for (key, value) in map {
            entries.insert(key.clone(), self.encode(value)?);
        }
        Ok(Json::Object(entries))
    }

    fn encode_secret(&self, secret: &Secret) -> StoreResult<Json> {
        let mut object = Map::new();
        object.insert(SECRET_TAG.to_string(), Json::Bool(true));
        match self.cipher {
            Some(cipher) => {
                object.insert("encrypted".to_string(), Json::Bool(true));
                object.insert(
                    "value".to_string(),
                    Json::String(cipher.encrypt(secret.expose())?),
                );
            }
            None => {
                object.insert("value".to_string(), Json::String(secret.expose().to_string()));
            }
        }
        Ok(Json::Object(object))
    }

    /// Index of a node in the table, writing it on first visit
    fn intern(&mut self, node: &SharedMap) -> StoreResult<usize> {
        if let Some(&index) = self.ids.get(&node.addr()) {
            return Ok(index);
        }

        // The index is registered before the children are walked so that a
        // reference back to this node resolves to it.
        let index = self.nodes.len();
        self.ids.insert(node.addr(), index);
        self.pinned.push(node.clone());
        self.nodes.push(Json::Null);

        let entries = self.encode_entries(&node.snapshot())?;
        self.nodes[index] = entries;
        Ok(index)
    }
}

/// Rebuilds values, resolving references against pre-allocated nodes
struct Decoder<'a> {
    cipher: Option<&'a SecretCipher>,
    handles: Vec<SharedMap>,
}

impl<'a> Decoder<'a> {
    fn new(cipher: Option<&'a SecretCipher>, nodes: &[Json]) -> StoreResult<Self> {
        let decoder = Self {
            cipher,
            handles: nodes.iter().map(|_| SharedMap::new()).collect(),
        };

        for (index, node) in nodes.iter().enumerate() {
            let entries = node
                .as_object()
                .ok_or_else(|| invalid(format!("node {} must be an object", index)))?;
            let map = decoder.decode_entries(entries)?;
            decoder.handles[index].replace(map);
        }

        Ok(decoder)
    }

    fn decode(&self, json: &Json) -> StoreResult<Value> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(
                    n.as_f64()
                        .ok_or_else(|| invalid(format!("unrepresentable number {}", n)))?,
                ),
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.decode(item))
                    .collect::<StoreResult<_>>()?,
            ),
            Json::Object(object) => self.decode_object(object)?,
        })
    }

    fn decode_object(&self, object: &Map<String, Json>) -> StoreResult<Value> {
        if object.contains_key(SECRET_TAG) {
            return self.decode_secret(object);
        }

        if object.len() == 1 {
            if let Some(reference) = object.get(REF_TAG) {
                let index = reference
                    .as_u64()
                    .ok_or_else(|| invalid("'$ref' must be a node index"))?;
                return usize::try_from(index)
                    .ok()
                    .and_then(|index| self.handles.get(index))
                    .cloned()
                    .map(Value::Shared)
                    .ok_or_else(|| invalid(format!("dangling reference to node {}", index)));
            }
            if let Some(inner) = object.get(MAP_TAG) {
                let entries = inner
                    .as_object()
                    .ok_or_else(|| invalid("'$map' must wrap an object"))?;
                return Ok(Value::Map(self.decode_entries(entries)?));
            }
        }

        Ok(Value::Map(self.decode_entries(object)?))
    }

    fn decode_entries(&self, object: &Map<String, Json>) -> StoreResult<BTreeMap<String, Value>> {
        object
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.decode(value)?)))
            .collect()
    }

    fn decode_secret(&self, object: &Map<String, Json>) -> StoreResult<Value> {
        let value = object
            .get("value")
            .and_then(Json::as_str)
            .ok_or_else(|| invalid("secret without a string 'value'"))?;

        if !object
            .get("encrypted")
            .and_then(Json::as_bool)
            .unwrap_or(false)
        {
            return Ok(Value::secret(value));
        }

        match self.cipher {
            Some(cipher) => Ok(Value::Secret(Secret::new(cipher.decrypt(value)?))),
            None => Err(StoreError::Secret(
                "state contains encrypted secrets but no passphrase is configured".to_string(),
            )),
        }
    }
}
