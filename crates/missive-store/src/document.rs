use serde_json::Value;

/// The field map of one document. Values are JSON-shaped; timestamps are
/// stored as epoch milliseconds so they order correctly.
pub type Fields = serde_json::Map<String, Value>;

/// One document as delivered by reads and change feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    /// The document's fields plus its id under `"id"`, ready for
    /// deserializing into a model struct.
    pub fn to_value_with_id(&self) -> Value {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(fields)
    }
}

/// Path to a collection: alternating collection / document segments, e.g.
/// `chats`, `chats/{chatId}/messages`, `calls/{callId}/offerCandidates`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    /// A root collection such as `chats` or `users`.
    pub fn root(collection: impl Into<String>) -> Self {
        Self {
            segments: vec![collection.into()],
        }
    }

    /// A sub-collection nested under one document of `self`.
    pub fn sub(&self, doc_id: impl Into<String>, collection: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(doc_id.into());
        segments.push(collection.into());
        Self { segments }
    }

    pub fn as_key(&self) -> String {
        self.segments.join("/")
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_key())
    }
}
