use serde_json::Map;
pub use serde_json::Value as JsonValue;

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, JsonValue>;

/// Build a [`Document`] from JSON object syntax.
///
/// ```
/// use docbulk::doc;
///
/// let account = doc! { "address": "TA2Z", "balance": 100 };
/// assert_eq!(account["balance"], 100);
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::core::Document::new()
    };
    ($($body:tt)+) => {
        match $crate::serde_json::json!({ $($body)+ }) {
            $crate::serde_json::Value::Object(map) => map,
            _ => unreachable!("json! object literal always yields an object"),
        }
    };
}

/// Resolve a dotted path (`"meta.height"`) inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a JsonValue> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = document.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality match of every filter key against the document.
///
/// An empty filter matches everything.
pub fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(path, expected)| lookup(document, path) == Some(expected))
}
