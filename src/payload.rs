use serde_json::{Map, Value};

/// Alias for the semi-structured payloads flowing through the pipeline.
/// Leads arrive as arbitrary JSON objects and stay that way end to end.
pub type JsonMap = Map<String, Value>;

/// Resolves a field path against a payload tree.
///
/// Two notations are supported:
/// - Dot notation for nested objects: `address.zip`
/// - Bracket notation for keys containing dots or spaces:
///   `questions[Sind Sie Eigentümer der Immobilie?]`
///
/// Bracket notation descends exactly one level: the part before the bracket
/// must name an object, and the bracketed text is looked up verbatim inside
/// it. Returns `None` when any segment is absent or a non-object is reached
/// mid-path.
pub fn get_path<'a>(payload: &'a JsonMap, path: &str) -> Option<&'a Value> {
    // Bracket notation: parent[literal key]
    if let Some(open) = path.find('[') {
        if path.ends_with(']') {
            let parent = &path[..open];
            let key = &path[open + 1..path.len() - 1];
            return payload.get(parent)?.as_object()?.get(key);
        }
    }

    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = payload.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets a value at a dot-separated path, creating intermediate objects as
/// needed. Existing non-object values along the path are replaced.
pub fn set_path(payload: &mut JsonMap, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);

    let mut current = payload;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry.as_object_mut() {
            Some(obj) => obj,
            None => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Renders a scalar value as the string used for pattern matching.
/// Strings pass through, numbers are formatted; anything else has no
/// pattern-matchable representation.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Returns true for values that count as "present and non-empty" when
/// checking required fields: nulls and blank strings do not qualify.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}
