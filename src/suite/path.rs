//! Dotted paths into decoded bodies (`todos.0.title`, `challengeStatus.POST_TODOS_415`)

use serde_json::Value;

/// Resolve `path` against `value`; the empty path is the value itself
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup_mut<'v>(value: &'v mut Value, path: &str) -> Option<&'v mut Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

/// Store `new` at `path`, returning false when the location does not exist
///
/// An object gains the last segment as a new key; array slots must exist.
pub fn set(value: &mut Value, path: &str, new: Value) -> bool {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None if path.is_empty() => {
            *value = new;
            return true;
        }
        None => ("", path),
    };

    match lookup_mut(value, parent) {
        Some(Value::Object(map)) => {
            map.insert(last.to_string(), new);
            true
        }
        Some(Value::Array(items)) => match last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = new;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// Render a value for interpolation into text
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
