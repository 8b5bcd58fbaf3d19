//! Action-type and handler-path helpers.
//!
//! An action type is `<namespace>[<sep><key>]<sep><action>`; handler paths
//! inside a model are dot-joined (`todo.add`). All functions here are pure.

/// Separator used for handler paths in definitions and in the flattened
/// handler maps. Wire types use the configured separator instead and are
/// converted with [`canonical_path`].
pub const CANONICAL_SEPARATOR: &str = ".";

/// Compose an action type.
///
/// `action_type("todo", Some("7"), "setTitle", "/")` -> `"todo/7/setTitle"`
pub fn action_type(namespace: &str, key: Option<&str>, action: &str, sep: &str) -> String {
    match key {
        Some(key) => format!("{namespace}{sep}{key}{sep}{action}"),
        None => format!("{namespace}{sep}{action}"),
    }
}

/// Split an action type at the last separator into `(full_namespace, action)`.
///
/// Returns `None` when there is no separator or either side is empty.
pub fn split_action_type<'a>(action_type: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let (namespace, action) = action_type.rsplit_once(sep)?;
    if namespace.is_empty() || action.is_empty() {
        return None;
    }
    Some((namespace, action))
}

/// Peel a trailing key segment off a full namespace.
///
/// `split_key("todo/7", "/")` -> `Some(("todo", "7"))`
pub fn split_key<'a>(full_namespace: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let (namespace, key) = full_namespace.rsplit_once(sep)?;
    if namespace.is_empty() || key.is_empty() {
        return None;
    }
    Some((namespace, key))
}

/// Split a handler path into segments, dropping empty ones.
pub fn split_path(path: &str, sep: &str) -> Vec<String> {
    path.split(sep)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join segments with a separator.
pub fn join_path<I, S>(segments: I, sep: &str) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, segment) in segments.into_iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(segment.as_ref());
    }
    out
}

/// Rewrite a handler path from `sep` to the canonical dot form.
pub fn canonical_path(path: &str, sep: &str) -> String {
    if sep == CANONICAL_SEPARATOR {
        return path.to_string();
    }
    join_path(split_path(path, sep), CANONICAL_SEPARATOR)
}

/// Rewrite a canonical handler path into the wire separator.
pub fn wire_path(path: &str, sep: &str) -> String {
    if sep == CANONICAL_SEPARATOR {
        return path.to_string();
    }
    join_path(split_path(path, CANONICAL_SEPARATOR), sep)
}

/// Prefix a canonical handler path with a scope.
pub fn scoped(scope: &[String], name: &str) -> String {
    if scope.is_empty() {
        return name.to_string();
    }
    let mut out = join_path(scope, CANONICAL_SEPARATOR);
    if !name.is_empty() {
        out.push_str(CANONICAL_SEPARATOR);
        out.push_str(name);
    }
    out
}
