use std::collections::HashMap;

use parking_lot::RwLock;

/// A thread-safe Trie for MQTT-style topic pattern matching.
///
/// Store listeners are keyed by pattern over instance topics
/// (`namespace` or `namespace/key`):
/// - `+` matches exactly one topic level
/// - `#` matches any number of remaining levels (must be last segment)
///
/// Levels are separated by `/`.
///
/// ```ignore
/// let trie = Trie::new();
/// trie.insert("counter", 1);
/// trie.insert("todo/+", 2);
/// trie.insert("#", 3);
///
/// trie.match_topic("todo/7"); // [2, 3]
/// ```
pub struct Trie<T> {
    root: RwLock<TrieNode<T>>,
}

struct TrieNode<T> {
    /// Exact-match children, keyed by segment.
    children: HashMap<String, TrieNode<T>>,
    /// `+` child.
    single: Option<Box<TrieNode<T>>>,
    /// `#` child; only its values are used.
    multi: Option<Box<TrieNode<T>>>,
    /// Values of patterns ending here.
    values: Vec<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            single: None,
            multi: None,
            values: Vec::new(),
        }
    }
}

impl<T: Clone> Trie<T> {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(TrieNode::default()),
        }
    }

    pub fn insert(&self, pattern: &str, value: T) {
        self.root.write().insert(pattern, value);
    }

    /// Every value whose pattern matches the concrete `topic`.
    ///
    /// Values are cloned out, so callers run them without holding the lock.
    pub fn match_topic(&self, topic: &str) -> Vec<T> {
        let root = self.root.read();
        let mut results = Vec::new();
        root.collect_matches(topic, &mut results);
        results
    }

    /// Remove values matching `predicate` from the exact `pattern`.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove<F>(&self, pattern: &str, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        self.root.write().remove(pattern, &predicate)
    }
}

impl<T: Clone> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> TrieNode<T> {
    fn insert(&mut self, pattern: &str, value: T) {
        if pattern.is_empty() {
            self.values.push(value);
            return;
        }
        let (first, rest) = split_first(pattern);
        match first {
            "+" => self
                .single
                .get_or_insert_with(Box::default)
                .insert(rest, value),
            "#" => self.multi.get_or_insert_with(Box::default).values.push(value),
            segment => self
                .children
                .entry(segment.to_string())
                .or_default()
                .insert(rest, value),
        }
    }

    fn collect_matches(&self, topic: &str, results: &mut Vec<T>) {
        if let Some(multi) = &self.multi {
            // `#` also matches zero remaining levels.
            results.extend(multi.values.iter().cloned());
        }
        if topic.is_empty() {
            results.extend(self.values.iter().cloned());
            return;
        }
        let (first, rest) = split_first(topic);
        if let Some(child) = self.children.get(first) {
            child.collect_matches(rest, results);
        }
        if let Some(single) = &self.single {
            single.collect_matches(rest, results);
        }
    }

    fn remove<F>(&mut self, pattern: &str, predicate: &F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        fn retain<T, F: Fn(&T) -> bool>(values: &mut Vec<T>, predicate: &F) -> bool {
            let before = values.len();
            values.retain(|v| !predicate(v));
            values.len() < before
        }

        if pattern.is_empty() {
            return retain(&mut self.values, predicate);
        }
        let (first, rest) = split_first(pattern);
        match first {
            "+" => self
                .single
                .as_mut()
                .is_some_and(|child| child.remove(rest, predicate)),
            "#" => self
                .multi
                .as_mut()
                .is_some_and(|child| retain(&mut child.values, predicate)),
            segment => self
                .children
                .get_mut(segment)
                .is_some_and(|child| child.remove(rest, predicate)),
        }
    }
}

/// `"todo/7"` -> `("todo", "7")`, `"todo"` -> `("todo", "")`.
fn split_first(path: &str) -> (&str, &str) {
    path.split_once('/').unwrap_or((path, ""))
}
