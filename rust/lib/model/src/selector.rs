//! Derived values.
//!
//! A getter wraps a [`Selector`]: either a plain function of the model
//! state, recomputed whenever the state changes, or a memo selector built
//! with [`create_selector`] that only re-runs its combiner when one of its
//! inputs produced a different value.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::handle::ModelHandle;
use crate::value::Value;

/// An input selector or a plain getter body.
pub type SelectFn = Arc<dyn Fn(&SelectorContext<'_>) -> Value + Send + Sync>;

/// Combiner of a memo selector: `(args, previous_result)`.
pub type CombineFn = Arc<dyn Fn(&[Value], Option<&Value>) -> Value + Send + Sync>;

/// What a selector sees: the (possibly scoped) model state and, when
/// evaluated through a model, the model itself.
pub struct SelectorContext<'a> {
    state: &'a Value,
    model: Option<&'a ModelHandle>,
}

impl<'a> SelectorContext<'a> {
    /// A context over a bare state value, outside of any model.
    pub fn new(state: &'a Value) -> Self {
        Self { state, model: None }
    }

    pub(crate) fn for_model(state: &'a Value, model: &'a ModelHandle) -> Self {
        Self {
            state,
            model: Some(model),
        }
    }

    pub fn state(&self) -> &Value {
        self.state
    }

    /// A field of the state, or `Null`.
    pub fn field(&self, key: &str) -> Value {
        self.state.get(key).cloned().unwrap_or_default()
    }

    /// Another getter of the same model (relative to the current scope).
    pub fn getter(&self, path: &str) -> Option<Value> {
        self.model.and_then(|m| m.getter(path))
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model
    }

    /// The whole state tree, when evaluated through a model.
    pub fn root(&self) -> Option<Value> {
        self.model.map(|m| m.runtime().get_state())
    }
}

/// Memo bookkeeping for one selector in one model instance.
#[derive(Debug, Clone)]
pub struct SelectorCacheEntry {
    pub last_args: Vec<Value>,
    pub last_result: Value,
}

#[derive(Clone)]
pub enum Selector {
    Plain(SelectFn),
    Memo(MemoSelector),
}

impl Selector {
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn(&SelectorContext<'_>) -> Value + Send + Sync + 'static,
    {
        Selector::Plain(Arc::new(f))
    }

    /// Evaluate against `cx`, reading and updating the memo slot.
    pub(crate) fn evaluate(
        &self,
        cx: &SelectorContext<'_>,
        slot: &mut Option<SelectorCacheEntry>,
    ) -> Value {
        match self {
            Selector::Plain(f) => f(cx),
            Selector::Memo(memo) => memo.evaluate(cx, slot),
        }
    }
}

#[derive(Clone)]
pub struct MemoSelector {
    inputs: Vec<SelectFn>,
    combine: CombineFn,
}

impl MemoSelector {
    fn evaluate(&self, cx: &SelectorContext<'_>, slot: &mut Option<SelectorCacheEntry>) -> Value {
        let args: Vec<Value> = self.inputs.iter().map(|input| input(cx)).collect();

        if let Some(entry) = slot.as_ref() {
            if !args_changed(&entry.last_args, &args) {
                return entry.last_result.clone();
            }
        }

        let previous = slot.as_ref().map(|entry| &entry.last_result);
        let result = (self.combine)(&args, previous);
        *slot = Some(SelectorCacheEntry {
            last_args: args,
            last_result: result.clone(),
        });
        result
    }
}

fn args_changed(previous: &[Value], next: &[Value]) -> bool {
    previous.len() != next.len() || previous.iter().zip(next).any(|(a, b)| !a.same(b))
}

/// Wrap a closure as an input selector.
pub fn input<F>(f: F) -> SelectFn
where
    F: Fn(&SelectorContext<'_>) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Build a memo selector from input selectors and a combiner.
///
/// The combiner receives the inputs' values and, after the first run, the
/// previous result.
pub fn create_selector<I, C>(inputs: I, combine: C) -> Selector
where
    I: IntoIterator<Item = SelectFn>,
    C: Fn(&[Value], Option<&Value>) -> Value + Send + Sync + 'static,
{
    Selector::Memo(MemoSelector {
        inputs: inputs.into_iter().collect(),
        combine: Arc::new(combine),
    })
}

/// A selector with its own cache, usable outside of a model.
pub struct Memoized {
    selector: Selector,
    cache: Mutex<Option<SelectorCacheEntry>>,
}

impl Memoized {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            cache: Mutex::new(None),
        }
    }

    pub fn select(&self, cx: &SelectorContext<'_>) -> Value {
        let mut slot = self.cache.lock().take();
        let value = self.selector.evaluate(cx, &mut slot);
        *self.cache.lock() = slot;
        value
    }
}
