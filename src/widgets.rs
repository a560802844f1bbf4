//! Widget value synchronization.
//!
//! Front ends expose their controls through [`WidgetAdapter`], one
//! implementation per toolkit. A [`Binding`] sits on top of an adapter and
//! gives every widget kind the same behaviour:
//!
//! - the value type is fixed by the first value set, later values are
//!   coerced to it (`"12.5"` into a float field, `3` into a text field);
//! - programmatic sets do not fire change callbacks unless asked to;
//! - when asked to, the callback fires exactly once, whether or not the
//!   toolkit itself emits a change event on programmatic sets.
//!
//! [`MemoryWidget`] is a headless adapter used by the CLI and the tests.

use crate::error::{AppResult, DaqError};
use crate::params::ParamStore;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of control a front end can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    /// Check box / checkable button
    Toggle,
    /// Slider, dial or spin box
    Slider,
    /// Free text entry
    TextField,
    /// Combo box (value is the selected index)
    Choice,
    /// Read-only readout (LCD, progress bar)
    Display,
}

impl WidgetKind {
    /// Whether toolkits typically raise their change event on programmatic
    /// value changes for this kind.
    pub fn emits_on_set(self) -> bool {
        matches!(self, WidgetKind::Toggle | WidgetKind::Slider | WidgetKind::Choice)
    }
}

/// Value types a binding can pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Floating point
    Float,
    /// Text
    Text,
}

/// A widget value.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
}

impl WidgetValue {
    /// Type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            WidgetValue::Bool(_) => ValueType::Bool,
            WidgetValue::Int(_) => ValueType::Int,
            WidgetValue::Float(_) => ValueType::Float,
            WidgetValue::Text(_) => ValueType::Text,
        }
    }

    /// Convert to `target`.
    pub fn coerce(self, target: ValueType) -> AppResult<WidgetValue> {
        let fail = |v: &WidgetValue| {
            DaqError::Widget(format!("cannot convert {:?} to {:?}", v, target))
        };
        if self.value_type() == target {
            return Ok(self);
        }
        let out = match (target, &self) {
            (ValueType::Text, v) => WidgetValue::Text(v.to_string()),
            (ValueType::Float, WidgetValue::Int(i)) => WidgetValue::Float(*i as f64),
            (ValueType::Float, WidgetValue::Bool(b)) => WidgetValue::Float(f64::from(u8::from(*b))),
            (ValueType::Float, WidgetValue::Text(s)) => {
                WidgetValue::Float(s.trim().parse().map_err(|_| fail(&self))?)
            }
            (ValueType::Int, WidgetValue::Bool(b)) => WidgetValue::Int(i64::from(*b)),
            (ValueType::Int, WidgetValue::Float(f)) if f.is_finite() => {
                WidgetValue::Int(f.trunc() as i64)
            }
            (ValueType::Int, WidgetValue::Text(s)) => {
                WidgetValue::Int(s.trim().parse().map_err(|_| fail(&self))?)
            }
            (ValueType::Bool, WidgetValue::Int(i)) => WidgetValue::Bool(*i != 0),
            (ValueType::Bool, WidgetValue::Float(f)) => WidgetValue::Bool(*f != 0.0),
            (ValueType::Bool, WidgetValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => WidgetValue::Bool(true),
                "false" | "0" | "off" | "no" | "" => WidgetValue::Bool(false),
                _ => return Err(fail(&self)),
            },
            _ => return Err(fail(&self)),
        };
        Ok(out)
    }

    /// Numeric view (booleans are 0/1; text is not numeric).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WidgetValue::Bool(b) => Some(f64::from(u8::from(*b))),
            WidgetValue::Int(i) => Some(*i as f64),
            WidgetValue::Float(f) => Some(*f),
            WidgetValue::Text(_) => None,
        }
    }

    /// From a parameter document value. Sequences and maps have no widget form.
    pub fn from_yaml(value: &Value) -> Option<WidgetValue> {
        match value {
            Value::Bool(b) => Some(WidgetValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(WidgetValue::Int)
                .or_else(|| n.as_f64().map(WidgetValue::Float)),
            Value::String(s) => Some(WidgetValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for WidgetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetValue::Bool(b) => write!(f, "{}", b),
            WidgetValue::Int(i) => write!(f, "{}", i),
            WidgetValue::Float(x) => write!(f, "{}", x),
            WidgetValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<WidgetValue> for Value {
    fn from(value: WidgetValue) -> Self {
        match value {
            WidgetValue::Bool(b) => Value::Bool(b),
            WidgetValue::Int(i) => Value::from(i),
            WidgetValue::Float(f) => Value::from(f),
            WidgetValue::Text(s) => Value::String(s),
        }
    }
}

impl From<bool> for WidgetValue {
    fn from(v: bool) -> Self {
        WidgetValue::Bool(v)
    }
}

impl From<i64> for WidgetValue {
    fn from(v: i64) -> Self {
        WidgetValue::Int(v)
    }
}

impl From<f64> for WidgetValue {
    fn from(v: f64) -> Self {
        WidgetValue::Float(v)
    }
}

impl From<&str> for WidgetValue {
    fn from(v: &str) -> Self {
        WidgetValue::Text(v.to_string())
    }
}

impl From<String> for WidgetValue {
    fn from(v: String) -> Self {
        WidgetValue::Text(v)
    }
}

/// Change callback registered on a widget.
pub type ChangeCallback = Box<dyn FnMut(&WidgetValue) + Send>;

/// What a toolkit must provide for one control.
pub trait WidgetAdapter: Send {
    /// Kind of control.
    fn kind(&self) -> WidgetKind;

    /// Current value in the widget's native type.
    fn get_value(&self) -> WidgetValue;

    /// Change the value. Raises the change event if the kind does so natively
    /// and notifications are not blocked.
    fn set_value(&mut self, value: WidgetValue);

    /// Register a change callback.
    fn on_change(&mut self, callback: ChangeCallback);

    /// Whether change notifications are currently blocked.
    fn notifications_blocked(&self) -> bool;

    /// Block or unblock change notifications; returns the previous state.
    fn set_notifications_blocked(&mut self, blocked: bool) -> bool;

    /// Raise the change event now (no-op while blocked).
    fn notify_change(&mut self);

    /// Whether `set_value` raises the change event by itself.
    fn emits_on_set(&self) -> bool {
        self.kind().emits_on_set()
    }
}

/// Headless widget holding its value in memory.
pub struct MemoryWidget {
    kind: WidgetKind,
    value: WidgetValue,
    emits_on_set: bool,
    blocked: bool,
    callbacks: Vec<ChangeCallback>,
}

impl MemoryWidget {
    /// Widget of `kind` showing `initial`.
    pub fn new(kind: WidgetKind, initial: impl Into<WidgetValue>) -> Self {
        Self {
            kind,
            value: initial.into(),
            emits_on_set: kind.emits_on_set(),
            blocked: false,
            callbacks: Vec::new(),
        }
    }

    /// Override whether programmatic sets raise the change event (e.g. a
    /// checkable push button, which does not).
    pub fn with_emits_on_set(mut self, emits: bool) -> Self {
        self.emits_on_set = emits;
        self
    }

    /// Simulate the user editing the widget.
    pub fn user_input(&mut self, value: impl Into<WidgetValue>) {
        self.value = value.into();
        self.notify_change();
    }
}

impl WidgetAdapter for MemoryWidget {
    fn kind(&self) -> WidgetKind {
        self.kind
    }

    fn get_value(&self) -> WidgetValue {
        self.value.clone()
    }

    fn set_value(&mut self, value: WidgetValue) {
        self.value = value;
        if self.emits_on_set {
            self.notify_change();
        }
    }

    fn on_change(&mut self, callback: ChangeCallback) {
        self.callbacks.push(callback);
    }

    fn notifications_blocked(&self) -> bool {
        self.blocked
    }

    fn set_notifications_blocked(&mut self, blocked: bool) -> bool {
        std::mem::replace(&mut self.blocked, blocked)
    }

    fn notify_change(&mut self) {
        if self.blocked {
            return;
        }
        let value = self.value.clone();
        for callback in &mut self.callbacks {
            callback(&value);
        }
    }

    fn emits_on_set(&self) -> bool {
        self.emits_on_set
    }
}

/// Uniform access to one widget.
pub struct Binding {
    widget: Box<dyn WidgetAdapter>,
    value_type: Option<ValueType>,
}

impl Binding {
    /// Bind `widget`.
    pub fn new(widget: impl WidgetAdapter + 'static) -> Self {
        Self {
            widget: Box::new(widget),
            value_type: None,
        }
    }

    /// Bind `widget` and register `callback` for its change event.
    pub fn with_callback(
        widget: impl WidgetAdapter + 'static,
        callback: impl FnMut(&WidgetValue) + Send + 'static,
    ) -> Self {
        let mut binding = Self::new(widget);
        binding.widget.on_change(Box::new(callback));
        binding
    }

    /// Kind of the bound widget.
    pub fn kind(&self) -> WidgetKind {
        self.widget.kind()
    }

    /// Pinned value type, once a value has been set.
    pub fn value_type(&self) -> Option<ValueType> {
        self.value_type
    }

    /// Set the widget value.
    ///
    /// The first call pins the value type; later values are coerced to it.
    /// With `notify == false` no change callback fires. With `notify == true`
    /// it fires once, unless notifications were already blocked by someone
    /// else. The blocked state is left as it was found.
    pub fn set(&mut self, value: impl Into<WidgetValue>, notify: bool) -> AppResult<()> {
        let value = value.into();
        let value = match self.value_type {
            None => {
                self.value_type = Some(value.value_type());
                value
            }
            Some(t) => value.coerce(t)?,
        };

        let previous = self.widget.notifications_blocked();
        if !notify {
            self.widget.set_notifications_blocked(true);
        }
        self.widget.set_value(value);
        if notify && !self.widget.emits_on_set() {
            self.widget.notify_change();
        }
        self.widget.set_notifications_blocked(previous);
        Ok(())
    }

    /// Widget value, coerced to the pinned type if there is one.
    pub fn get(&self) -> AppResult<WidgetValue> {
        let value = self.widget.get_value();
        match self.value_type {
            Some(t) => value.coerce(t),
            None => Ok(value),
        }
    }

    /// Raise the widget's change event.
    pub fn emit(&mut self) {
        self.widget.notify_change();
    }
}

/// Named bindings synchronized with a [`ParamStore`].
#[derive(Default)]
pub struct BindingSet {
    bindings: BTreeMap<String, Binding>,
}

impl BindingSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the binding for `name`.
    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) {
        self.bindings.insert(name.into(), binding);
    }

    /// Binding for `name`.
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Mutable binding for `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.bindings.get_mut(name)
    }

    /// Current value of `name`.
    pub fn value(&self, name: &str) -> Option<AppResult<WidgetValue>> {
        self.bindings.get(name).map(Binding::get)
    }

    /// Push parameter values into the widgets without firing callbacks.
    ///
    /// Returns the names of bindings the document had no usable value for.
    pub fn apply_params(&mut self, params: &ParamStore) -> AppResult<Vec<String>> {
        let mut missing = Vec::new();
        for (name, binding) in &mut self.bindings {
            match params.get(name).and_then(WidgetValue::from_yaml) {
                Some(value) => binding.set(value, false)?,
                None => missing.push(name.clone()),
            }
        }
        Ok(missing)
    }

    /// Copy every widget value into `params`.
    pub fn collect_params(&self, params: &mut ParamStore) -> AppResult<()> {
        for (name, binding) in &self.bindings {
            params.set(name.clone(), Value::from(binding.get()?));
        }
        Ok(())
    }
}
