//! Lifecycle callbacks and validation hooks.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::model::Model;

/// Points in the persistence lifecycle where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallbackEvent {
    BeforeValidation,
    BeforeSave,
    BeforeCreate,
    BeforeUpdate,
    AfterCreate,
    AfterUpdate,
    AfterSave,
    BeforeDestroy,
    AfterDestroy,
}

impl CallbackEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackEvent::BeforeValidation => "before_validation",
            CallbackEvent::BeforeSave => "before_save",
            CallbackEvent::BeforeCreate => "before_create",
            CallbackEvent::BeforeUpdate => "before_update",
            CallbackEvent::AfterCreate => "after_create",
            CallbackEvent::AfterUpdate => "after_update",
            CallbackEvent::AfterSave => "after_save",
            CallbackEvent::BeforeDestroy => "before_destroy",
            CallbackEvent::AfterDestroy => "after_destroy",
        }
    }
}

impl fmt::Display for CallbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by a hook to continue or abort the running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

pub type Hook = Arc<dyn Fn(&mut Model) -> Flow + Send + Sync>;
pub type Validator = Arc<dyn Fn(&Model, &mut Errors) + Send + Sync>;

/// Hooks registered on a model type, in registration order per event.
#[derive(Clone, Default)]
pub struct Callbacks {
    hooks: Vec<(CallbackEvent, Hook)>,
    validators: Vec<Validator>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field(
                "hooks",
                &self.hooks.iter().map(|(event, _)| event).collect::<Vec<_>>(),
            )
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, event: CallbackEvent, hook: F) -> Self
    where
        F: Fn(&mut Model) -> Flow + Send + Sync + 'static,
    {
        self.hooks.push((event, Arc::new(hook)));
        self
    }

    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Model, &mut Errors) + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Runs the hooks of one event. Stops at the first hook that halts.
    pub fn run(&self, event: CallbackEvent, model: &mut Model) -> Flow {
        for (_, hook) in self.hooks.iter().filter(|(e, _)| *e == event) {
            if hook(model) == Flow::Halt {
                tracing::debug!(event = %event, model = %model.type_name(), "callback halted");
                return Flow::Halt;
            }
        }

        Flow::Continue
    }

    /// Runs every validator and returns the collected errors.
    pub fn validate_model(&self, model: &Model) -> Errors {
        let mut errors = Errors::default();

        for validator in &self.validators {
            validator(model, &mut errors);
        }

        errors
    }

    /// Appends the hooks and validators of `other`, which run after the existing ones.
    pub fn extend(&mut self, other: &Callbacks) {
        self.hooks.extend(other.hooks.iter().cloned());
        self.validators.extend(other.validators.iter().cloned());
    }

    pub fn has_hooks(&self, event: CallbackEvent) -> bool {
        self.hooks.iter().any(|(e, _)| *e == event)
    }
}

/// Validation errors keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Errors {
    messages: BTreeMap<String, Vec<String>>,
}

impl Errors {
    pub fn add(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.messages
            .entry(attribute.into())
            .or_default()
            .push(message.into());
    }

    pub fn on(&self, attribute: &str) -> &[String] {
        self.messages.get(attribute).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.messages
            .iter()
            .flat_map(|(attr, msgs)| msgs.iter().map(move |m| (attr.as_str(), m.as_str())))
    }

    /// Messages in `"attribute message"` form.
    pub fn full_messages(&self) -> Vec<String> {
        self.iter().map(|(attr, msg)| format!("{attr} {msg}")).collect()
    }
}

/// Presence check for keys declared `required`.
pub fn validate_required(model: &Model, errors: &mut Errors) {
    for key in model.model_type().keys().iter().filter(|k| k.is_required()) {
        if model.read(key.name()).map_or(true, |value| value.is_blank()) {
            errors.add(key.name(), "can't be blank");
        }
    }
}
