// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Action implementations and the registry hooks dispatch through.
//!
//! Action definitions in the configuration carry their body as text only.
//! The behavior is supplied by Rust implementations registered under the
//! action's name:
//!
//! ```rust,ignore
//! let mut registry = ActionRegistry::new();
//! registry.register_fn("get_method_name", |inv| {
//!     Ok(inv.special(SpecialParameter::MethodName))
//! });
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::context::ContextGuard;
use crate::error::ActionError;
use crate::instrumentation::SpecialParameter;
use crate::types::Value;

/// Call-site information supplied by the interception layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationContext {
    pub class_name: String,
    pub method_name: String,
    pub parameter_types: Vec<String>,
    pub this: Value,
    pub args: Vec<Value>,
    /// Set before exit phases run.
    pub return_value: Value,
    /// Rendered error, when the method failed.
    pub thrown: Option<String>,
}

impl InvocationContext {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            this: Value::Null,
            return_value: Value::Null,
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_parameter_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Record the outcome of the method.
    pub fn returned(&mut self, value: impl Into<Value>) {
        self.return_value = value.into();
        self.thrown = None;
    }

    pub fn threw(&mut self, error: impl Into<String>) {
        self.return_value = Value::Null;
        self.thrown = Some(error.into());
    }

    /// Value of a special parameter.
    ///
    /// `_context` and `_attachments` have no value representation; actions
    /// reach them through [`ActionInvocation`].
    pub fn special(&self, parameter: SpecialParameter) -> Value {
        match parameter {
            SpecialParameter::This => self.this.clone(),
            SpecialParameter::Args => Value::List(self.args.clone()),
            SpecialParameter::Arg(i) => self.args.get(i).cloned().unwrap_or(Value::Null),
            SpecialParameter::ReturnValue => self.return_value.clone(),
            SpecialParameter::Thrown => self.thrown.clone().map_or(Value::Null, Value::String),
            SpecialParameter::Clazz => Value::string(&self.class_name),
            SpecialParameter::MethodName => Value::string(&self.method_name),
            SpecialParameter::ParameterTypes => {
                Value::List(self.parameter_types.iter().map(Value::string).collect())
            }
            SpecialParameter::Context | SpecialParameter::Attachments => Value::Null,
        }
    }
}

/// Everything an action sees while executing.
pub struct ActionInvocation<'a> {
    action: &'a str,
    inputs: BTreeMap<String, Value>,
    call_site: &'a InvocationContext,
    context: &'a ContextGuard,
    attachments: &'a mut HashMap<String, Value>,
}

impl<'a> ActionInvocation<'a> {
    pub(crate) fn new(
        action: &'a str,
        inputs: BTreeMap<String, Value>,
        call_site: &'a InvocationContext,
        context: &'a ContextGuard,
        attachments: &'a mut HashMap<String, Value>,
    ) -> Self {
        Self {
            action,
            inputs,
            call_site,
            context,
            attachments,
        }
    }

    pub fn action(&self) -> &str {
        self.action
    }

    /// A regular input, from a constant or from context data.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).filter(|v| !v.is_null())
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    pub fn special(&self, parameter: SpecialParameter) -> Value {
        self.call_site.special(parameter)
    }

    pub fn call_site(&self) -> &InvocationContext {
        self.call_site
    }

    /// The context frame of the hooked invocation.
    pub fn context(&self) -> &ContextGuard {
        self.context
    }

    /// Per-invocation scratch values shared between entry and exit actions.
    pub fn attachment(&self, key: &str) -> Option<&Value> {
        self.attachments.get(key)
    }

    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attachments.insert(key.into(), value.into());
    }

    /// Shorthand for a failed action result.
    pub fn fail(&self, message: impl Into<String>) -> ActionError {
        ActionError::failed(self.action, message)
    }
}

/// An action implementation.
pub trait Action: Send + Sync {
    /// Compute the value stored under the call's data key.
    fn execute(&self, invocation: &mut ActionInvocation<'_>) -> Result<Value, ActionError>;
}

struct FnAction<F>(F);

impl<F> Action for FnAction<F>
where
    F: Fn(&mut ActionInvocation<'_>) -> Result<Value, ActionError> + Send + Sync,
{
    fn execute(&self, invocation: &mut ActionInvocation<'_>) -> Result<Value, ActionError> {
        (self.0)(invocation)
    }
}

/// Action implementations by action name.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation, replacing any previous one.
    pub fn register<A: Action + 'static>(&mut self, name: impl Into<String>, action: A) -> &mut Self {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    /// Register a closure as an implementation.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&mut ActionInvocation<'_>) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        self.register(name, FnAction(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{self, DataDirectives, PropagationConfig};

    #[test]
    fn test_special_parameters() {
        let mut call = InvocationContext::new("Dummy", "methodA")
            .with_args(vec![Value::from(7i64)])
            .with_parameter_types(["long"]);
        assert_eq!(call.special(SpecialParameter::Arg(0)), Value::Long(7));
        assert_eq!(call.special(SpecialParameter::Arg(3)), Value::Null);
        assert_eq!(call.special(SpecialParameter::MethodName), Value::from("methodA"));
        assert_eq!(
            call.special(SpecialParameter::ParameterTypes),
            Value::List(vec![Value::from("long")])
        );

        call.threw("boom");
        assert_eq!(call.special(SpecialParameter::Thrown), Value::from("boom"));
        call.returned(1i64);
        assert_eq!(call.special(SpecialParameter::Thrown), Value::Null);
        assert_eq!(call.special(SpecialParameter::ReturnValue), Value::Long(1));
    }

    #[test]
    fn test_registry_dispatch() {
        let mut registry = ActionRegistry::new();
        registry
            .register_fn("echo", |inv| Ok(inv.input("value").cloned().unwrap_or(Value::Null)))
            .register_fn("fail", |inv| Err(inv.fail("nope")));
        assert_eq!(registry.names(), vec!["echo", "fail"]);

        let config = Arc::new(PropagationConfig::new(Arc::new(DataDirectives::default())));
        let guard = context::enter(&config);
        let call = InvocationContext::new("Dummy", "run");
        let mut attachments = HashMap::new();
        let inputs = BTreeMap::from([("value".to_string(), Value::from("x"))]);

        let echo = registry.get("echo").unwrap();
        let mut inv = ActionInvocation::new("echo", inputs, &call, &guard, &mut attachments);
        assert_eq!(echo.execute(&mut inv).unwrap(), Value::from("x"));

        let fail = registry.get("fail").unwrap();
        let mut inv = ActionInvocation::new("fail", BTreeMap::new(), &call, &guard, &mut attachments);
        assert_eq!(
            fail.execute(&mut inv).unwrap_err(),
            ActionError::failed("fail", "nope")
        );
    }
}
