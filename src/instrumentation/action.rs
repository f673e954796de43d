// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resolved action definitions.
//!
//! An action declares typed inputs. Inputs whose names are reserved special
//! parameters (`_this`, `_args`, `_argN`, `_returnValue`, `_thrown`, ...) are
//! filled by the hook at call time; all others must be bound by each action
//! call, either to a constant or to a context data key.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::ActionSettings;

use super::binder::DeclaredType;
use super::violation::Violation;

/// Parameters supplied by the hook instead of the action call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpecialParameter {
    This,
    Args,
    Arg(usize),
    ReturnValue,
    Thrown,
    Context,
    Clazz,
    MethodName,
    ParameterTypes,
    Attachments,
}

impl SpecialParameter {
    /// Parse a reserved parameter name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "_this" => Some(Self::This),
            "_args" => Some(Self::Args),
            "_returnValue" => Some(Self::ReturnValue),
            "_thrown" => Some(Self::Thrown),
            "_context" => Some(Self::Context),
            "_clazz" => Some(Self::Clazz),
            "_methodName" => Some(Self::MethodName),
            "_parameterTypes" => Some(Self::ParameterTypes),
            "_attachments" => Some(Self::Attachments),
            _ => name
                .strip_prefix("_arg")
                .and_then(|idx| idx.parse().ok())
                .map(Self::Arg),
        }
    }

    /// Whether a name is reserved (a special parameter or any `_`-prefixed name).
    pub fn is_reserved(name: &str) -> bool {
        name.starts_with('_')
    }

    /// Only available in exit phases.
    pub fn is_exit_only(&self) -> bool {
        matches!(self, Self::ReturnValue | Self::Thrown)
    }

    /// Declared types accepted for this parameter; `None` means any.
    fn accepted_types(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::Args => Some(&["Object[]", "java.lang.Object[]"]),
            Self::Thrown => Some(&["Throwable", "java.lang.Throwable"]),
            Self::MethodName => Some(&["String", "java.lang.String"]),
            Self::Clazz => Some(&["Class", "java.lang.Class"]),
            Self::ParameterTypes => Some(&["Class[]", "java.lang.Class[]"]),
            _ => None,
        }
    }
}

impl fmt::Display for SpecialParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::This => write!(f, "_this"),
            Self::Args => write!(f, "_args"),
            Self::Arg(i) => write!(f, "_arg{}", i),
            Self::ReturnValue => write!(f, "_returnValue"),
            Self::Thrown => write!(f, "_thrown"),
            Self::Context => write!(f, "_context"),
            Self::Clazz => write!(f, "_clazz"),
            Self::MethodName => write!(f, "_methodName"),
            Self::ParameterTypes => write!(f, "_parameterTypes"),
            Self::Attachments => write!(f, "_attachments"),
        }
    }
}

/// A resolved action definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub name: String,
    /// Regular inputs, by name, with their declared type name.
    pub inputs: BTreeMap<String, String>,
    /// Special inputs filled by the hook.
    pub special_inputs: BTreeMap<String, SpecialParameter>,
    pub imports: Vec<String>,
    pub body: Option<String>,
    pub is_void: bool,
}

impl ResolvedAction {
    /// Resolve an action definition, collecting violations for invalid special inputs.
    pub fn resolve(name: &str, settings: &ActionSettings, violations: &mut Vec<Violation>) -> Self {
        let mut inputs = BTreeMap::new();
        let mut special_inputs = BTreeMap::new();

        for (param, type_name) in &settings.input {
            if !SpecialParameter::is_reserved(param) {
                inputs.insert(param.clone(), type_name.clone());
                continue;
            }
            match SpecialParameter::parse(param) {
                Some(special) => {
                    if let Some(accepted) = special.accepted_types() {
                        if !accepted.contains(&type_name.as_str()) {
                            violations.push(
                                Violation::new(
                                    "Action '{action}' declares special input '{input}' with type '{type}', expected {expected}",
                                )
                                .with("action", name)
                                .with("input", param)
                                .with("type", type_name)
                                .with("expected", accepted[0]),
                            );
                        }
                    }
                    special_inputs.insert(param.clone(), special);
                }
                None => violations.push(
                    Violation::new("Action '{action}' declares unknown special input '{input}'")
                        .with("action", name)
                        .with("input", param),
                ),
            }
        }

        if settings.value.is_some() && settings.value_body.is_some() {
            violations.push(
                Violation::new("Action '{action}' defines both value and value-body").with("action", name),
            );
        }

        Self {
            name: name.to_string(),
            inputs,
            special_inputs,
            imports: settings.imports.clone(),
            body: settings.value_body.clone().or_else(|| settings.value.clone()),
            is_void: settings.is_void,
        }
    }

    /// Declared type of a regular input.
    pub fn input_type(&self, name: &str) -> Option<DeclaredType> {
        self.inputs.get(name).map(|t| DeclaredType::parse(t))
    }

    /// Whether any special input is only available on exit.
    pub fn requires_exit(&self) -> bool {
        self.special_inputs.values().any(SpecialParameter::is_exit_only)
    }
}
