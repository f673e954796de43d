// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared by the instrumentation engine.
//!
//! This module defines the runtime-facing descriptions of loaded types and
//! their methods (as reported by the instrumentation backend), and the
//! dynamically typed [`Value`] carried through context data, action inputs
//! and propagation headers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Type Descriptions
// ============================================================================

/// Visibility of a method as seen by the managed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    Protected,
    PackagePrivate,
    Private,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::Public
    }
}

/// Description of a single method of a loaded type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MethodDescription {
    /// Method name. Constructors are named `<init>`.
    pub name: String,

    /// Whether this method is a constructor.
    pub is_constructor: bool,

    /// Whether this method is declared synchronized.
    pub is_synchronized: bool,

    /// Fully qualified argument type names, in declaration order.
    pub arguments: Vec<String>,

    /// Declared visibility.
    pub visibility: Visibility,

    /// Whether the method overrides or implements a method of a supertype.
    pub inherited: bool,
}

impl MethodDescription {
    /// Create a public, non-synchronized method without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create a public constructor with the given argument types.
    pub fn constructor(arguments: Vec<String>) -> Self {
        Self {
            name: CONSTRUCTOR_NAME.to_string(),
            is_constructor: true,
            arguments,
            ..Default::default()
        }
    }

    /// Set the argument types.
    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Mark the method as synchronized.
    pub fn synchronized(mut self) -> Self {
        self.is_synchronized = true;
        self
    }

    /// Mark the method as overriding a supertype method.
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }

    /// Signature used to key hooks: `name(arg1,arg2)`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.arguments.join(","))
    }
}

/// Name used for constructors in method descriptions.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Description of a loaded type as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TypeDescription {
    /// Fully qualified type name.
    pub name: String,

    /// Superclass chain, nearest first (excluding the root object type).
    pub superclasses: Vec<String>,

    /// All implemented interfaces, including inherited ones.
    pub interfaces: Vec<String>,

    /// Declared methods and constructors.
    pub methods: Vec<MethodDescription>,

    /// Whether the type is an interface itself.
    pub is_interface: bool,

    /// Whether the type is synthetic (e.g. a generated lambda class).
    pub is_synthetic: bool,
}

impl TypeDescription {
    /// Create a type with the given name and no members.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a method.
    pub fn with_method(mut self, method: MethodDescription) -> Self {
        self.methods.push(method);
        self
    }

    /// Add an implemented interface.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Add a superclass (nearest first).
    pub fn with_superclass(mut self, superclass: impl Into<String>) -> Self {
        self.superclasses.push(superclass.into());
        self
    }

    /// Look up a method by signature.
    pub fn method(&self, signature: &str) -> Option<&MethodDescription> {
        self.methods.iter().find(|m| m.signature() == signature)
    }

    /// Whether this type is, extends or implements the given type name.
    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        self.name == type_name
            || self.superclasses.iter().any(|s| s == type_name)
            || self.interfaces.iter().any(|i| i == type_name)
    }

    /// The package part of the type name (empty for the default package).
    pub fn package(&self) -> &str {
        self.name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
    }
}

// ============================================================================
// Values
// ============================================================================

/// A dynamically typed value stored in context data or passed to actions.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Char(char),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Duration(Duration),
    List(Vec<Value>),
}

impl Value {
    /// Create a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used when recording metrics.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Long(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Duration(d) => Some(d.as_secs_f64() * 1000.0),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness used by `only-if-true` / `only-if-false` conditions.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short type tag used in propagation headers (`None` for strings).
    pub fn type_tag(&self) -> Option<&'static str> {
        match self {
            Self::Long(_) => Some("l"),
            Self::Double(_) => Some("d"),
            Self::Bool(_) => Some("b"),
            _ => None,
        }
    }

    /// Length of the rendered value, used for size limits.
    pub fn rendered_len(&self) -> usize {
        self.to_string().chars().count()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::Char(c) => write!(f, "{}", c),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Date(d) => write!(f, "{}", d),
            Self::Duration(d) => write!(f, "{}ms", d.as_millis()),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
