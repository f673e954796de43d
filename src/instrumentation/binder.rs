// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Action call binding.
//!
//! Validates each action invocation against the action's declared inputs and
//! converts constant inputs to the declared types. All checks run and all
//! problems are reported; nothing is deferred to weave time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{ActionCallSettings, ConditionSettings};
use crate::types::Value;

use super::action::{ResolvedAction, SpecialParameter};
use super::violation::Violation;

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$")
        .unwrap_or_else(|e| panic!("invalid duration pattern: {e}"))
});

// ============================================================================
// Declared Types
// ============================================================================

/// Primitive types of the managed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
}

/// Classification of a declared input type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    Primitive(Primitive),
    Boxed(Primitive),
    String,
    Object,
    Instant,
    LocalDate,
    Duration,
    /// A type that cannot be resolved at validation time.
    Unresolved(String),
}

impl DeclaredType {
    /// Classify a type name.
    pub fn parse(type_name: &str) -> Self {
        let name = type_name.trim();
        if name.ends_with("[]") {
            return Self::Object;
        }
        let simple = name
            .strip_prefix("java.lang.")
            .or_else(|| name.strip_prefix("java.time."))
            .or_else(|| name.strip_prefix("java.util."))
            .unwrap_or(name);

        match simple {
            "boolean" => Self::Primitive(Primitive::Boolean),
            "byte" => Self::Primitive(Primitive::Byte),
            "short" => Self::Primitive(Primitive::Short),
            "int" => Self::Primitive(Primitive::Int),
            "long" => Self::Primitive(Primitive::Long),
            "float" => Self::Primitive(Primitive::Float),
            "double" => Self::Primitive(Primitive::Double),
            "char" => Self::Primitive(Primitive::Char),
            "Boolean" => Self::Boxed(Primitive::Boolean),
            "Byte" => Self::Boxed(Primitive::Byte),
            "Short" => Self::Boxed(Primitive::Short),
            "Integer" => Self::Boxed(Primitive::Int),
            "Long" => Self::Boxed(Primitive::Long),
            "Float" => Self::Boxed(Primitive::Float),
            "Double" => Self::Boxed(Primitive::Double),
            "Character" => Self::Boxed(Primitive::Char),
            "String" => Self::String,
            "Object" | "CharSequence" | "Number" | "Map" | "List" | "Set" | "Collection"
            | "Iterable" | "Throwable" | "Class" => Self::Object,
            "Instant" => Self::Instant,
            "LocalDate" => Self::LocalDate,
            "Duration" => Self::Duration,
            _ => Self::Unresolved(name.to_string()),
        }
    }
}

/// Convert a constant literal to the declared type.
///
/// Null is rejected for primitives and accepted otherwise. Unresolved types
/// accept only null. Numbers and temporal values are parsed with fixed,
/// locale-independent rules.
pub fn convert_constant(value: &serde_json::Value, ty: &DeclaredType) -> Result<Value, String> {
    use serde_json::Value as Json;

    if value.is_null() {
        return match ty {
            DeclaredType::Primitive(_) => Err("null is not allowed for a primitive type".to_string()),
            _ => Ok(Value::Null),
        };
    }

    match ty {
        DeclaredType::Unresolved(name) => Err(format!("type '{}' cannot be resolved", name)),
        DeclaredType::String => match value {
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Number(n) => Ok(Value::String(n.to_string())),
            Json::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err("expected a scalar literal".to_string()),
        },
        DeclaredType::Object => natural_value(value),
        DeclaredType::Primitive(p) | DeclaredType::Boxed(p) => convert_primitive(*p, value),
        DeclaredType::Instant => match value {
            Json::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                .map_err(|e| format!("invalid timestamp '{}': {}", s, e)),
            Json::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(Value::Timestamp)
                .ok_or_else(|| format!("invalid epoch milliseconds {}", n)),
            _ => Err("expected a timestamp".to_string()),
        },
        DeclaredType::LocalDate => match value {
            Json::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| format!("invalid date '{}': {}", s, e)),
            _ => Err("expected a date string".to_string()),
        },
        DeclaredType::Duration => match value {
            Json::Number(n) => n
                .as_u64()
                .map(|ms| Value::Duration(Duration::from_millis(ms)))
                .ok_or_else(|| format!("invalid duration {}", n)),
            Json::String(s) => parse_iso_duration(s.trim())
                .map(Value::Duration)
                .ok_or_else(|| format!("invalid duration '{}'", s)),
            _ => Err("expected a duration".to_string()),
        },
    }
}

fn natural_value(value: &serde_json::Value) -> Result<Value, String> {
    use serde_json::Value as Json;
    match value {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(v) => Ok(Value::Long(v)),
            None => n
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| format!("unsupported number {}", n)),
        },
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => items
            .iter()
            .map(natural_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Json::Object(_) => Err("structured constants are not supported".to_string()),
    }
}

fn convert_primitive(primitive: Primitive, value: &serde_json::Value) -> Result<Value, String> {
    use serde_json::Value as Json;

    let text = match value {
        Json::String(s) => Some(s.trim()),
        _ => None,
    };

    match primitive {
        Primitive::Boolean => match (value, text) {
            (Json::Bool(b), _) => Ok(Value::Bool(*b)),
            (_, Some(t)) if t.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            (_, Some(t)) if t.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", value)),
        },
        Primitive::Byte | Primitive::Short | Primitive::Int | Primitive::Long => {
            let parsed = match (value, text) {
                (Json::Number(n), _) => n.as_i64(),
                (_, Some(t)) => t.parse::<i64>().ok(),
                _ => None,
            };
            let v = parsed.ok_or_else(|| format!("'{}' is not an integer", value))?;
            let (min, max) = match primitive {
                Primitive::Byte => (i8::MIN as i64, i8::MAX as i64),
                Primitive::Short => (i16::MIN as i64, i16::MAX as i64),
                Primitive::Int => (i32::MIN as i64, i32::MAX as i64),
                _ => (i64::MIN, i64::MAX),
            };
            if v < min || v > max {
                return Err(format!("{} is out of range", v));
            }
            Ok(Value::Long(v))
        }
        Primitive::Float | Primitive::Double => {
            let parsed = match (value, text) {
                (Json::Number(n), _) => n.as_f64(),
                (_, Some(t)) => t.parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .map(Value::Double)
                .ok_or_else(|| format!("'{}' is not a number", value))
        }
        Primitive::Char => {
            let mut chars = text.map(str::chars).into_iter().flatten();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Char(c)),
                _ => Err(format!("'{}' is not a single character", value)),
            }
        }
    }
}

/// Parse an ISO-8601 duration such as `PT1.5S` or `P1DT2H`.
pub fn parse_iso_duration(text: &str) -> Option<Duration> {
    if text.eq_ignore_ascii_case("P") || text.eq_ignore_ascii_case("PT") {
        return None;
    }
    let caps = ISO_DURATION.captures(text)?;
    let part = |i: usize| -> f64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let seconds = part(1) * 86_400.0 + part(2) * 3_600.0 + part(3) * 60.0 + part(4);
    if !seconds.is_finite() {
        return None;
    }
    // Out of range values become an invalid duration instead of a panic.
    Duration::try_from_secs_f64(seconds).ok()
}

// ============================================================================
// Bound Action Calls
// ============================================================================

/// Execution conditions of an action call, each naming a data key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub only_if_true: Option<String>,
    pub only_if_false: Option<String>,
    pub only_if_null: Option<String>,
    pub only_if_not_null: Option<String>,
}

impl Conditions {
    pub fn from_settings(settings: &ConditionSettings) -> Self {
        Self {
            only_if_true: settings.only_if_true.clone(),
            only_if_false: settings.only_if_false.clone(),
            only_if_null: settings.only_if_null.clone(),
            only_if_not_null: settings.only_if_not_null.clone(),
        }
    }

    /// Data keys the conditions read.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        [
            &self.only_if_true,
            &self.only_if_false,
            &self.only_if_null,
            &self.only_if_not_null,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
    }

    /// Evaluate against a data lookup. All declared conditions must hold.
    pub fn evaluate<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<Value>,
    {
        if let Some(key) = &self.only_if_true {
            if lookup(key).and_then(|v| v.as_bool()) != Some(true) {
                return false;
            }
        }
        if let Some(key) = &self.only_if_false {
            if lookup(key).and_then(|v| v.as_bool()) != Some(false) {
                return false;
            }
        }
        if let Some(key) = &self.only_if_null {
            if lookup(key).is_some_and(|v| !v.is_null()) {
                return false;
            }
        }
        if let Some(key) = &self.only_if_not_null {
            if lookup(key).map_or(true, |v| v.is_null()) {
                return false;
            }
        }
        true
    }
}

/// A validated action invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    /// Slot name; also the data key the result is written to.
    pub data_key: String,
    pub action: Arc<ResolvedAction>,
    pub constant_inputs: BTreeMap<String, Value>,
    /// Parameter name to context data key.
    pub data_inputs: BTreeMap<String, String>,
    pub conditions: Conditions,
    /// Rule the call was inherited from through `include`.
    pub inherited_from: Option<String>,
}

impl ActionCall {
    /// Data keys this call reads.
    pub fn data_dependencies(&self) -> impl Iterator<Item = &str> {
        self.data_inputs
            .values()
            .map(String::as_str)
            .chain(self.conditions.keys())
    }
}

/// Validate an action call against its action definition.
///
/// Every check runs independently and all violations are returned.
pub fn validate_action_call(
    call_name: &str,
    call: &ActionCallSettings,
    action: &ResolvedAction,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let violation = |message: &str, input: &str| {
        Violation::new(message)
            .with("call", call_name)
            .with("action", &action.name)
            .with("input", input)
    };

    for name in call.constant_input.keys() {
        if call.data_input.contains_key(name) {
            violations.push(violation(
                "Input '{input}' of call '{call}' is assigned both a constant and a data value",
                name,
            ));
        }
    }

    let assigned = call.constant_input.keys().chain(
        call.data_input
            .keys()
            .filter(|k| !call.constant_input.contains_key(*k)),
    );
    for name in assigned {
        if SpecialParameter::is_reserved(name) {
            violations.push(violation(
                "Call '{call}' assigns the special input '{input}', which is provided by the hook",
                name,
            ));
        } else if !action.inputs.contains_key(name) {
            violations.push(violation(
                "Call '{call}' assigns '{input}', which action '{action}' does not declare",
                name,
            ));
        }
    }

    for name in action.inputs.keys() {
        if !call.constant_input.contains_key(name) && !call.data_input.contains_key(name) {
            violations.push(violation(
                "Input '{input}' of action '{action}' is not assigned by call '{call}'",
                name,
            ));
        }
    }

    for (name, value) in &call.constant_input {
        let Some(declared) = action.input_type(name) else {
            continue;
        };
        if let Err(reason) = convert_constant(value, &declared) {
            violations.push(
                violation(
                    "Constant for input '{input}' of call '{call}' cannot be converted: {reason}",
                    name,
                )
                .with("reason", reason),
            );
        }
    }

    violations
}

/// Validate and bind an action call.
pub fn bind_action_call(
    call_name: &str,
    call: &ActionCallSettings,
    inherited_from: Option<&str>,
    actions: &BTreeMap<String, Arc<ResolvedAction>>,
) -> Result<ActionCall, Vec<Violation>> {
    let Some(action) = actions.get(&call.action) else {
        return Err(vec![Violation::new("Call '{call}' uses the undefined action '{action}'")
            .with("call", call_name)
            .with("action", &call.action)]);
    };

    let violations = validate_action_call(call_name, call, action);
    if !violations.is_empty() {
        return Err(violations);
    }

    let mut constant_inputs = BTreeMap::new();
    for (name, value) in &call.constant_input {
        let declared = action
            .input_type(name)
            .unwrap_or_else(|| DeclaredType::Unresolved(String::new()));
        let converted = convert_constant(value, &declared).map_err(|reason| {
            vec![Violation::new("Constant for input '{input}' cannot be converted: {reason}")
                .with("input", name)
                .with("reason", reason)]
        })?;
        constant_inputs.insert(name.clone(), converted);
    }

    Ok(ActionCall {
        data_key: call_name.to_string(),
        action: Arc::clone(action),
        constant_inputs,
        data_inputs: call.data_input.clone(),
        conditions: Conditions::from_settings(&call.conditions),
        inherited_from: inherited_from.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionSettings;
    use serde_json::json;

    fn action(inputs: &[(&str, &str)]) -> ResolvedAction {
        let mut settings = ActionSettings::default();
        for (n, t) in inputs {
            settings.input.insert(n.to_string(), t.to_string());
        }
        let mut violations = Vec::new();
        ResolvedAction::resolve("act", &settings, &mut violations)
    }

    fn call(constants: &[(&str, serde_json::Value)], data: &[(&str, &str)]) -> ActionCallSettings {
        let mut c = ActionCallSettings::of("act");
        for (n, v) in constants {
            c.constant_input.insert(n.to_string(), v.clone());
        }
        for (n, k) in data {
            c.data_input.insert(n.to_string(), k.to_string());
        }
        c
    }

    #[test]
    fn test_valid_call() {
        let a = action(&[("a", "int"), ("b", "String"), ("_this", "Object")]);
        let c = call(&[("a", json!(5))], &[("b", "key")]);
        assert!(validate_action_call("c", &c, &a).is_empty());
    }

    #[test]
    fn test_duplicate_assignment_reported_once() {
        let a = action(&[("a", "String")]);
        let c = call(&[("a", json!("x"))], &[("a", "key")]);
        let violations = validate_action_call("c", &c, &a);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("both a constant and a data value"));
    }

    #[test]
    fn test_missing_and_unused_inputs() {
        let a = action(&[("a", "String"), ("b", "String")]);
        let c = call(&[("a", json!("x")), ("zzz", json!(1))], &[]);
        let violations = validate_action_call("c", &c, &a);
        let inputs: Vec<_> = violations.iter().filter_map(|v| v.parameter("input")).collect();
        assert_eq!(inputs, vec!["zzz", "b"]);
    }

    #[test]
    fn test_special_input_assignment() {
        let a = action(&[("_this", "Object")]);
        let c = call(&[], &[("_this", "key")]);
        let violations = validate_action_call("c", &c, &a);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("special input"));
    }

    #[test]
    fn test_all_violations_collected() {
        let a = action(&[("a", "int"), ("b", "String")]);
        let c = call(&[("a", json!("notanumber")), ("_args", json!(1))], &[]);
        let violations = validate_action_call("c", &c, &a);
        // special input, missing b, unconvertible a
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_null_constants() {
        let ty = DeclaredType::parse("int");
        assert!(convert_constant(&json!(null), &ty).is_err());
        let ty = DeclaredType::parse("java.lang.Integer");
        assert_eq!(convert_constant(&json!(null), &ty), Ok(Value::Null));
        let ty = DeclaredType::parse("com.acme.Unknown");
        assert_eq!(convert_constant(&json!(null), &ty), Ok(Value::Null));
        assert!(convert_constant(&json!("x"), &ty).is_err());
    }

    #[test]
    fn test_numeric_conversion() {
        let int = DeclaredType::parse("int");
        assert_eq!(convert_constant(&json!("42"), &int), Ok(Value::Long(42)));
        assert_eq!(convert_constant(&json!(-7), &int), Ok(Value::Long(-7)));
        assert!(convert_constant(&json!(3_000_000_000i64), &int).is_err());
        assert!(convert_constant(&json!("1,5"), &DeclaredType::parse("double")).is_err());
        assert_eq!(
            convert_constant(&json!("1.5"), &DeclaredType::parse("double")),
            Ok(Value::Double(1.5))
        );
        assert!(convert_constant(&json!(200), &DeclaredType::parse("byte")).is_err());
    }

    #[test]
    fn test_other_conversions() {
        assert_eq!(
            convert_constant(&json!("TRUE"), &DeclaredType::parse("boolean")),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            convert_constant(&json!("x"), &DeclaredType::parse("char")),
            Ok(Value::Char('x'))
        );
        assert!(convert_constant(&json!("xy"), &DeclaredType::parse("char")).is_err());
        assert_eq!(
            convert_constant(&json!(12), &DeclaredType::parse("String")),
            Ok(Value::String("12".to_string()))
        );
        assert_eq!(
            convert_constant(&json!([1, "a"]), &DeclaredType::parse("Object")),
            Ok(Value::List(vec![Value::Long(1), Value::from("a")]))
        );
    }

    #[test]
    fn test_temporal_conversion() {
        let instant = convert_constant(&json!("2024-05-01T10:00:00Z"), &DeclaredType::parse("java.time.Instant"));
        assert!(matches!(instant, Ok(Value::Timestamp(_))));
        let date = convert_constant(&json!("2024-05-01"), &DeclaredType::parse("LocalDate"));
        assert_eq!(date, Ok(Value::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())));
        let duration = convert_constant(&json!("PT1.5S"), &DeclaredType::parse("Duration"));
        assert_eq!(duration, Ok(Value::Duration(Duration::from_millis(1500))));
        assert!(convert_constant(&json!("01/05/2024"), &DeclaredType::parse("LocalDate")).is_err());
    }

    #[test]
    fn test_iso_duration() {
        assert_eq!(parse_iso_duration("PT2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_iso_duration("P1DT1H"), Some(Duration::from_secs(90_000)));
        assert_eq!(parse_iso_duration("PT"), None);
        assert_eq!(parse_iso_duration("5 minutes"), None);
    }

    #[test]
    fn test_oversized_durations_do_not_panic() {
        assert_eq!(parse_iso_duration("PT99999999999999999999999S"), None);
        assert_eq!(parse_iso_duration(&format!("P{}D", "9".repeat(400))), None);

        let err = convert_constant(&json!("PT99999999999999999999999S"), &DeclaredType::parse("java.time.Duration"));
        assert_eq!(err, Err("invalid duration 'PT99999999999999999999999S'".to_string()));
        let millis = convert_constant(&json!(u64::MAX), &DeclaredType::parse("Duration"));
        assert_eq!(millis, Ok(Value::Duration(Duration::from_millis(u64::MAX))));
        assert!(convert_constant(&json!(-1), &DeclaredType::parse("Duration")).is_err());
    }

    #[test]
    fn test_resolve_reports_oversized_duration_constant() {
        use crate::config::{InstrumentationSettings, RuleSettings};
        use crate::instrumentation::ConfigurationResolver;

        let mut settings = InstrumentationSettings::default();
        let mut act = ActionSettings::default();
        act.input.insert("d".to_string(), "java.time.Duration".to_string());
        act.value = Some("d".to_string());
        settings.actions.insert("act".to_string(), act);
        let mut rule = RuleSettings::default();
        rule.entry.insert(
            "slot".to_string(),
            call(&[("d", json!("PT99999999999999999999999S"))], &[]),
        );
        settings.rules.insert("r".to_string(), rule);

        let violations = ConfigurationResolver::new().resolve(settings).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| v.to_string().contains("invalid duration 'PT99999999999999999999999S'")));
    }

    #[test]
    fn test_bind_undefined_action() {
        let actions = BTreeMap::new();
        let err = bind_action_call("c", &ActionCallSettings::of("nope"), None, &actions).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].parameter("action"), Some("nope"));
    }

    #[test]
    fn test_bind_converts_constants() {
        let mut actions = BTreeMap::new();
        actions.insert("act".to_string(), Arc::new(action(&[("n", "long"), ("k", "String")])));
        let c = call(&[("n", json!("10"))], &[("k", "http_path")]);
        let bound = bind_action_call("slot", &c, Some("parent"), &actions).unwrap();
        assert_eq!(bound.data_key, "slot");
        assert_eq!(bound.constant_inputs["n"], Value::Long(10));
        assert_eq!(bound.inherited_from.as_deref(), Some("parent"));
        assert_eq!(bound.data_dependencies().collect::<Vec<_>>(), vec!["http_path"]);
    }

    #[test]
    fn test_conditions() {
        let conditions = Conditions {
            only_if_true: Some("flag".to_string()),
            only_if_not_null: Some("value".to_string()),
            ..Default::default()
        };
        let lookup = |flag: Option<Value>, value: Option<Value>| {
            move |k: &str| if k == "flag" { flag.clone() } else { value.clone() }
        };
        assert!(conditions.evaluate(lookup(Some(Value::Bool(true)), Some(Value::from("x")))));
        assert!(!conditions.evaluate(lookup(Some(Value::Bool(false)), Some(Value::from("x")))));
        assert!(!conditions.evaluate(lookup(Some(Value::Bool(true)), None)));
        assert!(!conditions.evaluate(lookup(None, Some(Value::from("x")))));
    }
}
