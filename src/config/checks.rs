// src/config/checks.rs

//! Declarative option validation and host tool checks

use super::ComposeConf;
use toml::Value;

/// TOML value kinds an option may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Str,
    Bool,
    Int,
    List,
    Table,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueKind::Str, Value::String(_))
                | (ValueKind::Bool, Value::Boolean(_))
                | (ValueKind::Int, Value::Integer(_))
                | (ValueKind::List, Value::Array(_))
                | (ValueKind::Table, Value::Table(_))
        )
    }

    fn of(value: &Value) -> &'static str {
        match value {
            Value::String(_) => "str",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::Datetime(_) => "datetime",
            Value::Array(_) => "list",
            Value::Table(_) => "table",
        }
    }
}

/// Predicate deciding whether a requires/conflicts rule applies
pub type Condition = fn(&Value) -> bool;

pub fn is_true(value: &Value) -> bool {
    truthy(value)
}

pub fn is_false(value: &Value) -> bool {
    !truthy(value)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Integer(i) => *i != 0,
        Value::Array(a) => !a.is_empty(),
        Value::Table(t) => !t.is_empty(),
        _ => true,
    }
}

/// Validation rules for a single option
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: &'static str,
    pub optional: bool,
    pub deprecated: Option<&'static str>,
    pub expected_kinds: Vec<ValueKind>,
    pub expected_values: Vec<Value>,
    pub requires: Vec<(Condition, Vec<&'static str>)>,
    pub conflicts: Vec<(Condition, Vec<&'static str>)>,
}

impl OptionSpec {
    /// A mandatory option of the given kinds
    pub fn required(name: &'static str, kinds: &[ValueKind]) -> Self {
        Self {
            name,
            optional: false,
            deprecated: None,
            expected_kinds: kinds.to_vec(),
            expected_values: Vec::new(),
            requires: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn optional(name: &'static str, kinds: &[ValueKind]) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kinds)
        }
    }

    /// An option that must no longer appear; `comment` tells what replaces it
    pub fn deprecated(name: &'static str, comment: &'static str) -> Self {
        Self {
            deprecated: Some(comment),
            ..Self::optional(name, &[])
        }
    }

    pub fn values(mut self, values: &[&str]) -> Self {
        self.expected_values = values.iter().map(|v| Value::from(*v)).collect();
        self
    }

    pub fn requires(mut self, when: Condition, names: &[&'static str]) -> Self {
        self.requires.push((when, names.to_vec()));
        self
    }

    pub fn conflicts(mut self, when: Condition, names: &[&'static str]) -> Self {
        self.conflicts.push((when, names.to_vec()));
        self
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Check `conf` against `specs`, returning every violation found
pub fn validate_options(conf: &ComposeConf, specs: &[OptionSpec]) -> Vec<String> {
    let mut errors = Vec::new();
    for spec in specs {
        let name = spec.name;

        if let Some(comment) = spec.deprecated {
            if conf.contains(name) {
                errors.push(format!("Deprecated config option: {}; {}", name, comment));
            }
            continue;
        }

        let Some(value) = conf.get(name) else {
            if !spec.optional {
                errors.push(format!("Config option not set: {}", name));
            }
            continue;
        };

        if !spec.expected_kinds.is_empty()
            && !spec.expected_kinds.iter().any(|kind| kind.matches(value))
        {
            let expected: Vec<String> = spec.expected_kinds.iter().map(|k| k.to_string()).collect();
            errors.push(format!(
                "Config option '{}' has invalid type: {}. Expected: {}.",
                name,
                ValueKind::of(value),
                expected.join(", ")
            ));
            continue;
        }

        if !spec.expected_values.is_empty() && !spec.expected_values.contains(value) {
            let expected: Vec<String> = spec.expected_values.iter().map(display_value).collect();
            errors.push(format!(
                "Config option '{}' has invalid value: {}. Expected: {}.",
                name,
                display_value(value),
                expected.join(", ")
            ));
            continue;
        }

        for (when, required) in &spec.requires {
            if when(value) {
                for req in required {
                    if !conf.contains(req) {
                        errors.push(format!(
                            "Config option {}={} requires {} which is not set",
                            name,
                            display_value(value),
                            req
                        ));
                    }
                }
            }
        }

        for (when, conflicting) in &spec.conflicts {
            if when(value) {
                for other in conflicting {
                    if conf.contains(other) {
                        errors.push(format!(
                            "Config option {}={} conflicts with option {}",
                            name,
                            display_value(value),
                            other
                        ));
                    }
                }
            }
        }
    }
    errors
}

/// External programs a full compose may invoke, with the package providing each
pub const TOOLS: &[(&str, &str)] = &[
    ("isomd5sum", "implantisomd5"),
    ("isomd5sum", "checkisomd5"),
    ("jigdo", "jigdo-lite"),
    ("genisoimage", "genisoimage"),
    ("syslinux", "isohybrid"),
    ("createrepo", "createrepo"),
    ("createrepo", "mergerepo"),
    ("createrepo", "modifyrepo"),
    ("yum-utils", "repoclosure"),
    ("git", "git"),
    ("cvs", "cvs"),
    ("koji", "koji"),
    ("pungi", "pungi-gather"),
    ("rpm", "rpm2cpio"),
    ("cpio", "cpio"),
];

/// Report every tool missing from PATH as "(program, package)"
pub fn missing_tools() -> Vec<(&'static str, &'static str)> {
    TOOLS
        .iter()
        .filter(|(_, program)| which::which(program).is_err())
        .map(|(package, program)| (*program, *package))
        .collect()
}
