// Condition model and the prefix mini-language rewriting pass
//
// Scripts and built-ins describe filters as flat objects. String values
// may carry one of five typed prefixes (`not~`, `lt~`, `le~`, `gt~`,
// `ge~`) that turn the entry into a range or negation predicate against
// the named field. Everything else is a plain equality predicate. The
// translation to a concrete backend filter happens in exactly one place:
// this module.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Right-hand operand of a range predicate. `Now` resolves to the clock
/// passed in at query execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Now,
    Time(DateTime<Utc>),
    Int(i64),
}

impl Operand {
    /// Parse the suffix of a range prefix, in order: the literal `now`,
    /// an RFC 3339 timestamp, a decimal integer. `None` when nothing
    /// matches.
    fn parse(suffix: &str) -> Option<Self> {
        if suffix == "now" {
            return Some(Operand::Now);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(suffix) {
            return Some(Operand::Time(ts.with_timezone(&Utc)));
        }
        if let Ok(n) = suffix.parse::<i64>() {
            return Some(Operand::Int(n));
        }
        None
    }

    fn resolve(&self, now: DateTime<Utc>) -> ResolvedOperand {
        match self {
            Operand::Now => ResolvedOperand::Time(now),
            Operand::Time(ts) => ResolvedOperand::Time(*ts),
            Operand::Int(n) => ResolvedOperand::Int(*n),
        }
    }
}

enum ResolvedOperand {
    Time(DateTime<Utc>),
    Int(i64),
}

/// A single-field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Ne(String),
    Lt(Operand),
    Le(Operand),
    Gt(Operand),
    Ge(Operand),
}

/// A conjunction of per-field predicates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    fields: Vec<(String, Predicate)>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.fields.push((field.into(), predicate));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[(String, Predicate)] {
        &self.fields
    }

    /// Build a condition from a flat object, applying the prefix
    /// rewriting pass to every string value. Non-object values produce
    /// an empty condition (match everything), mirroring an absent
    /// filter.
    pub fn from_object(object: &Value) -> Self {
        let mut condition = Condition::new();
        let Some(map) = object.as_object() else {
            return condition;
        };
        for (field, value) in map {
            condition.fields.push((field.clone(), enrich(value)));
        }
        condition
    }

    /// Translate into a MongoDB filter document. `now` substitutes for
    /// the `now` token in range operands.
    pub fn to_bson(&self, now: DateTime<Utc>) -> bson::Document {
        let mut filter = bson::Document::new();
        for (field, predicate) in &self.fields {
            let entry = match predicate {
                Predicate::Eq(value) => {
                    bson::to_bson(value).unwrap_or(bson::Bson::Null)
                }
                Predicate::Ne(value) => {
                    bson::bson!({ "$ne": value.clone() })
                }
                Predicate::Lt(op) => bson::bson!({ "$lt": operand_to_bson(op, now) }),
                Predicate::Le(op) => bson::bson!({ "$lte": operand_to_bson(op, now) }),
                Predicate::Gt(op) => bson::bson!({ "$gt": operand_to_bson(op, now) }),
                Predicate::Ge(op) => bson::bson!({ "$gte": operand_to_bson(op, now) }),
            };
            filter.insert(field.clone(), entry);
        }
        filter
    }

    /// Evaluate against a JSON document. Used by the in-memory catalog;
    /// semantics match the MongoDB translation.
    pub fn matches(&self, doc: &Value, now: DateTime<Utc>) -> bool {
        self.fields.iter().all(|(field, predicate)| {
            let actual = doc.get(field);
            match predicate {
                Predicate::Eq(expected) => actual == Some(expected),
                Predicate::Ne(expected) => {
                    actual != Some(&Value::String(expected.clone()))
                }
                Predicate::Lt(op) => compare(actual, op, now).is_some_and(|o| o.is_lt()),
                Predicate::Le(op) => compare(actual, op, now).is_some_and(|o| o.is_le()),
                Predicate::Gt(op) => compare(actual, op, now).is_some_and(|o| o.is_gt()),
                Predicate::Ge(op) => compare(actual, op, now).is_some_and(|o| o.is_ge()),
            }
        })
    }
}

fn operand_to_bson(operand: &Operand, now: DateTime<Utc>) -> bson::Bson {
    match operand.resolve(now) {
        ResolvedOperand::Time(ts) => bson::Bson::DateTime(bson::DateTime::from_chrono(ts)),
        ResolvedOperand::Int(n) => bson::Bson::Int64(n),
    }
}

/// Order a document value against a resolved operand. Time operands
/// accept RFC 3339 strings or numeric epoch seconds; integer operands
/// accept numbers. Anything else is unordered and never matches.
fn compare(actual: Option<&Value>, operand: &Operand, now: DateTime<Utc>) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    match operand.resolve(now) {
        ResolvedOperand::Time(expected) => {
            let actual = match actual {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|ts| ts.with_timezone(&Utc))?,
                Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single()?,
                _ => return None,
            };
            Some(actual.cmp(&expected))
        }
        ResolvedOperand::Int(expected) => {
            let actual = actual.as_i64()?;
            Some(actual.cmp(&expected))
        }
    }
}

/// Rewrite a single condition value. Strings are inspected for the five
/// typed prefixes; a range prefix whose suffix fails all operand parses
/// leaves the original string as a plain equality predicate.
fn enrich(value: &Value) -> Predicate {
    let Value::String(s) = value else {
        return Predicate::Eq(value.clone());
    };

    if let Some(suffix) = s.strip_prefix("not~") {
        return Predicate::Ne(suffix.to_string());
    }

    for (prefix, build) in [
        ("lt~", Predicate::Lt as fn(Operand) -> Predicate),
        ("le~", Predicate::Le as fn(Operand) -> Predicate),
        ("gt~", Predicate::Gt as fn(Operand) -> Predicate),
        ("ge~", Predicate::Ge as fn(Operand) -> Predicate),
    ] {
        if let Some(suffix) = s.strip_prefix(prefix) {
            return match Operand::parse(suffix) {
                Some(operand) => build(operand),
                None => Predicate::Eq(value.clone()),
            };
        }
    }

    Predicate::Eq(value.clone())
}

/// Render a timestamp the way conditions expect document fields to be
/// stored in JSON form.
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
