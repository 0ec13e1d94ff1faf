use std::fmt;

use super::proto::{
    selector_message::Kind, AndSelector, ExistsSelector, LabelSelector, NotSelector, OrSelector,
    SelectorMessage,
};

/// Upstream routing expression understood by the gateway.
///
/// The transport attaches it to every request unmodified and never
/// evaluates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    /// Upstream label `name` has one of `values`.
    Label { name: String, values: Vec<String> },
    /// Upstream has label `name`, whatever its value.
    Exists(String),
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Not(Box<Selector>),
}

impl Selector {
    pub fn label(name: impl Into<String>, value: impl Into<String>) -> Self {
        Selector::Label {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    pub fn label_any<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector::Label {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(name: impl Into<String>) -> Self {
        Selector::Exists(name.into())
    }

    pub fn and(self, other: Selector) -> Self {
        match self {
            Selector::And(mut all) => {
                all.push(other);
                Selector::And(all)
            }
            first => Selector::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Selector) -> Self {
        match self {
            Selector::Or(mut any) => {
                any.push(other);
                Selector::Or(any)
            }
            first => Selector::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Selector::Not(Box::new(self))
    }

    pub(super) fn to_message(&self) -> SelectorMessage {
        let kind = match self {
            Selector::Label { name, values } => Kind::Label(LabelSelector {
                name: name.clone(),
                values: values.clone(),
            }),
            Selector::Exists(name) => Kind::Exists(ExistsSelector { name: name.clone() }),
            Selector::And(all) => Kind::And(AndSelector {
                selectors: all.iter().map(Selector::to_message).collect(),
            }),
            Selector::Or(any) => Kind::Or(OrSelector {
                selectors: any.iter().map(Selector::to_message).collect(),
            }),
            Selector::Not(inner) => Kind::Not(NotSelector {
                selector: Some(Box::new(inner.to_message())),
            }),
        };
        SelectorMessage { kind: Some(kind) }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Selector], op: &str) -> fmt::Result {
            f.write_str("(")?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{part}")?;
            }
            f.write_str(")")
        }

        match self {
            Selector::Label { name, values } => write!(f, "{name} in [{}]", values.join(", ")),
            Selector::Exists(name) => write!(f, "exists({name})"),
            Selector::And(all) => join(f, all, "and"),
            Selector::Or(any) => join(f, any, "or"),
            Selector::Not(inner) => write!(f, "not {inner}"),
        }
    }
}
