//! Filter operators accepted in `field__operator` keys.

use serde::Serialize;

/// Separator between a field name and its operator tag.
pub const OPERATOR_SEPARATOR: &str = "__";

/// Closed set of filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    ILike,
    /// Comma-separated list membership.
    In,
    /// Spatial containment in a GeoJSON area.
    Within,
}

/// Tag → operator dispatch table.
const DISPATCH: [(&str, Operator); 10] = [
    ("eq", Operator::Eq),
    ("ne", Operator::Ne),
    ("gt", Operator::Gt),
    ("ge", Operator::Ge),
    ("lt", Operator::Lt),
    ("le", Operator::Le),
    ("like", Operator::Like),
    ("ilike", Operator::ILike),
    ("in", Operator::In),
    ("within", Operator::Within),
];

impl Operator {
    /// Look a tag up in the dispatch table. Unknown tags are `None`.
    pub fn from_tag(tag: &str) -> Option<Operator> {
        DISPATCH
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|&(_, op)| op)
    }

    pub fn tag(&self) -> &'static str {
        DISPATCH
            .iter()
            .find(|(_, op)| op == self)
            .map(|&(name, _)| name)
            .unwrap_or("eq")
    }

    /// SQL comparison symbol for binary operators.
    pub fn sql_symbol(&self) -> Option<&'static str> {
        match self {
            Operator::Eq => Some("="),
            Operator::Ne => Some("<>"),
            Operator::Gt => Some(">"),
            Operator::Ge => Some(">="),
            Operator::Lt => Some("<"),
            Operator::Le => Some("<="),
            Operator::Like => Some("LIKE"),
            Operator::ILike => Some("ILIKE"),
            Operator::In | Operator::Within => None,
        }
    }

    /// Whether the operator needs an ordered column type.
    pub fn is_range(&self) -> bool {
        matches!(self, Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Operator::Like | Operator::ILike)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Split a parameter key into field and operator tag.
///
/// The last `__` separates the tag, so field names may themselves contain
/// double underscores.
pub fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.rsplit_once(OPERATOR_SEPARATOR) {
        Some((field, tag)) if !field.is_empty() => (field, Some(tag)),
        _ => (key, None),
    }
}
