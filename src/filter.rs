//! LDAP-style filter expressions evaluated against event properties.
//!
//! ```text
//! filter     := "(" filtercomp ")"
//! filtercomp := "&" filter+ | "|" filter+ | "!" filter | item
//! item       := attr ( "=" | "~=" | ">=" | "<=" ) value
//! ```
//!
//! `(attr=*)` tests presence, `(attr=ab*cd)` is a substring match.
//! `\(`, `\)`, `\*` and `\\` escape special characters inside values.

use crate::event::Properties;
use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// At least one sub-filter must match.
    Or(Vec<Filter>),
    /// The sub-filter must not match.
    Not(Box<Filter>),
    /// The attribute must be present.
    Present(String),
    /// `attr=value`
    Equal(String, String),
    /// `attr~=value`, case and whitespace insensitive.
    Approx(String, String),
    /// `attr>=value`
    GreaterEq(String, String),
    /// `attr<=value`
    LessEq(String, String),
    /// `attr=initial*any*...*final`
    Substring {
        /// Attribute name
        attr: String,
        /// Required prefix
        initial: Option<String>,
        /// Required inner fragments, in order
        any: Vec<String>,
        /// Required suffix
        last: Option<String>,
    },
}

impl Filter {
    /// Parses a filter expression.
    ///
    /// A bare `attr=value` without outer parentheses is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFilter`] if the expression cannot be parsed.
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid(expr, "empty filter expression"));
        }

        let wrapped;
        let source = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            &wrapped
        };

        let mut parser = Parser {
            expr,
            chars: source.chars().collect(),
            pos: 0,
        };
        let filter = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(invalid(expr, "trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Returns `true` if `properties` satisfy this filter.
    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(properties)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(properties)),
            Self::Not(filter) => !filter.matches(properties),
            Self::Present(attr) => lookup(properties, attr).is_some(),
            Self::Equal(attr, operand) => {
                test_value(lookup(properties, attr), &|v| compare(v, Op::Equal, operand))
            }
            Self::Approx(attr, operand) => {
                test_value(lookup(properties, attr), &|v| compare(v, Op::Approx, operand))
            }
            Self::GreaterEq(attr, operand) => {
                test_value(lookup(properties, attr), &|v| compare(v, Op::GreaterEq, operand))
            }
            Self::LessEq(attr, operand) => {
                test_value(lookup(properties, attr), &|v| compare(v, Op::LessEq, operand))
            }
            Self::Substring {
                attr,
                initial,
                any,
                last,
            } => test_value(lookup(properties, attr), &|v| match v {
                Value::String(s) => substring_match(s, initial.as_deref(), any, last.as_deref()),
                _ => false,
            }),
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Present(attr) => write!(f, "({attr}=*)"),
            Self::Equal(attr, v) => write!(f, "({attr}={})", escape(v)),
            Self::Approx(attr, v) => write!(f, "({attr}~={})", escape(v)),
            Self::GreaterEq(attr, v) => write!(f, "({attr}>={})", escape(v)),
            Self::LessEq(attr, v) => write!(f, "({attr}<={})", escape(v)),
            Self::Substring {
                attr,
                initial,
                any,
                last,
            } => {
                write!(f, "({attr}=")?;
                if let Some(initial) = initial {
                    f.write_str(&escape(initial))?;
                }
                f.write_str("*")?;
                for fragment in any {
                    write!(f, "{}*", escape(fragment))?;
                }
                if let Some(last) = last {
                    f.write_str(&escape(last))?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Op {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

struct Parser<'a> {
    expr: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        match self.peek() {
            Some(found) if found == c => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(self.error(format!(
                "expected '{c}' at offset {}, found '{found}'",
                self.pos
            ))),
            None => Err(self.error(format!("expected '{c}', found end of input"))),
        }
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        invalid(self.expr, reason)
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        self.skip_whitespace();
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                let inner = self.parse_filter()?;
                self.skip_whitespace();
                Filter::Not(Box::new(inner))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unexpected end of input")),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('(') => filters.push(self.parse_filter()?),
                _ => break,
            }
        }
        if filters.is_empty() {
            return Err(self.error("'&' and '|' need at least one operand"));
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(self.error(format!("missing attribute name at offset {start}")));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                None
            }
            Some(c @ ('<' | '>' | '~')) => {
                self.pos += 1;
                self.expect('=')?;
                Some(match c {
                    '<' => Op::LessEq,
                    '>' => Op::GreaterEq,
                    _ => Op::Approx,
                })
            }
            Some(c) => return Err(self.error(format!("unexpected '{c}' after attribute {attr:?}"))),
            None => return Err(self.error("unexpected end of input")),
        };

        let segments = self.parse_value()?;
        match op {
            Some(op) => {
                if segments.len() > 1 {
                    return Err(self.error(format!("wildcard not allowed in comparison on {attr:?}")));
                }
                let operand = segments.into_iter().next().unwrap_or_default();
                Ok(match op {
                    Op::LessEq => Filter::LessEq(attr, operand),
                    Op::GreaterEq => Filter::GreaterEq(attr, operand),
                    _ => Filter::Approx(attr, operand),
                })
            }
            None => Ok(item_from_segments(attr, segments)),
        }
    }

    /// Reads a value up to the closing paren, split on unescaped `*`.
    fn parse_value(&mut self) -> Result<Vec<String>> {
        let mut segments = vec![String::new()];
        loop {
            match self.peek() {
                Some(')') => return Ok(segments),
                Some('(') => {
                    return Err(self.error(format!("unescaped '(' in value at offset {}", self.pos)))
                }
                Some('*') => {
                    self.pos += 1;
                    segments.push(String::new());
                }
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self
                        .peek()
                        .ok_or_else(|| self.error("dangling escape at end of input"))?;
                    self.pos += 1;
                    push_char(&mut segments, escaped);
                }
                Some(c) => {
                    self.pos += 1;
                    push_char(&mut segments, c);
                }
                None => return Err(self.error("unterminated filter item")),
            }
        }
    }
}

fn push_char(segments: &mut [String], c: char) {
    if let Some(last) = segments.last_mut() {
        last.push(c);
    }
}

fn item_from_segments(attr: String, mut segments: Vec<String>) -> Filter {
    if segments.len() == 1 {
        let value = segments.pop().unwrap_or_default();
        return Filter::Equal(attr, value);
    }
    if segments.len() == 2 && segments.iter().all(String::is_empty) {
        return Filter::Present(attr);
    }

    let last = segments.pop().filter(|s| !s.is_empty());
    let mut rest = segments.into_iter();
    let initial = rest.next().filter(|s| !s.is_empty());
    let any = rest.filter(|s| !s.is_empty()).collect();
    Filter::Substring {
        attr,
        initial,
        any,
        last,
    }
}

fn invalid(expr: &str, reason: impl Into<String>) -> Error {
    Error::InvalidFilter {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Exact key first, then a case-insensitive match.
fn lookup<'a>(properties: &'a Properties, attr: &str) -> Option<&'a Value> {
    properties.get(attr).or_else(|| {
        properties
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(attr))
            .map(|(_, value)| value)
    })
}

/// Arrays match when any element matches.
fn test_value(value: Option<&Value>, predicate: &dyn Fn(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(predicate),
        Some(value) => predicate(value),
        None => false,
    }
}

fn compare(value: &Value, op: Op, operand: &str) -> bool {
    match value {
        Value::String(s) => match op {
            Op::Equal => s == operand,
            Op::Approx => normalize(s) == normalize(operand),
            Op::GreaterEq => s.as_str() >= operand,
            Op::LessEq => s.as_str() <= operand,
        },
        Value::Number(n) => {
            let operand = operand.trim();
            let ordering = match (n.as_i64(), operand.parse::<i64>()) {
                (Some(lhs), Ok(rhs)) => Some(lhs.cmp(&rhs)),
                _ => match (n.as_f64(), operand.parse::<f64>()) {
                    (Some(lhs), Ok(rhs)) => lhs.partial_cmp(&rhs),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                Op::Equal | Op::Approx => ordering.is_eq(),
                Op::GreaterEq => ordering.is_ge(),
                Op::LessEq => ordering.is_le(),
            }
        }
        Value::Bool(b) => match op {
            Op::Equal | Op::Approx => match operand.trim().to_ascii_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            },
            Op::GreaterEq | Op::LessEq => false,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial) {
            Some(remaining) => rest = remaining,
            None => return false,
        }
    }
    for fragment in any {
        match rest.find(fragment.as_str()) {
            Some(idx) => rest = &rest[idx + fragment.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Properties::new(),
        }
    }

    // ── Parsing ──────────────────────────────────────────────

    #[test]
    fn parse_equality() {
        let f = Filter::parse("(level=error)").expect("simple equality should parse");
        assert_eq!(f, Filter::Equal("level".into(), "error".into()));
    }

    #[test]
    fn parse_without_outer_parens() {
        let f = Filter::parse("  level=error ").expect("bare item should parse");
        assert_eq!(f, Filter::Equal("level".into(), "error".into()));
    }

    #[test]
    fn parse_conjunction() {
        let f = Filter::parse("(&(level=error)(source=db))").expect("conjunction should parse");
        assert_eq!(
            f,
            Filter::And(vec![
                Filter::Equal("level".into(), "error".into()),
                Filter::Equal("source".into(), "db".into()),
            ])
        );
    }

    #[test]
    fn parse_nested_with_whitespace() {
        let f = Filter::parse("( | (a=1) (! (b=2) ) )").expect("whitespace between filters is allowed");
        assert_eq!(
            f,
            Filter::Or(vec![
                Filter::Equal("a".into(), "1".into()),
                Filter::Not(Box::new(Filter::Equal("b".into(), "2".into()))),
            ])
        );
    }

    #[test]
    fn parse_presence_and_substring() {
        assert_eq!(Filter::parse("(user=*)").unwrap(), Filter::Present("user".into()));
        assert_eq!(
            Filter::parse("(path=/var/*/log*)").unwrap(),
            Filter::Substring {
                attr: "path".into(),
                initial: Some("/var/".into()),
                any: vec!["/log".into()],
                last: None,
            }
        );
    }

    #[test]
    fn parse_escapes() {
        let f = Filter::parse(r"(name=a\*b\(c\))").unwrap();
        assert_eq!(f, Filter::Equal("name".into(), "a*b(c)".into()));
        assert_eq!(f.to_string(), r"(name=a\*b\(c\))");
    }

    #[test]
    fn parse_comparisons() {
        assert_eq!(Filter::parse("(n>=5)").unwrap(), Filter::GreaterEq("n".into(), "5".into()));
        assert_eq!(Filter::parse("(n<=5)").unwrap(), Filter::LessEq("n".into(), "5".into()));
        assert_eq!(Filter::parse("(n~=Hi)").unwrap(), Filter::Approx("n".into(), "Hi".into()));
    }

    #[test]
    fn parse_rejects_malformed() {
        for expr in [
            "",
            "(",
            "(level=error",
            "(=error)",
            "(&)",
            "(level=error))",
            "(a=b(c)",
            "(a>5)",
            "(a>=1*)",
            r"(a=b\",
        ] {
            let err = Filter::parse(expr).expect_err(expr);
            assert!(err.is_configuration_fault(), "{expr}: {err}");
        }
    }

    #[test]
    fn display_round_trips() {
        let expr = "(&(level=error)(|(n>=3)(!(tag=*)))(path=a*b*c))";
        let f = Filter::parse(expr).unwrap();
        assert_eq!(f.to_string(), expr);
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    // ── Matching ─────────────────────────────────────────────

    #[test]
    fn equality_matches_strings() {
        let f = Filter::parse("(level=error)").unwrap();
        assert!(f.matches(&props(json!({"level": "error"}))));
        assert!(!f.matches(&props(json!({"level": "info"}))));
        assert!(!f.matches(&Properties::new()));
    }

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let f = Filter::parse("(LEVEL=error)").unwrap();
        assert!(f.matches(&props(json!({"level": "error"}))));
    }

    #[test]
    fn numbers_compare_numerically() {
        let p = props(json!({"n": 10, "x": 2.5}));
        assert!(Filter::parse("(n=10)").unwrap().matches(&p));
        assert!(Filter::parse("(n>=9)").unwrap().matches(&p));
        assert!(!Filter::parse("(n<=9)").unwrap().matches(&p));
        assert!(Filter::parse("(x>=2.25)").unwrap().matches(&p));
        assert!(!Filter::parse("(n=ten)").unwrap().matches(&p));
    }

    #[test]
    fn booleans_and_arrays() {
        let p = props(json!({"ok": true, "tags": ["a", "b"]}));
        assert!(Filter::parse("(ok=TRUE)").unwrap().matches(&p));
        assert!(!Filter::parse("(ok=false)").unwrap().matches(&p));
        assert!(Filter::parse("(tags=b)").unwrap().matches(&p));
        assert!(!Filter::parse("(tags=c)").unwrap().matches(&p));
    }

    #[test]
    fn approx_ignores_case_and_whitespace() {
        let f = Filter::parse("(name~=hello world)").unwrap();
        assert!(f.matches(&props(json!({"name": "Hello  World"}))));
    }

    #[test]
    fn substring_matching() {
        let f = Filter::parse("(path=/var/*/log*.txt)").unwrap();
        assert!(f.matches(&props(json!({"path": "/var/app/log-1.txt"}))));
        assert!(!f.matches(&props(json!({"path": "/var/app/out.txt"}))));
        assert!(!f.matches(&props(json!({"path": "/tmp/app/log.txt"}))));
    }

    #[test]
    fn boolean_operators() {
        let f = Filter::parse("(&(level=error)(!(source=test)))").unwrap();
        assert!(f.matches(&props(json!({"level": "error", "source": "db"}))));
        assert!(!f.matches(&props(json!({"level": "error", "source": "test"}))));

        let f = Filter::parse("(|(level=error)(level=warn))").unwrap();
        assert!(f.matches(&props(json!({"level": "warn"}))));
        assert!(!f.matches(&props(json!({"level": "info"}))));
    }

    #[test]
    fn presence_ignores_value_type() {
        let f = Filter::parse("(meta=*)").unwrap();
        assert!(f.matches(&props(json!({"meta": {"k": 1}}))));
        assert!(f.matches(&props(json!({"meta": null}))));
    }
}
