//! Raw SQL Helpers
//!
//! Parameter handling for raw statements:
//!
//! - [`append_parameter_markers`] appends `@name` markers (with `OUTPUT` for
//!   output parameters) to a statement, so that a bare procedure name becomes a
//!   full call.
//! - [`rewrite_named_placeholders`] turns `@name` markers into PostgreSQL's
//!   positional `$n` placeholders.
//!
//! Both are pure functions over text.

use crate::error::ContextError;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_query::Value;

static PARAMETER_NAME: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"));

/// Direction of a named parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
}

impl ParameterDirection {
    /// Whether the parameter is marked `OUTPUT` in the statement text
    pub fn is_output(self) -> bool {
        matches!(self, ParameterDirection::Output | ParameterDirection::InputOutput)
    }
}

/// A named statement parameter
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    name: String,
    value: Value,
    direction: ParameterDirection,
}

impl SqlParameter {
    /// Input parameter `name` bound to `value`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when `name` is not a plain identifier.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Result<Self, ContextError> {
        Self::with_direction(name, value, ParameterDirection::Input)
    }

    /// Output parameter; `placeholder` is bound as its initial value and fixes its type
    ///
    /// # Errors
    ///
    /// See [`SqlParameter::new`].
    pub fn output(name: impl Into<String>, placeholder: impl Into<Value>) -> Result<Self, ContextError> {
        Self::with_direction(name, placeholder, ParameterDirection::Output)
    }

    /// # Errors
    ///
    /// See [`SqlParameter::new`].
    pub fn input_output(name: impl Into<String>, value: impl Into<Value>) -> Result<Self, ContextError> {
        Self::with_direction(name, value, ParameterDirection::InputOutput)
    }

    /// # Errors
    ///
    /// See [`SqlParameter::new`].
    pub fn with_direction(
        name: impl Into<String>,
        value: impl Into<Value>,
        direction: ParameterDirection,
    ) -> Result<Self, ContextError> {
        let name = name.into();
        let name = name.strip_prefix('@').map(str::to_string).unwrap_or(name);
        let pattern = PARAMETER_NAME
            .as_ref()
            .map_err(|e| ContextError::InvalidArgument(format!("invalid parameter name pattern: {e}")))?;
        if !pattern.is_match(&name) {
            return Err(ContextError::InvalidArgument(format!(
                "parameter name '{name}' must start with a letter or underscore and contain only letters, digits and underscores"
            )));
        }
        Ok(Self {
            name,
            value: value.into(),
            direction,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }
}

/// One argument of a raw statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    /// Named parameter; contributes a marker and a bound value
    Parameter(SqlParameter),
    /// Positional value; bound only, referenced from the text as `$n`
    Value(Value),
}

impl SqlArg {
    pub fn value(value: impl Into<Value>) -> Self {
        SqlArg::Value(value.into())
    }

    pub fn bound(&self) -> &Value {
        match self {
            SqlArg::Parameter(p) => p.value(),
            SqlArg::Value(v) => v,
        }
    }

    pub fn parameter(&self) -> Option<&SqlParameter> {
        match self {
            SqlArg::Parameter(p) => Some(p),
            SqlArg::Value(_) => None,
        }
    }
}

impl From<SqlParameter> for SqlArg {
    fn from(p: SqlParameter) -> Self {
        SqlArg::Parameter(p)
    }
}

impl From<Value> for SqlArg {
    fn from(v: Value) -> Self {
        SqlArg::Value(v)
    }
}

/// Append one marker per named parameter to `sql`
///
/// Markers are `@name`, or `@name OUTPUT` for output and input-output
/// parameters, joined by `", "` and separated from the text by a single space.
/// Positional values add nothing. Without named parameters the text is returned
/// unchanged.
pub fn append_parameter_markers(sql: &str, args: &[SqlArg]) -> String {
    let markers: Vec<String> = args
        .iter()
        .filter_map(SqlArg::parameter)
        .map(|p| {
            if p.direction().is_output() {
                format!("@{} OUTPUT", p.name())
            } else {
                format!("@{}", p.name())
            }
        })
        .collect();

    if markers.is_empty() {
        return sql.to_string();
    }
    format!("{sql} {}", markers.join(", "))
}

/// Values to bind, in argument order
pub fn bound_values(args: &[SqlArg]) -> Vec<Value> {
    args.iter().map(|a| a.bound().clone()).collect()
}

/// Name of each bound value, `None` for positional ones
pub fn parameter_names(args: &[SqlArg]) -> Vec<Option<&str>> {
    args.iter().map(|a| a.parameter().map(SqlParameter::name)).collect()
}

/// Replace `@name` markers with `$n`, n being the 1-based position of the named
/// value among `names`
///
/// The `OUTPUT` keyword following a marker is dropped. Quoted text, `--` and
/// `/* */` comments and dollar-quoted bodies (`$$...$$`, `$tag$...$tag$`) are
/// copied untouched, as are `@@` and `@` not followed by an identifier
/// (PostgreSQL operators). Names match case-insensitively.
///
/// # Errors
///
/// Returns `ContextError::InvalidArgument` when a marker names no bound parameter.
pub fn rewrite_named_placeholders(sql: &str, names: &[Option<&str>]) -> Result<String, ContextError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        let skipped = match c {
            '\'' | '"' => Some(closing_quote(&chars, i + 1, c)),
            '-' if next == Some('-') => Some(line_end(&chars, i + 2)),
            '/' if next == Some('*') => Some(block_comment_end(&chars, i + 2)),
            '$' => dollar_tag(&chars, i).map(|tag| dollar_quote_end(&chars, i + tag.len(), &tag)),
            _ => None,
        };
        if let Some(end) = skipped {
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        match c {
            '@' if next == Some('@') => {
                out.push_str("@@");
                i += 2;
            }
            '@' if next.is_some_and(|n| n.is_ascii_alphabetic() || n == '_') => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let position = names
                    .iter()
                    .position(|n| n.is_some_and(|n| n.eq_ignore_ascii_case(&name)))
                    .ok_or_else(|| {
                        ContextError::InvalidArgument(format!(
                            "statement references @{name} but no parameter with that name was supplied"
                        ))
                    })?;
                out.push_str(&format!("${}", position + 1));
                i = skip_output_keyword(&chars, end);
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Index past the quote closing a literal opened just before `from`
///
/// A doubled quote is an escaped one. Unterminated text runs to the end.
fn closing_quote(chars: &[char], from: usize, quote: char) -> usize {
    let mut j = from;
    while j < chars.len() {
        if chars[j] == quote {
            if chars.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

/// Index past the newline ending a `--` comment
fn line_end(chars: &[char], from: usize) -> usize {
    chars[from..]
        .iter()
        .position(|c| *c == '\n')
        .map_or(chars.len(), |p| from + p + 1)
}

/// Index past the `*/` closing a block comment; block comments nest
fn block_comment_end(chars: &[char], from: usize) -> usize {
    let mut depth = 1usize;
    let mut j = from;
    while j < chars.len() {
        match (chars[j], chars.get(j + 1)) {
            ('/', Some('*')) => {
                depth += 1;
                j += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                j += 2;
                if depth == 0 {
                    return j;
                }
            }
            _ => j += 1,
        }
    }
    chars.len()
}

/// Opening dollar-quote delimiter at `at` (`$$` or `$tag$`)
///
/// `$1` style placeholders and `$` inside identifiers are not delimiters.
fn dollar_tag(chars: &[char], at: usize) -> Option<Vec<char>> {
    if at > 0 && (is_ident_char(chars[at - 1]) || chars[at - 1] == '$') {
        return None;
    }
    let mut j = at + 1;
    if chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    while j < chars.len() && is_ident_char(chars[j]) {
        j += 1;
    }
    (chars.get(j) == Some(&'$')).then(|| chars[at..=j].to_vec())
}

/// Index past the delimiter closing a dollar-quoted body opened before `from`
fn dollar_quote_end(chars: &[char], from: usize, tag: &[char]) -> usize {
    chars[from..]
        .windows(tag.len())
        .position(|w| w == tag)
        .map_or(chars.len(), |p| from + p + tag.len())
}

/// Index just past a trailing ` OUTPUT` keyword at `from`, or `from` if absent
fn skip_output_keyword(chars: &[char], from: usize) -> usize {
    let mut j = from;
    while j < chars.len() && chars[j].is_whitespace() {
        j += 1;
    }
    if j == from {
        return from;
    }
    const KEYWORD: &str = "OUTPUT";
    let end = j + KEYWORD.len();
    if end > chars.len() {
        return from;
    }
    let word: String = chars[j..end].iter().collect();
    let at_boundary = chars
        .get(end)
        .map_or(true, |c| !(c.is_ascii_alphanumeric() || *c == '_'));
    if word.eq_ignore_ascii_case(KEYWORD) && at_boundary {
        end
    } else {
        from
    }
}
