//! RFC 6570 URI templates: parsing, expansion and reverse matching against concrete URIs.
//!
//! Matching is the inverse of expansion and is used to resolve `resources/read` requests
//! against registered resource templates. Each template compiles to an anchored regex once,
//! at parse time, so matching stays linear in the URI length. Captured values are
//! percent-decoded.

use crate::error::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Characters left as-is by simple expansion.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Characters left as-is by `+` and `#` expansion.
const UNRESERVED_AND_RESERVED: &AsciiSet = &UNRESERVED
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Simple,
    Reserved,
    Fragment,
    Label,
    Path,
    PathParam,
    Query,
    QueryContinuation,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Reserved),
            '#' => Some(Operator::Fragment),
            '.' => Some(Operator::Label),
            '/' => Some(Operator::Path),
            ';' => Some(Operator::PathParam),
            '?' => Some(Operator::Query),
            '&' => Some(Operator::QueryContinuation),
            _ => None,
        }
    }

    fn prefix(self) -> Option<char> {
        match self {
            Operator::Simple | Operator::Reserved => None,
            Operator::Fragment => Some('#'),
            Operator::Label => Some('.'),
            Operator::Path => Some('/'),
            Operator::PathParam => Some(';'),
            Operator::Query => Some('?'),
            Operator::QueryContinuation => Some('&'),
        }
    }

    fn separator(self) -> char {
        match self {
            Operator::Simple | Operator::Reserved | Operator::Fragment => ',',
            Operator::Label => '.',
            Operator::Path => '/',
            Operator::PathParam => ';',
            Operator::Query | Operator::QueryContinuation => '&',
        }
    }

    /// Characters that cannot appear inside one variable's value.
    fn value_excludes(self, vars: &[VarSpec]) -> String {
        let multi = vars.len() > 1;
        let mut excluded = String::from(match self {
            Operator::Simple => "/?#&",
            Operator::Reserved => "?#",
            Operator::Fragment => "",
            Operator::Label => "/?#",
            Operator::Path if !multi && vars.iter().any(|v| v.explode) => "?#",
            Operator::Path => "/?#",
            Operator::PathParam => ";/?#",
            Operator::Query | Operator::QueryContinuation => "&#",
        });
        if multi && !self.named() && !excluded.contains(self.separator()) {
            excluded.push(self.separator());
        }
        excluded
    }

    fn named(self) -> bool {
        matches!(
            self,
            Operator::PathParam | Operator::Query | Operator::QueryContinuation
        )
    }

    fn allows_reserved(self) -> bool {
        matches!(self, Operator::Reserved | Operator::Fragment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VarSpec {
    name: String,
    explode: bool,
    prefix: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Expression {
        operator: Operator,
        vars: Vec<VarSpec>,
    },
}

/// What one capture group of the compiled matcher binds.
#[derive(Debug, Clone)]
enum Capture {
    /// A single variable's value.
    Value(VarSpec),
    /// The `name=value` list of a `;`, `?` or `&` expression.
    Named { separator: char, vars: Vec<VarSpec> },
}

/// A parsed URI template such as `file:///{path}` or `weather://{city}/forecast{?days}`.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    source: String,
    parts: Vec<Part>,
    matcher: Regex,
    captures: Vec<Capture>,
}

impl PartialEq for UriTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for UriTemplate {}

impl UriTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(Error::InvalidTemplate(format!(
                                    "nested '{{' in {}",
                                    source
                                )))
                            }
                            _ => body.push(c),
                        }
                    }
                    if !closed {
                        return Err(Error::InvalidTemplate(format!(
                            "unclosed expression in {}",
                            source
                        )));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(parse_expression(&body, source)?);
                }
                '}' => {
                    return Err(Error::InvalidTemplate(format!(
                        "unmatched '}}' in {}",
                        source
                    )))
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        let (matcher, captures) = compile(&parts, source)?;
        Ok(Self {
            source: source.to_string(),
            parts,
            matcher,
            captures,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Variable names in template order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().flat_map(|part| match part {
            Part::Literal(_) => [].iter(),
            Part::Expression { vars, .. } => vars.iter(),
        })
        .map(|var| var.name.as_str())
    }

    /// Substitutes `values` into the template. Missing variables expand to nothing.
    pub fn expand(&self, values: &HashMap<String, String>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(lit) => out.push_str(lit),
                Part::Expression { operator, vars } => {
                    let defined: Vec<(&VarSpec, &String)> = vars
                        .iter()
                        .filter_map(|var| values.get(&var.name).map(|value| (var, value)))
                        .collect();
                    if defined.is_empty() {
                        continue;
                    }
                    if let Some(prefix) = operator.prefix() {
                        out.push(prefix);
                    }
                    for (i, (var, value)) in defined.into_iter().enumerate() {
                        if i > 0 {
                            out.push(operator.separator());
                        }
                        let value: String = match var.prefix {
                            Some(n) => value.chars().take(n).collect(),
                            None => value.clone(),
                        };
                        if operator.named() {
                            out.push_str(&var.name);
                            if value.is_empty() && *operator == Operator::PathParam {
                                continue;
                            }
                            out.push('=');
                        }
                        out.push_str(&encode(&value, operator.allows_reserved()));
                    }
                }
            }
        }
        out
    }

    /// Matches a concrete URI, returning the captured variables on success.
    ///
    /// Query and path-parameter keys must be declared by the template; the first
    /// occurrence of a repeated key wins. A `:n` prefix rejects values longer than `n`.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let found = self.matcher.captures(uri)?;
        let mut values = HashMap::new();
        for (index, capture) in self.captures.iter().enumerate() {
            let Some(text) = found.name(&group_name(index)) else {
                continue;
            };
            match capture {
                Capture::Value(var) => {
                    values.insert(var.name.clone(), decode(text.as_str()));
                }
                Capture::Named { separator, vars } => {
                    for pair in text.as_str().split(*separator) {
                        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                        if vars.iter().any(|v| v.name == key) && !values.contains_key(key) {
                            values.insert(key.to_string(), decode(value));
                        }
                    }
                }
            }
        }

        let within_prefix = self
            .parts
            .iter()
            .flat_map(|part| match part {
                Part::Literal(_) => [].iter(),
                Part::Expression { vars, .. } => vars.iter(),
            })
            .all(|var| match (var.prefix, values.get(&var.name)) {
                (Some(max), Some(value)) => value.chars().count() <= max,
                _ => true,
            });
        within_prefix.then_some(values)
    }
}

impl FromStr for UriTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        UriTemplate::parse(s)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_expression(body: &str, source: &str) -> Result<Part> {
    let mut chars = body.chars();
    let operator = match body.chars().next().map(|c| (c, Operator::from_char(c))) {
        Some((_, Some(operator))) => {
            chars.next();
            operator
        }
        Some(('=' | ',' | '!' | '@' | '|', None)) => {
            return Err(Error::InvalidTemplate(format!(
                "reserved operator in {{{}}} of {}",
                body, source
            )))
        }
        _ => Operator::Simple,
    };

    let list = chars.as_str();
    if list.is_empty() {
        return Err(Error::InvalidTemplate(format!(
            "empty expression in {}",
            source
        )));
    }

    let mut vars = Vec::new();
    for spec in list.split(',') {
        let (spec, explode) = match spec.strip_suffix('*') {
            Some(stripped) => (stripped, true),
            None => (spec, false),
        };
        let (name, prefix) = match spec.split_once(':') {
            Some((name, len)) => {
                let len: usize = len
                    .parse()
                    .ok()
                    .filter(|n| (1..10_000).contains(n))
                    .ok_or_else(|| {
                        Error::InvalidTemplate(format!("bad prefix length '{}' in {}", len, source))
                    })?;
                (name, Some(len))
            }
            None => (spec, None),
        };
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '%'));
        if !valid_name {
            return Err(Error::InvalidTemplate(format!(
                "bad variable name '{}' in {}",
                name, source
            )));
        }
        vars.push(VarSpec {
            name: name.to_string(),
            explode,
            prefix,
        });
    }

    Ok(Part::Expression { operator, vars })
}

fn group_name(index: usize) -> String {
    format!("g{}", index)
}

/// Builds the anchored matcher for `parts`. Variable names may contain characters that are
/// not valid group names, so groups are numbered and mapped back through the returned list.
fn compile(parts: &[Part], source: &str) -> Result<(Regex, Vec<Capture>)> {
    let mut pattern = String::from("^");
    let mut captures = Vec::new();

    for part in parts {
        let (operator, vars) = match part {
            Part::Literal(lit) => {
                pattern.push_str(&regex::escape(lit));
                continue;
            }
            Part::Expression { operator, vars } => (*operator, vars),
        };

        let prefix = operator
            .prefix()
            .map(|c| regex::escape(&c.to_string()))
            .unwrap_or_default();
        let separator = regex::escape(&operator.separator().to_string());
        let excluded = regex::escape(&operator.value_excludes(vars));
        let value = if excluded.is_empty() {
            String::from(".")
        } else {
            format!("[^{}]", excluded)
        };

        if operator.named() {
            let keys = vars
                .iter()
                .map(|var| regex::escape(&var.name))
                .collect::<Vec<_>>()
                .join("|");
            let pair = format!("(?:{})(?:={}*)?", keys, value);
            pattern.push_str(&format!(
                "(?:{}(?P<{}>{}(?:{}{})*))?",
                prefix,
                group_name(captures.len()),
                pair,
                separator,
                pair
            ));
            captures.push(Capture::Named {
                separator: operator.separator(),
                vars: vars.clone(),
            });
            continue;
        }

        // Unprefixed expressions must produce at least one character.
        let repeat = if prefix.is_empty() { '+' } else { '*' };
        let mut body = String::new();
        for (i, var) in vars.iter().enumerate() {
            let group = format!("(?P<{}>{}{})", group_name(captures.len()), value, repeat);
            if i == 0 {
                body.push_str(&group);
            } else {
                body.push_str(&format!("(?:{}{})?", separator, group));
            }
            captures.push(Capture::Value(var.clone()));
        }
        if prefix.is_empty() {
            pattern.push_str(&body);
        } else {
            pattern.push_str(&format!("(?:{}{})?", prefix, body));
        }
    }
    pattern.push('$');

    let matcher = Regex::new(&pattern)
        .map_err(|e| Error::InvalidTemplate(format!("{}: {}", source, e)))?;
    Ok((matcher, captures))
}

/// Percent-encodes a value. With `allow_reserved`, reserved characters and existing `%XX`
/// escapes pass through.
fn encode(value: &str, allow_reserved: bool) -> String {
    if !allow_reserved {
        return utf8_percent_encode(value, UNRESERVED).to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(i) = rest.find('%') {
        out.extend(utf8_percent_encode(&rest[..i], UNRESERVED_AND_RESERVED));
        let tail = rest[i..].as_bytes();
        if tail.len() >= 3 && tail[1].is_ascii_hexdigit() && tail[2].is_ascii_hexdigit() {
            out.push_str(&rest[i..i + 3]);
            rest = &rest[i + 3..];
        } else {
            out.push_str("%25");
            rest = &rest[i + 1..];
        }
    }
    out.extend(utf8_percent_encode(rest, UNRESERVED_AND_RESERVED));
    out
}

/// Decodes `%XX` escapes. Malformed escapes are kept as-is.
fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}
