//! Evaluator for the ARM template expression subset found in resource names
//! and references: string literals, `parameters()`, `variables()`,
//! `concat()`, `format()`, `resourceId()`, `toLower()`, `toUpper()` and
//! `string()`, plus property access on results.

use serde_json::{Map, Value};
use thiserror::Error;

/// Nesting limit for parameters and variables that reference each other.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("invalid expression '{expr}': {message}")]
    Syntax { expr: String, message: String },
    #[error("unsupported function '{0}'")]
    UnsupportedFunction(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("parameter '{0}' has no defaultValue")]
    MissingDefault(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("{function}(): {message}")]
    Argument { function: String, message: String },
}

impl ExprError {
    fn argument(function: &str, message: impl Into<String>) -> Self {
        Self::Argument {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Str(String),
    Int(i64),
    Call {
        name: String,
        args: Vec<Expr>,
        props: Vec<String>,
    },
}

/// Parameters and variables of one template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateScope<'a> {
    parameters: Option<&'a Map<String, Value>>,
    variables: Option<&'a Map<String, Value>>,
}

impl<'a> TemplateScope<'a> {
    pub fn from_template(template: &'a Value) -> Self {
        Self {
            parameters: template.get("parameters").and_then(Value::as_object),
            variables: template.get("variables").and_then(Value::as_object),
        }
    }

    /// Evaluate `value` if it is an expression string; other values are
    /// returned unchanged.
    pub fn evaluate(&self, value: &Value) -> Result<Value, ExprError> {
        self.evaluate_at(value, 0)
    }

    /// Evaluate a string and render the result as text.
    pub fn evaluate_string(&self, text: &str) -> Result<String, ExprError> {
        let value = self.evaluate_at(&Value::String(text.to_string()), 0)?;
        Ok(display(&value))
    }

    fn evaluate_at(&self, value: &Value, depth: usize) -> Result<Value, ExprError> {
        let Value::String(text) = value else {
            return Ok(value.clone());
        };
        let Some(body) = expression_body(text) else {
            return Ok(Value::String(literal(text).to_string()));
        };
        if depth > MAX_DEPTH {
            return Err(ExprError::Syntax {
                expr: text.clone(),
                message: "references nest too deeply".to_string(),
            });
        }
        let expr = Parser::new(body).parse()?;
        self.eval(&expr, depth)
    }

    fn eval(&self, expr: &Expr, depth: usize) -> Result<Value, ExprError> {
        match expr {
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Int(n) => Ok(Value::from(*n)),
            Expr::Call { name, args, props } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut value = self.call(name, &args, depth)?;
                for prop in props {
                    value = value.get(prop).cloned().ok_or_else(|| {
                        ExprError::argument(name, format!("result has no property '{prop}'"))
                    })?;
                }
                Ok(value)
            }
        }
    }

    fn call(&self, name: &str, args: &[Value], depth: usize) -> Result<Value, ExprError> {
        match name.to_ascii_lowercase().as_str() {
            "parameters" => {
                let key = string_arg(name, args, 0)?;
                let param = self
                    .parameters
                    .and_then(|p| p.get(key))
                    .ok_or_else(|| ExprError::UnknownParameter(key.to_string()))?;
                let default = param
                    .get("defaultValue")
                    .ok_or_else(|| ExprError::MissingDefault(key.to_string()))?;
                self.evaluate_at(default, depth + 1)
            }
            "variables" => {
                let key = string_arg(name, args, 0)?;
                let value = self
                    .variables
                    .and_then(|v| v.get(key))
                    .ok_or_else(|| ExprError::UnknownVariable(key.to_string()))?;
                self.evaluate_at(value, depth + 1)
            }
            "concat" => {
                if !args.is_empty() && args.iter().all(Value::is_array) {
                    let items = args
                        .iter()
                        .filter_map(Value::as_array)
                        .flatten()
                        .cloned()
                        .collect();
                    Ok(Value::Array(items))
                } else {
                    Ok(Value::String(args.iter().map(display).collect()))
                }
            }
            "format" => format_string(args).map(Value::String),
            "resourceid" => resource_id(args).map(Value::String),
            "tolower" => Ok(Value::String(string_arg(name, args, 0)?.to_lowercase())),
            "toupper" => Ok(Value::String(string_arg(name, args, 0)?.to_uppercase())),
            "string" => {
                let value = args
                    .first()
                    .ok_or_else(|| ExprError::argument(name, "expects one argument"))?;
                Ok(Value::String(display(value)))
            }
            _ => Err(ExprError::UnsupportedFunction(name.to_string())),
        }
    }
}

/// Inner text of a `[...]` expression, or `None` for a literal.
fn expression_body(text: &str) -> Option<&str> {
    if text.starts_with("[[") {
        return None;
    }
    text.strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .map(str::trim)
}

/// A leading `[[` escapes a literal `[`.
fn literal(text: &str) -> &str {
    if text.starts_with("[[") {
        &text[1..]
    } else {
        text
    }
}

/// Whether `text` is an ARM expression rather than a literal.
pub fn is_expression(text: &str) -> bool {
    expression_body(text).is_some()
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_arg<'v>(function: &str, args: &'v [Value], index: usize) -> Result<&'v str, ExprError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ExprError::argument(function, format!("argument {} must be a string", index + 1)))
}

fn format_string(args: &[Value]) -> Result<String, ExprError> {
    let template = string_arg("format", args, 0)?;
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut spec = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    spec.push(c);
                }
                if !closed {
                    return Err(ExprError::argument("format", "unterminated placeholder"));
                }
                let index: usize = spec
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .parse()
                    .map_err(|_| {
                        ExprError::argument("format", format!("bad placeholder '{{{spec}}}'"))
                    })?;
                let arg = args.get(index + 1).ok_or_else(|| {
                    ExprError::argument("format", format!("placeholder {{{index}}} has no argument"))
                })?;
                out.push_str(&display(arg));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Build a resource id. Without leading subscription and resource group
/// arguments the provider-relative form `Namespace/type/name/...` is returned.
fn resource_id(args: &[Value]) -> Result<String, ExprError> {
    let strings = args
        .iter()
        .enumerate()
        .map(|(i, _)| string_arg("resourceId", args, i))
        .collect::<Result<Vec<_>, _>>()?;
    let type_index = strings
        .iter()
        .position(|s| s.contains('/'))
        .ok_or_else(|| ExprError::argument("resourceId", "missing resource type"))?;
    let (scope, rest) = strings.split_at(type_index);
    let resource_type = rest[0];
    let names = &rest[1..];
    let mut segments = resource_type.split('/');
    let namespace = segments.next().unwrap_or_default();
    let types: Vec<&str> = segments.collect();
    if types.len() != names.len() {
        return Err(ExprError::argument(
            "resourceId",
            format!(
                "'{resource_type}' expects {} name segment(s), got {}",
                types.len(),
                names.len()
            ),
        ));
    }

    let mut id = match scope {
        [] => String::new(),
        [group] => format!("/resourceGroups/{group}/providers/"),
        [subscription, group] => {
            format!("/subscriptions/{subscription}/resourceGroups/{group}/providers/")
        }
        _ => {
            return Err(ExprError::argument(
                "resourceId",
                "too many arguments before the resource type",
            ))
        }
    };
    id.push_str(namespace);
    for (ty, name) in types.iter().zip(names) {
        id.push('/');
        id.push_str(ty);
        id.push('/');
        id.push_str(name);
    }
    Ok(id)
}

/// Name segments of a resource id, e.g. `["net01", "RCG_net_01"]` for a rule
/// collection group. Plain names yield themselves.
pub fn resource_id_names(id: &str) -> Vec<&str> {
    let relative = match id.to_ascii_lowercase().rfind("/providers/") {
        Some(pos) => &id[pos + "/providers/".len()..],
        None => id.trim_start_matches('/'),
    };
    let segments: Vec<&str> = relative.split('/').collect();
    if segments.len() < 3 || !segments[0].contains('.') {
        return vec![id];
    }
    segments[1..].iter().skip(1).step_by(2).copied().collect()
}

struct Parser<'s> {
    src: &'s str,
    chars: Vec<char>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Expr, ExprError> {
        let expr = self.expr()?;
        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            expr: self.src.to_string(),
            message: format!("{} at offset {}", message.into(), self.pos),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('\'') => self.string(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.call(),
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn string(&mut self) -> Result<Expr, ExprError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('\'') => {
                    self.pos += 1;
                    if self.peek() == Some('\'') {
                        out.push('\'');
                        self.pos += 1;
                    } else {
                        return Ok(Expr::Str(out));
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn number(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map(Expr::Int)
            .map_err(|_| self.error(format!("invalid number '{text}'")))
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn call(&mut self) -> Result<Expr, ExprError> {
        let name = self.ident();
        self.skip_ws();
        if self.peek() != Some('(') {
            return Err(self.error(format!("expected '(' after '{name}'")));
        }
        self.pos += 1;

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expr()?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }

        let mut props = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('.') {
                break;
            }
            self.pos += 1;
            self.skip_ws();
            let prop = self.ident();
            if prop.is_empty() {
                return Err(self.error("expected property name"));
            }
            props.push(prop);
        }
        Ok(Expr::Call { name, args, props })
    }
}
