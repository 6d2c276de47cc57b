//! Textual signature overrides.
//!
//! Grammar:
//!   [def name] ( param, ... ) [-> type] [:]
//!   param   := name ":" type ["=" literal] | "/" | "*"
//!   type    := int | float | bool | str | None | Name
//!            | Optional[type] | List[type] | Tuple[type, ...] | Union[type, ...]
//!            | type "|" type
//!   literal := integer | float | True | False | None | 'str' | "str"
//!            | [literal, ...] | (literal, ...) | Enum.Member
//!
//! Parameters before `/` are positional-only, parameters after `*` are
//! keyword-only. Names that are not builtins are resolved through the
//! registry; unknown names stay symbolic and fail later at handle lookup.

use fiatlight_api_core::json;
use fiatlight_api_core::{FiatError, FiatResult, TypeDesc, Value};
use serde_json::{Number, Value as JsonValue};
use std::fmt;

use crate::function::{ParamDesc, ParamKind};
use crate::registry::Registry;

#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub name: Option<String>,
    pub params: Vec<ParamDesc>,
    pub return_type: TypeDesc,
}

/// Parse `text`, mapping failures to `CompileFailure`.
pub fn parse_signature(text: &str, registry: &Registry) -> FiatResult<Signature> {
    Signature::parse(text, registry)
        .map_err(|reason| FiatError::CompileFailure(format!("cannot parse signature `{text}`: {reason}")))
}

impl Signature {
    pub fn parse(text: &str, registry: &Registry) -> Result<Self, String> {
        let text = text.trim();
        let text = text.strip_suffix(':').unwrap_or(text).trim_end();
        let text = text.strip_prefix("def ").unwrap_or(text).trim_start();
        let open = text.find('(').ok_or("missing `(`")?;
        let name = text[..open].trim();
        let name = (!name.is_empty()).then(|| name.to_string());
        if let Some(n) = &name {
            if !is_identifier(n) {
                return Err(format!("invalid function name `{n}`"));
            }
        }
        let close = matching_close(text, open).ok_or("unbalanced parentheses")?;
        let params = parse_params(&text[open + 1..close], registry)?;

        let rest = text[close + 1..].trim();
        let return_type = if rest.is_empty() {
            TypeDesc::Unit
        } else {
            let ret = rest
                .strip_prefix("->")
                .ok_or_else(|| format!("unexpected `{rest}` after the parameters"))?;
            parse_type(ret, registry)?
        };
        Ok(Signature {
            name,
            params,
            return_type,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            f.write_str(name)?;
        }
        let mut parts = Vec::with_capacity(self.params.len() + 2);
        let mut kind = ParamKind::PositionalOnly;
        for p in &self.params {
            if kind == ParamKind::PositionalOnly && p.kind != ParamKind::PositionalOnly && !parts.is_empty() {
                parts.push("/".to_string());
            }
            if p.kind == ParamKind::KeywordOnly && kind != ParamKind::KeywordOnly {
                parts.push("*".to_string());
            }
            kind = p.kind;
            let mut part = format!("{}: {}", p.name, p.ty);
            if let Some(default) = &p.default {
                part.push_str(&format!(" = {}", format_literal(default)));
            }
            parts.push(part);
        }
        if kind == ParamKind::PositionalOnly && !parts.is_empty() {
            parts.push("/".to_string());
        }
        write!(f, "({}) -> {}", parts.join(", "), self.return_type)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Index of the bracket closing the one at `open`.
fn matching_close(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    for (idx, c) in s.char_indices().skip_while(|(i, _)| *i < open) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split at `sep` outside brackets and quotes.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth -= 1,
            (None, c) if c == sep && depth == 0 => {
                parts.push(&s[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_params(s: &str, registry: &Registry) -> Result<Vec<ParamDesc>, String> {
    let mut params: Vec<ParamDesc> = Vec::new();
    let mut keyword_only = false;
    let mut seen_slash = false;
    for raw in split_top_level(s, ',') {
        let raw = raw.trim();
        match raw {
            "" => continue,
            "/" => {
                if seen_slash || keyword_only {
                    return Err("misplaced `/`".into());
                }
                seen_slash = true;
                for p in params.iter_mut() {
                    p.kind = ParamKind::PositionalOnly;
                }
                continue;
            }
            "*" => {
                if keyword_only {
                    return Err("duplicate `*`".into());
                }
                keyword_only = true;
                continue;
            }
            _ => {}
        }

        let (decl, default) = match split_top_level(raw, '=').as_slice() {
            [decl] => (*decl, None),
            [decl, default] => (*decl, Some(default.trim())),
            _ => return Err(format!("cannot read parameter `{raw}`")),
        };
        let (name, ty) = decl
            .split_once(':')
            .ok_or_else(|| format!("parameter `{}` has no type annotation", decl.trim()))?;
        let name = name.trim();
        if !is_identifier(name) {
            return Err(format!("invalid parameter name `{name}`"));
        }
        if params.iter().any(|p| p.name == name) {
            return Err(format!("duplicate parameter `{name}`"));
        }
        let ty = parse_type(ty, registry)?;
        let mut param = ParamDesc::new(name, ty);
        if keyword_only {
            param.kind = ParamKind::KeywordOnly;
        }
        if let Some(text) = default {
            let raw = parse_literal(text)?;
            let value = literal_value(&param.ty, raw)
                .map_err(|e| format!("default of `{name}`: {e}"))?;
            param.default = Some(value);
        }
        params.push(param);
    }
    Ok(params)
}

fn parse_type(s: &str, registry: &Registry) -> Result<TypeDesc, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty type".into());
    }
    let alternatives = split_top_level(s, '|');
    if alternatives.len() > 1 {
        let types = alternatives
            .into_iter()
            .map(|a| parse_type(a, registry))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(union_of(types));
    }

    if let Some(open) = s.find('[') {
        let head = s[..open].trim();
        let close = matching_close(s, open).ok_or_else(|| format!("unbalanced `[` in `{s}`"))?;
        if close != s.len() - 1 {
            return Err(format!("unexpected text after `]` in `{s}`"));
        }
        let args = split_top_level(&s[open + 1..close], ',')
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| parse_type(a, registry))
            .collect::<Result<Vec<_>, _>>()?;
        return match (head, args.as_slice()) {
            ("Optional", [inner]) => Ok(TypeDesc::optional(inner.clone())),
            ("List" | "list" | "Sequence", [item]) => Ok(TypeDesc::list(item.clone())),
            ("Tuple" | "tuple", items) if !items.is_empty() => Ok(TypeDesc::Tuple(items.to_vec())),
            ("Union", items) if items.len() >= 2 => Ok(union_of(items.to_vec())),
            _ => Err(format!("unsupported generic type `{s}`")),
        };
    }

    Ok(match s {
        "int" => TypeDesc::Int,
        "float" => TypeDesc::Float,
        "bool" => TypeDesc::Bool,
        "str" => TypeDesc::Str,
        "None" => TypeDesc::Unit,
        name if is_identifier(name) || name.split('.').all(is_identifier) => registry
            .type_by_name(name)
            .unwrap_or_else(|| TypeDesc::named(name)),
        other => return Err(format!("cannot read type `{other}`")),
    })
}

/// `A | None` is `Optional[A]`; other unions are tagged by type name.
fn union_of(types: Vec<TypeDesc>) -> TypeDesc {
    let has_none = types.iter().any(|t| *t == TypeDesc::Unit);
    let rest: Vec<TypeDesc> = types.into_iter().filter(|t| *t != TypeDesc::Unit).collect();
    let inner = match rest.len() {
        0 => return TypeDesc::Unit,
        1 => rest.into_iter().next().unwrap_or(TypeDesc::Unit),
        _ => TypeDesc::Union(rest.into_iter().map(|t| (t.type_name(), t)).collect()),
    };
    if has_none {
        TypeDesc::optional(inner)
    } else {
        inner
    }
}

/// Literal as plain JSON; `Enum.Member` becomes the member name.
fn parse_literal(s: &str) -> Result<JsonValue, String> {
    let s = s.trim();
    match s {
        "" => return Err("empty default".into()),
        "True" => return Ok(JsonValue::Bool(true)),
        "False" => return Ok(JsonValue::Bool(false)),
        "None" => return Ok(JsonValue::Null),
        _ => {}
    }
    let first = s.chars().next().unwrap_or_default();
    if (first == '\'' || first == '"') && s.len() >= 2 && s.ends_with(first) {
        return Ok(JsonValue::String(s[1..s.len() - 1].to_string()));
    }
    if (first == '[' && s.ends_with(']')) || (first == '(' && s.ends_with(')')) {
        let items = split_top_level(&s[1..s.len() - 1], ',')
            .into_iter()
            .filter(|item| !item.trim().is_empty())
            .map(parse_literal)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(JsonValue::Array(items));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Ok(JsonValue::from(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| format!("`{s}` is not a finite number"));
    }
    match s.rsplit_once('.') {
        Some((class, member)) if is_identifier(class) && is_identifier(member) => {
            Ok(JsonValue::String(member.to_string()))
        }
        _ => Err(format!("unsupported default `{s}`")),
    }
}

fn literal_value(ty: &TypeDesc, raw: JsonValue) -> Result<Value, String> {
    if raw.is_null() && !ty.can_be_none() {
        return Err(format!("None is not a valid {ty}"));
    }
    if raw.is_null() && matches!(ty.resolve_alias(), TypeDesc::Unit) {
        return Ok(Value::none());
    }
    json::value_from_plain_json(ty, &raw).map_err(|e| e.to_string())
}

fn format_literal(value: &Value) -> String {
    match value {
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        Value::Str(s) => format!("{s:?}"),
        Value::Float(v) if v.fract() == 0.0 => format!("{v:.1}"),
        Value::Float(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Optional(None) => "None".into(),
        Value::Optional(Some(v)) => format_literal(v),
        Value::Enum { class, member } => format!("{class}.{member}"),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(format_literal).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Tuple(items) => {
            let parts: Vec<String> = items.iter().map(format_literal).collect();
            format!("({})", parts.join(", "))
        }
        other => crate::handle::describe_value(other),
    }
}
