//! Argument templates.
//!
//! A template names the fields a command accepts and how tokens bind to
//! them.  Fields are separated by whitespace or commas:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `NAME` | positional or `NAME value` / `NAME=value` |
//! | `NAME=N` | `N` is an alias for `NAME` |
//! | `/A` | required |
//! | `/K` | keyword only |
//! | `/N` | numeric (`i64`) |
//! | `/S` | switch: present or absent, keyword only |
//! | `/M` | multi-value: takes every leftover positional token |
//!
//! Argument text is split on whitespace and `=` outside double quotes.
//! Keywords match case-insensitively; a quoted token is never a keyword, so
//! `"W"` passes the literal text `W`.
//!
//! ```rust
//! use cmdscript::script::template::{ArgValue, Template};
//!
//! let t = Template::parse("TITLE/A W/N H/N MODAL/S").unwrap();
//! let args = t.bind(r#""Main window" 640 H=480 modal"#).unwrap();
//! assert_eq!(args.get("TITLE"), Some(&ArgValue::Str("Main window".into())));
//! assert_eq!(args.get("H"), Some(&ArgValue::Int(480)));
//! assert_eq!(args.get("MODAL"), Some(&ArgValue::Switch(true)));
//! ```

use std::fmt;

use crate::value::Value;

// ── Template ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub aliases: Vec<String>,
    pub required: bool,
    pub keyword: bool,
    pub numeric: bool,
    pub switch: bool,
    pub multi: bool,
}

impl Field {
    fn matches(&self, token: &str) -> bool {
        self.name.eq_ignore_ascii_case(token)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(token))
    }

    /// Filled by plain positional tokens?
    fn positional(&self) -> bool {
        !self.keyword && !self.switch
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    fields: Vec<Field>,
}

impl Template {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut fields: Vec<Field> = Vec::new();
        for item in spec
            .split(|c: char| c == ',' || c.is_ascii_whitespace())
            .filter(|s| !s.is_empty())
        {
            let mut parts = item.split('/');
            let names = parts.next().unwrap_or_default();
            let mut names = names.split('=');
            let name = names.next().unwrap_or_default();
            if name.is_empty() {
                return Err(format!("empty field name in `{item}`"));
            }
            let mut field = Field {
                name: name.to_owned(),
                aliases: names.map(str::to_owned).collect(),
                required: false,
                keyword: false,
                numeric: false,
                switch: false,
                multi: false,
            };
            for modifier in parts {
                match modifier.to_ascii_uppercase().as_str() {
                    "A" => field.required = true,
                    "K" => field.keyword = true,
                    "N" => field.numeric = true,
                    "S" => field.switch = true,
                    "M" => field.multi = true,
                    other => return Err(format!("unknown modifier `/{other}` on {name}")),
                }
            }
            if field.switch && (field.numeric || field.multi) {
                return Err(format!("switch {name} cannot also be /N or /M"));
            }
            if field.multi && fields.iter().any(|f| f.multi) {
                return Err(format!("second /M field {name}"));
            }
            if fields.iter().any(|f| f.matches(&field.name)) {
                return Err(format!("duplicate field {name}"));
            }
            fields.push(field);
        }
        Ok(Template { fields })
    }

    /// Concatenate two templates; fields of `other` follow ours.
    pub fn combine(&self, other: &Template) -> Result<Template, String> {
        let mut out = self.clone();
        for field in &other.fields {
            if out.fields.iter().any(|f| f.matches(&field.name)) {
                return Err(format!("duplicate field {}", field.name));
            }
            if field.multi && out.fields.iter().any(|f| f.multi) {
                return Err(format!("second /M field {}", field.name));
            }
            out.fields.push(field.clone());
        }
        Ok(out)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Bind argument text to the template's fields.
    pub fn bind(&self, text: &str) -> Result<Args, String> {
        self.bind_tokens(split_tokens(text)?)
    }

    pub fn bind_tokens(&self, tokens: Vec<ArgToken>) -> Result<Args, String> {
        let mut values: Vec<Option<ArgValue>> = vec![None; self.fields.len()];
        let mut loose: Vec<String> = Vec::new();
        let mut tokens = tokens.into_iter();

        // Keywords first; everything else waits for positional filling.
        while let Some(tok) = tokens.next() {
            let keyword = if tok.quoted {
                None
            } else {
                self.fields.iter().position(|f| f.matches(&tok.text))
            };
            let Some(idx) = keyword else {
                loose.push(tok.text);
                continue;
            };
            let field = &self.fields[idx];
            if field.switch {
                values[idx] = Some(ArgValue::Switch(true));
                continue;
            }
            let value = tokens
                .next()
                .map(|t| t.text)
                .ok_or_else(|| format!("keyword {} needs a value", field.name))?;
            values[idx] = Some(if field.multi {
                let mut items = match values[idx].take() {
                    Some(ArgValue::Multi(items)) => items,
                    _ => Vec::new(),
                };
                items.push(value);
                ArgValue::Multi(items)
            } else {
                convert(field, value)?
            });
        }

        let mut loose = loose.into_iter().peekable();
        for (idx, field) in self.fields.iter().enumerate() {
            if loose.peek().is_none() {
                break;
            }
            if !field.positional() || (values[idx].is_some() && !field.multi) {
                continue;
            }
            if field.multi {
                // Leave room for positional fields declared after the /M one.
                let after = self.fields[idx + 1..]
                    .iter()
                    .enumerate()
                    .filter(|(off, f)| f.positional() && values[idx + 1 + off].is_none())
                    .count();
                let mut items = match values[idx].take() {
                    Some(ArgValue::Multi(items)) => items,
                    _ => Vec::new(),
                };
                let available = loose.len().saturating_sub(after);
                items.extend(loose.by_ref().take(available));
                values[idx] = Some(ArgValue::Multi(items));
            } else if let Some(tok) = loose.next() {
                values[idx] = Some(convert(field, tok)?);
            }
        }

        if let Some(extra) = loose.next() {
            return Err(format!("too many arguments at `{extra}`"));
        }
        for (field, value) in self.fields.iter().zip(&values) {
            let missing = match value {
                None => true,
                Some(ArgValue::Multi(items)) => items.is_empty(),
                Some(_) => false,
            };
            if field.required && missing {
                return Err(format!("required argument {} missing", field.name));
            }
        }

        Ok(Args {
            names: self.fields.iter().map(|f| f.name.clone()).collect(),
            values,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&field.name)?;
            for alias in &field.aliases {
                write!(f, "={alias}")?;
            }
            for (set, m) in [
                (field.required, "/A"),
                (field.keyword, "/K"),
                (field.numeric, "/N"),
                (field.switch, "/S"),
                (field.multi, "/M"),
            ] {
                if set {
                    f.write_str(m)?;
                }
            }
        }
        Ok(())
    }
}

fn convert(field: &Field, tok: String) -> Result<ArgValue, String> {
    if field.numeric {
        tok.trim()
            .parse()
            .map(ArgValue::Int)
            .map_err(|_| format!("{}: bad number `{tok}`", field.name))
    } else if field.multi {
        Ok(ArgValue::Multi(vec![tok]))
    } else {
        Ok(ArgValue::Str(tok))
    }
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

/// One word of argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgToken {
    pub text: String,
    /// Any part of the word was inside double quotes.
    pub quoted: bool,
}

/// Split argument text on whitespace and `=`; double quotes group.
///
/// There is no escape character.  An empty quoted string is a token.
pub fn split_tokens(text: &str) -> Result<Vec<ArgToken>, String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for ch in text.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if !in_quotes && (c.is_ascii_whitespace() || c == '=') => {
                if !cur.is_empty() || quoted {
                    out.push(ArgToken {
                        text: std::mem::take(&mut cur),
                        quoted,
                    });
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quote".to_owned());
    }
    if !cur.is_empty() || quoted {
        out.push(ArgToken { text: cur, quoted });
    }
    Ok(out)
}

/// [`split_tokens`] without the quoting flags.
pub fn tokenize(text: &str) -> Result<Vec<String>, String> {
    Ok(split_tokens(text)?.into_iter().map(|t| t.text).collect())
}

// ── Bound arguments ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Switch(bool),
    Multi(Vec<String>),
}

impl ArgValue {
    /// String view; `None` for switches and multi-values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; strings are parsed.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(n) => Some(*n),
            ArgValue::Str(s) => s.trim().parse().ok(),
            ArgValue::Switch(b) => Some(*b as i64),
            ArgValue::Multi(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ArgValue::Multi(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&ArgValue> for Value {
    fn from(arg: &ArgValue) -> Self {
        match arg {
            ArgValue::Str(s) => Value::Str(s.clone()),
            ArgValue::Int(n) => Value::Int(*n),
            ArgValue::Switch(b) => Value::Int(*b as i64),
            ArgValue::Multi(items) => Value::pointer(items.clone()),
        }
    }
}

/// Result of binding: one optional value per template field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    names: Vec<String>,
    values: Vec<Option<ArgValue>>,
}

impl Args {
    /// Value bound to field `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        let idx = self.names.iter().position(|n| n.eq_ignore_ascii_case(name))?;
        self.values[idx].as_ref()
    }

    /// Value bound to the field at template position `index`.
    pub fn at(&self, index: usize) -> Option<&ArgValue> {
        self.values.get(index)?.as_ref()
    }

    /// Whether a switch field is set.
    pub fn switch(&self, name: &str) -> bool {
        matches!(self.get(name), Some(ArgValue::Switch(true)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All bound fields as `(name, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.names
            .iter()
            .zip(&self.values)
            .filter_map(|(n, v)| Some((n.as_str(), v.as_ref()?)))
    }

    /// Values in field order, for passing to a module method.  Unbound
    /// fields become empty strings so positions stay stable.
    pub fn to_values(&self) -> Vec<Value> {
        self.values
            .iter()
            .map(|v| v.as_ref().map(Value::from).unwrap_or_default())
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
