// Caps string parsing
//
// Turns the serialized form of `gst::Caps` (as produced by `caps.to_string()`)
// into flat rows, one per concrete configuration. Multi-valued fields
// (`{a, b}` lists) are expanded into one row per alternative.

use std::cmp::Ordering;

use gstreamer as gst;

use super::{compare_fractions, CapsError, Result};

/// Options controlling how strictly malformed input is treated.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Fail on fields that don't match `key=(type)value`.
    /// When false, such fields are logged and skipped.
    pub strict: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict: cfg!(debug_assertions),
        }
    }
}

/// A translated field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Fraction(gst::Fraction),
    Int(i64),
    Str(String),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_fraction(&self) -> Option<gst::Fraction> {
        match self {
            FieldValue::Fraction(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Field value before multi-value expansion
#[derive(Debug, Clone, PartialEq)]
enum RawValue {
    Single(FieldValue),
    List(Vec<FieldValue>),
    /// `[min, max]` or `[min, max, step]`; never resolved to a concrete value
    Range,
}

#[derive(Debug)]
struct RawStructure {
    media_type: String,
    fields: Vec<(String, RawValue)>,
}

/// One concrete configuration: a media type plus single-valued fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CapsRow {
    pub media_type: String,
    pub fields: Vec<(String, FieldValue)>,
    /// Fields present in the structure whose value could not be resolved
    pub unresolved: Vec<String>,
}

impl CapsRow {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_int)
    }

    pub fn fraction(&self, key: &str) -> Option<gst::Fraction> {
        self.get(key).and_then(FieldValue::as_fraction)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }

    pub fn is_unresolved(&self, key: &str) -> bool {
        self.unresolved.iter().any(|k| k == key)
    }
}

/// Parse a caps string with default options.
pub fn parse_caps(caps: &str) -> Result<Vec<CapsRow>> {
    parse_caps_with(caps, ParseOptions::default())
}

/// Parse a caps string into expanded rows, sorted by (framerate, width, height).
pub fn parse_caps_with(caps: &str, options: ParseOptions) -> Result<Vec<CapsRow>> {
    let mut rows = Vec::new();

    for structure in split_top_level(caps, ';') {
        let structure = structure.trim();
        if structure.is_empty() {
            continue;
        }
        let raw = parse_structure(structure, options)?;
        rows.extend(expand(raw));
    }

    rows.sort_by(|a, b| {
        compare_optional_fractions(a.fraction("framerate"), b.fraction("framerate"))
            .then_with(|| a.int("width").cmp(&b.int("width")))
            .then_with(|| a.int("height").cmp(&b.int("height")))
    });
    Ok(rows)
}

fn compare_optional_fractions(a: Option<gst::Fraction>, b: Option<gst::Fraction>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_fractions(a, b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

fn parse_structure(structure: &str, options: ParseOptions) -> Result<RawStructure> {
    let mut parts = split_top_level(structure, ',').into_iter();
    let media_type = parts.next().unwrap_or_default().trim().to_string();

    let mut fields = Vec::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match parse_field(part)? {
            Some(field) => fields.push(field),
            None if options.strict => {
                return Err(CapsError::MalformedField {
                    structure: media_type,
                    field: part.to_string(),
                });
            }
            None => {
                log::warn!("Skipping malformed caps field in {}: {}", media_type, part);
            }
        }
    }

    Ok(RawStructure { media_type, fields })
}

/// Parse one `key=(type)value` field.
///
/// Returns `Ok(None)` when the text doesn't follow the field grammar; type
/// translation failures are errors.
fn parse_field(part: &str) -> Result<Option<(String, RawValue)>> {
    let Some((key, rest)) = part.split_once('=') else {
        return Ok(None);
    };
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Ok(None);
    }

    let rest = rest.trim_start();
    let Some((dtype, value)) = split_type_tag(rest) else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let raw = if let Some(inner) = strip_delimiters(value, '{', '}') {
        let mut values = Vec::new();
        for item in split_top_level(inner, ',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            values.push(translate_item(item, dtype)?);
        }
        if values.is_empty() {
            return Ok(None);
        }
        RawValue::List(values)
    } else if let Some(inner) = strip_delimiters(value, '[', ']') {
        let bounds: Vec<&str> = split_top_level(inner, ',')
            .into_iter()
            .map(str::trim)
            .collect();
        if bounds.len() < 2 || bounds.len() > 3 {
            return Ok(None);
        }
        for bound in &bounds[..2] {
            translate_item(bound, dtype)?;
        }
        RawValue::Range
    } else {
        RawValue::Single(translate(value, dtype)?)
    };

    Ok(Some((key.to_string(), raw)))
}

/// Split `(type)value` into its parts.
fn split_type_tag(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix('(')?;
    let close = inner.find(')')?;
    let dtype = inner[..close].trim();
    if dtype.is_empty() {
        return None;
    }
    Some((dtype, &inner[close + 1..]))
}

fn strip_delimiters(value: &str, open: char, close: char) -> Option<&str> {
    value.strip_prefix(open)?.strip_suffix(close)
}

/// List items may repeat the type tag, e.g. `{ (string)I420, (string)YUY2 }`.
fn translate_item(item: &str, outer_type: &str) -> Result<FieldValue> {
    match split_type_tag(item) {
        Some((dtype, value)) => translate(value.trim(), dtype),
        None => translate(item, outer_type),
    }
}

/// Translate a raw value according to its declared type tag.
pub fn translate(value: &str, dtype: &str) -> Result<FieldValue> {
    let invalid = || CapsError::InvalidValue {
        dtype: dtype.to_string(),
        value: value.to_string(),
    };

    match dtype {
        "fraction" => {
            let (numer, denom) = match value.split_once('/') {
                Some((n, d)) => (n.trim(), d.trim()),
                None => (value.trim(), "1"),
            };
            let numer: i32 = numer.parse().map_err(|_| invalid())?;
            let denom: i32 = denom.parse().map_err(|_| invalid())?;
            // i32::MIN cannot be negated when the sign is normalized
            if denom == 0 || numer == i32::MIN || denom == i32::MIN {
                return Err(invalid());
            }
            Ok(FieldValue::Fraction(gst::Fraction::new(numer, denom)))
        }
        "int" | "uint" => value
            .trim()
            .parse::<i64>()
            .map(FieldValue::Int)
            .map_err(|_| invalid()),
        // Float-typed fields are only used for integral quantities here
        "float" | "double" => value
            .trim()
            .parse::<f64>()
            .map(|v| FieldValue::Int(v as i64))
            .map_err(|_| invalid()),
        "string" => {
            let trimmed = value.trim();
            let unquoted = trimmed
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(trimmed);
            Ok(FieldValue::Str(unquoted.trim().to_string()))
        }
        other => Err(CapsError::TypeTranslation(other.to_string())),
    }
}

/// Expand every multi-valued field into one row per alternative.
fn expand(structure: RawStructure) -> Vec<CapsRow> {
    let mut rows = vec![CapsRow {
        media_type: structure.media_type,
        fields: Vec::new(),
        unresolved: Vec::new(),
    }];

    for (key, raw) in structure.fields {
        match raw {
            RawValue::Single(value) => {
                for row in &mut rows {
                    row.fields.push((key.clone(), value.clone()));
                }
            }
            RawValue::List(values) => {
                let key = &key;
                let values = &values;
                rows = rows
                    .into_iter()
                    .flat_map(|row| {
                        values.iter().map(move |value| {
                            let mut row = row.clone();
                            row.fields.push((key.clone(), value.clone()));
                            row
                        })
                    })
                    .collect();
            }
            RawValue::Range => {
                for row in &mut rows {
                    row.unresolved.push(key.clone());
                }
            }
        }
    }

    rows
}

/// Split on `sep` outside of brackets, parentheses and quotes.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '{' | '[' | '(' | '<' if !in_quotes => depth += 1,
            '}' | ']' | ')' | '>' if !in_quotes => depth -= 1,
            c if c == sep && depth <= 0 && !in_quotes => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
