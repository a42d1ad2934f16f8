//! Format-spec mini-language for f-string fields and `str.format`.
//!
//! Supports `[[fill]align][sign][#][0][width][,|_][.precision][type]` with the
//! `s d n x X o b f F e E g G %` presentation types.

use crate::budget::Budget;
use crate::value::format_float;
use crate::{ExecutorError, Value};

#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid(spec: &str) -> ExecutorError {
    ExecutorError::value_error(format!("Invalid format specifier '{spec}'"))
}

impl FormatSpec {
    fn parse(spec: &str) -> Result<Self, ExecutorError> {
        let chars: Vec<char> = spec.chars().collect();
        let mut i = 0;
        let mut parsed = Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        };
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().is_some_and(|c| is_align(*c)) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
            parsed.sign = c;
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            if parsed.align.is_none() {
                parsed.fill = '0';
                parsed.align = Some('=');
            }
            i += 1;
        }
        let (width, next) = read_number(&chars, i, spec)?;
        parsed.width = width.unwrap_or(0);
        i = next;
        if let Some(&c @ (',' | '_')) = chars.get(i) {
            parsed.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            let (precision, next) = read_number(&chars, i + 1, spec)?;
            parsed.precision = Some(precision.ok_or_else(|| invalid(spec))?);
            i = next;
        }
        if let Some(&c) = chars.get(i) {
            parsed.kind = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return Err(invalid(spec));
        }
        Ok(parsed)
    }
}

fn read_number(chars: &[char], start: usize, spec: &str) -> Result<(Option<usize>, usize), ExecutorError> {
    let mut end = start;
    while chars.get(end).is_some_and(char::is_ascii_digit) {
        end += 1;
    }
    if end == start {
        return Ok((None, start));
    }
    let digits: String = chars[start..end].iter().collect();
    let n = digits
        .parse()
        .map_err(|_| ExecutorError::value_error(format!("Too many decimal digits in format string '{spec}'")))?;
    Ok((Some(n), end))
}

/// Render `value` according to a format spec. Width and numeric precision
/// must fit in the remaining allocation budget before anything is rendered;
/// the caller charges the returned text.
///
/// # Errors
/// `ValueError` for malformed specs or presentation types the value does not
/// support, `TypeError` for a non-empty spec on a non-formattable value, and
/// an allocation limit error for widths or precisions past the ceiling.
pub(crate) fn format_value(value: &Value, spec: &str, budget: &Budget) -> Result<String, ExecutorError> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    let parsed = FormatSpec::parse(spec)?;
    let precision = match value {
        Value::Str(_) => 0,
        _ => parsed.precision.unwrap_or(0),
    };
    budget.ensure_room(parsed.width.saturating_add(precision))?;
    let unknown = |kind: char| {
        ExecutorError::value_error(format!(
            "Unknown format code '{kind}' for object of type '{}'",
            value.type_name()
        ))
    };
    match value {
        Value::Str(s) => {
            if let Some(kind) = parsed.kind.filter(|k| *k != 's') {
                return Err(unknown(kind));
            }
            let body: String = match parsed.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            };
            Ok(pad(&parsed, "", &body, '<'))
        }
        Value::Int(_) | Value::Bool(_) => {
            let n = value.as_int().unwrap_or(0);
            match parsed.kind {
                None | Some('d' | 'n') => {
                    let digits = group(&n.unsigned_abs().to_string(), parsed.grouping);
                    Ok(pad(&parsed, sign_of(n < 0, parsed.sign), &digits, '>'))
                }
                Some(kind @ ('x' | 'X' | 'o' | 'b')) => {
                    let magnitude = n.unsigned_abs();
                    let (digits, prefix) = match kind {
                        'x' => (format!("{magnitude:x}"), "0x"),
                        'X' => (format!("{magnitude:X}"), "0X"),
                        'o' => (format!("{magnitude:o}"), "0o"),
                        _ => (format!("{magnitude:b}"), "0b"),
                    };
                    let mut lead = sign_of(n < 0, parsed.sign).to_owned();
                    if parsed.alternate {
                        lead.push_str(prefix);
                    }
                    Ok(pad(&parsed, &lead, &digits, '>'))
                }
                Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => {
                    format_number(value.as_f64().unwrap_or(0.0), &parsed)
                }
                Some(kind) => Err(unknown(kind)),
            }
        }
        Value::Float(x) => match parsed.kind {
            None | Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%' | 'n') => format_number(*x, &parsed),
            Some(kind) => Err(unknown(kind)),
        },
        Value::None if parsed.kind.is_none() => Ok(pad(&parsed, "", "None", '<')),
        other => Err(ExecutorError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn format_number(x: f64, spec: &FormatSpec) -> Result<String, ExecutorError> {
    let negative = x.is_sign_negative() && !x.is_nan();
    let magnitude = x.abs();
    let upper = spec.kind.is_some_and(|k| k.is_ascii_uppercase());
    let body = if magnitude.is_nan() || magnitude.is_infinite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let mut text = text.to_owned();
        if spec.kind == Some('%') {
            text.push('%');
        }
        text
    } else {
        match spec.kind {
            Some('f' | 'F') => group_float(&format!("{:.*}", spec.precision.unwrap_or(6), magnitude), spec.grouping),
            Some('e' | 'E') => exponent_form(magnitude, spec.precision.unwrap_or(6)),
            Some('g' | 'G' | 'n') => general_form(magnitude, spec.precision.unwrap_or(6), spec.alternate),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            _ => match spec.precision {
                Some(p) => general_form(magnitude, p, spec.alternate),
                None => group_float(&format_float(magnitude), spec.grouping),
            },
        }
    };
    let body = if upper { body.to_uppercase() } else { body };
    Ok(pad(spec, sign_of(negative, spec.sign), &body, '>'))
}

/// `1.234560e+03` style.
fn exponent_form(x: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, x);
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((&raw, "0"));
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// The `g` presentation: fixed or exponent form by magnitude, trailing zeros
/// removed unless `alternate`.
fn general_form(x: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    if x == 0.0 {
        return if alternate {
            format!("{:.*}", precision - 1, 0.0)
        } else {
            "0".to_owned()
        };
    }
    let probe = format!("{:.*e}", precision - 1, x);
    let exponent: i64 = probe
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let limit = i64::try_from(precision).unwrap_or(i64::MAX);
    let text = if (-4..limit).contains(&exponent) {
        let decimals = usize::try_from(limit - 1 - exponent).unwrap_or(0);
        format!("{:.*}", decimals, x)
    } else {
        exponent_form(x, precision - 1)
    };
    if alternate {
        return text;
    }
    match text.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{exp}", trim_zeros(mantissa)),
        None => trim_zeros(&text).to_owned(),
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn sign_of(negative: bool, sign: char) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

fn group(digits: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return digits.to_owned();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

fn group_float(text: &str, separator: Option<char>) -> String {
    match text.split_once('.') {
        Some((whole, fraction)) => format!("{}.{fraction}", group(whole, separator)),
        None => group(text, separator),
    }
}

fn pad(spec: &FormatSpec, sign: &str, body: &str, default_align: char) -> String {
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{body}");
    }
    let fill = |n: usize| spec.fill.to_string().repeat(n);
    let gap = spec.width - len;
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{sign}{body}{}", fill(gap)),
        '^' => format!("{}{sign}{body}{}", fill(gap / 2), fill(gap - gap / 2)),
        '=' => format!("{sign}{}{body}", fill(gap)),
        _ => format!("{}{sign}{body}", fill(gap)),
    }
}

/// `template.format(*positional, **keywords)`. Each rendered field is
/// charged to `budget` as it is appended.
///
/// # Errors
/// `ValueError` for unbalanced braces or unsupported field syntax,
/// `IndexError`/`KeyError` for missing arguments, and an allocation limit
/// error when the fields outgrow the budget.
pub(crate) fn format_string(
    template: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
    budget: &mut Budget,
) -> Result<String, ExecutorError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = Some(0usize);
    let mut manual = false;
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
            '}' => {
                return Err(ExecutorError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => {
                            return Err(ExecutorError::value_error(
                                "nested replacement fields are not supported",
                            ))
                        }
                        Some(c) => field.push(c),
                        None => {
                            return Err(ExecutorError::value_error(
                                "Single '{' encountered in format string",
                            ))
                        }
                    }
                }
                let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conversion)) => (name, Some(conversion)),
                    None => (head, None),
                };
                if name.contains(['.', '[']) {
                    return Err(ExecutorError::value_error(
                        "attribute and index lookups are not supported in format fields",
                    ));
                }
                let value = if name.is_empty() {
                    if manual {
                        return Err(ExecutorError::value_error(
                            "cannot switch from manual field specification to automatic field numbering",
                        ));
                    }
                    let index = auto_index.unwrap_or(0);
                    auto_index = Some(index + 1);
                    positional.get(index).ok_or_else(|| {
                        ExecutorError::Index(format!("Replacement index {index} out of range for positional args tuple"))
                    })?
                } else if let Ok(index) = name.parse::<usize>() {
                    if auto_index.is_some_and(|n| n > 0) {
                        return Err(ExecutorError::value_error(
                            "cannot switch from automatic field numbering to manual field specification",
                        ));
                    }
                    manual = true;
                    positional.get(index).ok_or_else(|| {
                        ExecutorError::Index(format!("Replacement index {index} out of range for positional args tuple"))
                    })?
                } else {
                    keywords
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| ExecutorError::Key(format!("'{name}'")))?
                };
                let converted;
                let value = match conversion {
                    None | Some("s") => value,
                    Some("r") => {
                        converted = Value::str(value.repr());
                        &converted
                    }
                    Some(other) => {
                        return Err(ExecutorError::value_error(format!(
                            "Unknown conversion specifier {other}"
                        )))
                    }
                };
                let piece = format_value(value, spec, budget)?;
                budget.charge(piece.len())?;
                out.push_str(&piece);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}
