//! Regex literal analysis
//!
//! Splits a (Java-flavoured) regular expression into parts and derives the
//! literal anchored at its start and at its end. Those literals decide
//! whether a pattern can be served by a forward-index range (leading
//! literal), a reverse-index range (trailing literal) or neither.
//!
//! A literal only counts if it must occur: characters made optional by a
//! following `?`, `*` or `{0,..}` are dropped, alternation discards what was
//! collected at that nesting level, and non-capturing groups, boundaries and
//! `\Q..\E` markers are ignored.

use thiserror::Error;

/// Escaped characters that denote a regex construct rather than a literal
const ESCAPED_REGEX_CHARS: &str = "0123456789xutnrfaecdDsSwWpPbBAGzZQE";

/// Escaped boundary constructs, which match no characters
const BOUNDARY_ESCAPES: &str = "bBAGzZ";

/// Flags allowed in an inline `(?x)` flag group
const FLAG_CHARS: &str = "idmsux";

/// Pattern could not be analyzed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid regular expression at column {column}: {message}")]
pub struct RegexParseError {
    pub message: String,
    pub column: usize,
}

impl RegexParseError {
    fn new(message: impl Into<String>, column: usize) -> Self {
        Self {
            message: message.into(),
            column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKind {
    Literal,
    EscapedLiteral,
    Regex,
    Quantifier,
    Ignorable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Part {
    text: String,
    kind: PartKind,
    non_capturing: bool,
}

impl Part {
    fn is_literal(&self) -> bool {
        matches!(self.kind, PartKind::Literal | PartKind::EscapedLiteral)
    }

    /// The characters this part matches when it is a literal
    fn literal_text(&self) -> &str {
        match self.kind {
            PartKind::EscapedLiteral => &self.text[1..],
            _ => &self.text,
        }
    }

    /// `?`, `*`, `{0}` and `{0,..}` allow zero occurrences
    fn is_optional_quantifier(&self) -> bool {
        self.kind == PartKind::Quantifier
            && (self.text == "?"
                || self.text == "*"
                || self.text == "{0}"
                || self.text.starts_with("{0,"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Group,
    NonCapturingGroup,
    Bracket,
}

/// Leading/trailing literal analysis of one pattern
#[derive(Debug, Clone)]
pub struct RegexAnalyzer {
    pattern: String,
    parts: Vec<Part>,
    leading_literal: Option<String>,
    trailing_literal: Option<String>,
    has_wildcard: bool,
}

impl RegexAnalyzer {
    /// Parses and analyzes `pattern`
    pub fn new(pattern: &str) -> Result<Self, RegexParseError> {
        let parts = tokenize(pattern)?;
        let mut analyzer = Self {
            pattern: pattern.to_string(),
            parts,
            leading_literal: None,
            trailing_literal: None,
            has_wildcard: false,
        };
        analyzer.compute_leading_literal();
        analyzer.compute_trailing_literal();
        Ok(analyzer)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn leading_literal(&self) -> Option<&str> {
        self.leading_literal.as_deref()
    }

    pub fn trailing_literal(&self) -> Option<&str> {
        self.trailing_literal.as_deref()
    }

    pub fn has_leading_literal(&self) -> bool {
        self.leading_literal.is_some()
    }

    pub fn has_trailing_literal(&self) -> bool {
        self.trailing_literal.is_some()
    }

    /// Whether any regex construct appears outside ignorable parts
    pub fn has_wildcard(&self) -> bool {
        self.has_wildcard
    }

    /// Neither end is anchored by a literal
    pub fn is_ngram(&self) -> bool {
        self.leading_literal.is_none() && self.trailing_literal.is_none()
    }

    fn optional_at(&self, idx: usize) -> bool {
        self.parts
            .get(idx)
            .map(Part::is_optional_quantifier)
            .unwrap_or(false)
    }

    /// Part `idx` must occur at least once (no optional quantifier follows)
    fn at_least_once(&self, idx: usize) -> bool {
        !self.optional_at(idx + 1)
    }

    fn compute_leading_literal(&mut self) {
        let mut outer: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut appending = true;
        let mut has_wildcard = false;

        for (i, part) in self.parts.iter().enumerate() {
            if !appending && outer.is_empty() {
                break;
            }
            if part.non_capturing || part.kind == PartKind::Ignorable {
                continue;
            }

            if part.is_literal() {
                if appending && self.at_least_once(i) {
                    current.push_str(part.literal_text());
                }
            } else if part.text == "(" {
                outer.push(std::mem::take(&mut current));
            } else if part.text == ")" {
                let inner = std::mem::take(&mut current);
                current = outer.pop().unwrap_or_default();
                if self.at_least_once(i) {
                    current.push_str(&inner);
                }
            } else {
                if part.text == "|" {
                    current.clear();
                }
                appending = false;
                has_wildcard = true;
            }
        }

        self.has_wildcard = has_wildcard;
        self.leading_literal = (!current.is_empty()).then_some(current);
    }

    fn compute_trailing_literal(&mut self) {
        // (builder, at_least_once) of enclosing groups
        let mut outer: Vec<(String, bool)> = Vec::new();
        let mut current = String::new();
        let mut at_least_once = true;
        let mut appending = true;
        let mut quantifier_found = false;

        for i in (0..self.parts.len()).rev() {
            let part = &self.parts[i];
            if !appending && outer.is_empty() {
                break;
            }
            if part.non_capturing || part.kind == PartKind::Ignorable {
                continue;
            }

            if part.kind == PartKind::Quantifier {
                if part.is_optional_quantifier() {
                    appending = false;
                }
                quantifier_found = true;
                continue;
            }

            if part.is_literal() {
                if appending {
                    current.insert_str(0, part.literal_text());
                    if quantifier_found && outer.is_empty() {
                        appending = false;
                    }
                }
            } else if part.text == ")" {
                outer.push((std::mem::take(&mut current), at_least_once));
                at_least_once = self.at_least_once(i);
            } else if part.text == "(" {
                let inner = std::mem::take(&mut current);
                let (enclosing, enclosing_at_least_once) = outer.pop().unwrap_or_default();
                current = enclosing;
                if at_least_once {
                    current.insert_str(0, &inner);
                }
                at_least_once = enclosing_at_least_once;
                if quantifier_found {
                    appending = false;
                }
            } else {
                if part.text == "|" {
                    current.clear();
                }
                appending = false;
            }
        }

        self.trailing_literal = (!current.is_empty()).then_some(current);
    }
}

fn tokenize(pattern: &str) -> Result<Vec<Part>, RegexParseError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut parts: Vec<Part> = Vec::new();
    let mut open: Vec<Open> = Vec::new();
    let mut non_capturing = 0usize;
    let mut brackets = 0usize;
    let mut quoted = false;
    let mut i = 0;

    let push = |parts: &mut Vec<Part>, text: String, kind: PartKind, nc: usize| {
        parts.push(Part {
            text,
            kind,
            non_capturing: nc > 0,
        });
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if quoted {
            if c == '\\' && next == Some('E') {
                quoted = false;
                push(&mut parts, "\\E".into(), PartKind::Ignorable, non_capturing);
                i += 2;
            } else {
                let kind = if brackets > 0 {
                    PartKind::Regex
                } else {
                    PartKind::Literal
                };
                push(&mut parts, c.to_string(), kind, non_capturing);
                i += 1;
            }
            continue;
        }

        match c {
            '\\' => {
                let (text, kind, width) = escape(&chars, i, brackets > 0)?;
                if text == "\\Q" {
                    quoted = true;
                }
                push(&mut parts, text, kind, non_capturing);
                i += width;
            }
            '[' => {
                brackets += 1;
                open.push(Open::Bracket);
                if next == Some('^') {
                    push(&mut parts, "[^".into(), PartKind::Regex, non_capturing);
                    i += 2;
                } else {
                    push(&mut parts, "[".into(), PartKind::Regex, non_capturing);
                    i += 1;
                }
            }
            ']' if brackets > 0 => {
                push(&mut parts, "]".into(), PartKind::Regex, non_capturing);
                if open.pop() != Some(Open::Bracket) {
                    return Err(RegexParseError::new("unexpected closing square bracket", i));
                }
                brackets -= 1;
                i += 1;
            }
            _ if brackets > 0 => {
                // everything inside a character class is a class member
                push(&mut parts, c.to_string(), PartKind::Regex, non_capturing);
                i += 1;
            }
            '(' if next == Some('?') => {
                let rest: String = chars[i..].iter().collect();
                if let Some(len) = flag_group_len(&rest) {
                    push(&mut parts, rest[..len].to_string(), PartKind::Regex, non_capturing + 1);
                    i += len;
                } else if let Some(len) = non_capturing_open_len(&rest) {
                    non_capturing += 1;
                    open.push(Open::NonCapturingGroup);
                    push(&mut parts, rest[..len].to_string(), PartKind::Regex, non_capturing);
                    i += len;
                } else {
                    return Err(RegexParseError::new(
                        format!("unknown non-capturing group construct: {}", rest),
                        i,
                    ));
                }
            }
            '(' => {
                open.push(Open::Group);
                push(&mut parts, "(".into(), PartKind::Regex, non_capturing);
                i += 1;
            }
            ')' => {
                push(&mut parts, ")".into(), PartKind::Regex, non_capturing);
                match open.pop() {
                    Some(Open::Group) => {}
                    Some(Open::NonCapturingGroup) => non_capturing -= 1,
                    _ => return Err(RegexParseError::new("unexpected closing paren", i)),
                }
                i += 1;
            }
            '{' => {
                let len = curly_quantifier_len(&chars[i..])
                    .ok_or_else(|| RegexParseError::new("expected {n}, {n,} or {n,m}", i))?;
                let text: String = chars[i..i + len].iter().collect();
                push(&mut parts, text, PartKind::Quantifier, non_capturing);
                i += len;
            }
            '}' => return Err(RegexParseError::new("unexpected closing curly bracket", i)),
            '*' | '+' | '?' => {
                push(&mut parts, c.to_string(), PartKind::Quantifier, non_capturing);
                i += 1;
            }
            '^' | '$' => {
                push(&mut parts, c.to_string(), PartKind::Ignorable, non_capturing);
                i += 1;
            }
            '.' | '|' => {
                push(&mut parts, c.to_string(), PartKind::Regex, non_capturing);
                i += 1;
            }
            _ => {
                push(&mut parts, c.to_string(), PartKind::Literal, non_capturing);
                i += 1;
            }
        }
    }

    if !open.is_empty() {
        return Err(RegexParseError::new(
            "missing closing paren or bracket",
            chars.len(),
        ));
    }
    if quoted {
        return Err(RegexParseError::new(
            "missing closing quoted section (\\E)",
            chars.len(),
        ));
    }

    Ok(parts)
}

/// Parses the escape sequence starting at `chars[start]` (a backslash).
/// Returns the part text, its kind and the number of chars consumed.
fn escape(
    chars: &[char],
    start: usize,
    in_brackets: bool,
) -> Result<(String, PartKind, usize), RegexParseError> {
    let escaped = *chars
        .get(start + 1)
        .ok_or_else(|| RegexParseError::new("trailing backslash", start))?;
    let rest = &chars[start + 1..];
    let collect = |width: usize| -> String { chars[start..start + width].iter().collect() };

    let width = match escaped {
        'p' | 'P' => {
            if rest.get(1) == Some(&'{') {
                let close = rest
                    .iter()
                    .position(|&ch| ch == '}')
                    .ok_or_else(|| RegexParseError::new("\\p{... without closing }", start))?;
                close + 2
            } else if rest.len() >= 2 {
                3
            } else {
                return Err(RegexParseError::new("\\p without a class name", start));
            }
        }
        'c' => {
            if rest.len() < 2 {
                return Err(RegexParseError::new("\\cX without the X character", start));
            }
            3
        }
        '0' => {
            // up to three octal digits, value <= 0o377
            let mut digits = 0;
            while digits < 3 {
                let candidate: String = rest[1..(1 + digits + 1).min(rest.len())].iter().collect();
                match u32::from_str_radix(&candidate, 8) {
                    Ok(value) if value <= 255 && candidate.len() == digits + 1 => digits += 1,
                    _ => break,
                }
            }
            digits + 2
        }
        'x' if rest.get(1) == Some(&'{') => {
            let close = rest
                .iter()
                .position(|&ch| ch == '}')
                .ok_or_else(|| RegexParseError::new("\\x{... without closing }", start))?;
            let hex: String = rest[2..close].iter().collect();
            if hex.is_empty() || u32::from_str_radix(&hex, 16).is_err() {
                return Err(RegexParseError::new("\\x{h..h} with invalid hex digits", start));
            }
            close + 2
        }
        'x' => {
            let hex: String = rest.iter().skip(1).take(2).collect();
            if hex.len() < 2 || u32::from_str_radix(&hex, 16).is_err() {
                return Err(RegexParseError::new("\\xhh without the hh characters", start));
            }
            4
        }
        'u' => {
            let hex: String = rest.iter().skip(1).take(4).collect();
            if hex.len() < 4 || u32::from_str_radix(&hex, 16).is_err() {
                return Err(RegexParseError::new("\\uhhhh without the hhhh characters", start));
            }
            6
        }
        _ => 2,
    };

    let text = collect(width);
    let kind = if ESCAPED_REGEX_CHARS.contains(escaped) {
        if escaped == 'Q' || escaped == 'E' || BOUNDARY_ESCAPES.contains(escaped) {
            PartKind::Ignorable
        } else {
            PartKind::Regex
        }
    } else if in_brackets {
        PartKind::Regex
    } else {
        PartKind::EscapedLiteral
    };

    Ok((text, kind, width))
}

/// Length of an inline flag group like `(?i)` or `(?-i)`
fn flag_group_len(rest: &str) -> Option<usize> {
    let bytes: Vec<char> = rest.chars().take(5).collect();
    match bytes.as_slice() {
        ['(', '?', '-', f, ')', ..] if FLAG_CHARS.contains(*f) => Some(5),
        ['(', '?', f, ')', ..] if FLAG_CHARS.contains(*f) => Some(4),
        _ => None,
    }
}

/// Length of a non-capturing group opener: `(?:`, `(?=`, `(?!`, `(?>`,
/// `(?<=`, `(?<!`, or a scoped flag group like `(?i:`
fn non_capturing_open_len(rest: &str) -> Option<usize> {
    let head: Vec<char> = rest.chars().take(4).collect();
    match head.as_slice() {
        ['(', '?', '<', '=' | '!', ..] => Some(4),
        ['(', '?', ':' | '=' | '!' | '>', ..] => Some(3),
        ['(', '?', f, ':', ..] if FLAG_CHARS.contains(*f) => Some(4),
        _ => None,
    }
}

/// Length of `{n}`, `{n,}` or `{n,m}` at the start of `chars`
fn curly_quantifier_len(chars: &[char]) -> Option<usize> {
    let close = chars.iter().position(|&c| c == '}')?;
    let body: String = chars[1..close].iter().collect();
    let (min, max) = match body.split_once(',') {
        Some((min, max)) => (min, Some(max)),
        None => (body.as_str(), None),
    };
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if min.is_empty() || !digits(min) || !max.map(digits).unwrap_or(true) {
        return None;
    }
    Some(close + 1)
}
