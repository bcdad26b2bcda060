//! Hierarchical service names.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{LifecycleError, LifecycleResult};

/// Immutable hierarchical service identifier.
///
/// A name is a chain of non-empty segments rooted at its first segment.
/// Names are cheap to clone (the chain is shared through `Arc`), hashed
/// structurally and totally ordered by comparing segments from the root
/// outward; a name sorts directly before its own extensions.
///
/// The canonical string form joins segments with `.` and quotes any segment
/// that contains whitespace, `.`, `"` or control characters.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::ServiceName;
///
/// let db = ServiceName::of(["app", "db"]).unwrap();
/// let pool = db.append(["pool"]).unwrap();
///
/// assert_eq!(pool.to_string(), "app.db.pool");
/// assert!(db.is_parent_of(&pool));
/// assert!(db < pool);
///
/// let quoted = ServiceName::parse(r#"app."jdbc.main""#).unwrap();
/// assert_eq!(quoted.simple_name(), "jdbc.main");
/// assert_eq!(quoted.to_string(), r#"app."jdbc.main""#);
/// ```
#[derive(Clone)]
pub struct ServiceName(Arc<NameNode>);

struct NameNode {
    parent: Option<ServiceName>,
    simple: Box<str>,
    size: usize,
    hash: u64,
}

impl ServiceName {
    /// Builds a name from its segments, root first.
    ///
    /// Fails when there are no segments or any segment is empty.
    pub fn of<I, S>(segments: I) -> LifecycleResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current: Option<ServiceName> = None;
        for segment in segments {
            current = Some(Self::child(current, segment.into())?);
        }
        current.ok_or_else(|| LifecycleError::InvalidName("a name needs at least one segment".into()))
    }

    /// Returns a new name extending this one with the given segments.
    pub fn append<I, S>(&self, segments: I) -> LifecycleResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = self.clone();
        for segment in segments {
            current = Self::child(Some(current), segment.into())?;
        }
        Ok(current)
    }

    fn child(parent: Option<ServiceName>, simple: String) -> LifecycleResult<Self> {
        if simple.is_empty() {
            return Err(LifecycleError::InvalidName("empty name segment".into()));
        }
        let mut hasher = DefaultHasher::new();
        if let Some(parent) = &parent {
            parent.0.hash.hash(&mut hasher);
        }
        simple.hash(&mut hasher);
        let size = parent.as_ref().map_or(1, |p| p.0.size + 1);
        Ok(ServiceName(Arc::new(NameNode {
            parent,
            simple: simple.into_boxed_str(),
            size,
            hash: hasher.finish(),
        })))
    }

    /// Parses a canonical name string.
    ///
    /// Segments are separated by `.`. A segment may be quoted with `"` in
    /// which case it can contain any character; inside quotes the escapes
    /// `\"`, `\\`, `\0`, `\b`, `\t`, `\n`, `\f`, `\r` and `\uXXXX` are
    /// recognized. Unquoted segments may not contain whitespace, control
    /// characters or `"`.
    pub fn parse(input: &str) -> LifecycleResult<Self> {
        let segments = parse_segments(input)?;
        Self::of(segments)
    }

    /// The last segment of this name.
    pub fn simple_name(&self) -> &str {
        &self.0.simple
    }

    /// The enclosing name, if this is not a root name.
    pub fn parent(&self) -> Option<&ServiceName> {
        self.0.parent.as_ref()
    }

    /// Number of segments.
    pub fn size(&self) -> usize {
        self.0.size
    }

    /// Segments from the root outward.
    pub fn segments(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.size());
        let mut node = Some(self);
        while let Some(n) = node {
            out.push(n.simple_name());
            node = n.parent();
        }
        out.reverse();
        out
    }

    /// True when `self` equals `other` or is one of its ancestors.
    pub fn is_parent_of(&self, other: &ServiceName) -> bool {
        if other.size() < self.size() {
            return false;
        }
        let mut candidate = other;
        for _ in 0..(other.size() - self.size()) {
            candidate = match candidate.parent() {
                Some(p) => p,
                None => return false,
            };
        }
        candidate == self
    }

    /// The nearest name that is a parent of (or equal to) both names.
    pub fn common_ancestor_of(&self, other: &ServiceName) -> Option<ServiceName> {
        let (mut a, mut b) = (self, other);
        while a.size() > b.size() {
            a = a.parent()?;
        }
        while b.size() > a.size() {
            b = b.parent()?;
        }
        loop {
            if a == b {
                return Some(a.clone());
            }
            a = a.parent()?;
            b = b.parent()?;
        }
    }

    /// Canonical string form, quoting segments where required.
    pub fn canonical_name(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        if let Some(parent) = self.parent() {
            parent.write_canonical(out);
            out.push('.');
        }
        write_segment(&self.0.simple, out);
    }

    fn ancestor_at(&self, size: usize) -> &ServiceName {
        let mut node = self;
        while node.size() > size {
            match node.parent() {
                Some(p) => node = p,
                None => break,
            }
        }
        node
    }

    // Both names must have the same size.
    fn cmp_same_size(&self, other: &ServiceName) -> Ordering {
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ordering::Equal;
        }
        let parents = match (self.parent(), other.parent()) {
            (Some(a), Some(b)) => a.cmp_same_size(b),
            _ => Ordering::Equal,
        };
        parents.then_with(|| self.0.simple.cmp(&other.0.simple))
    }
}

fn needs_quotes(segment: &str) -> bool {
    segment
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '.' || c == '"')
}

fn write_segment(segment: &str, out: &mut String) {
    if !needs_quotes(segment) {
        out.push_str(segment);
        return;
    }
    out.push('"');
    for c in segment.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\u{8}' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\u{c}' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() || (c.is_whitespace() && c != ' ') => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn invalid(input: &str, reason: &str) -> LifecycleError {
    LifecycleError::InvalidName(format!("{:?}: {}", input, reason))
}

fn parse_segments(input: &str) -> LifecycleResult<Vec<String>> {
    let mut segments = Vec::new();
    let mut chars = input.chars().peekable();
    if chars.peek().is_none() {
        return Err(invalid(input, "empty name"));
    }
    loop {
        let mut segment = String::new();
        match chars.peek() {
            Some('"') => {
                chars.next();
                loop {
                    match chars.next() {
                        None => return Err(invalid(input, "unterminated quoted segment")),
                        Some('"') => break,
                        Some('\\') => segment.push(parse_escape(input, &mut chars)?),
                        Some(c) => segment.push(c),
                    }
                }
                match chars.peek() {
                    None | Some('.') => {}
                    Some(_) => return Err(invalid(input, "unexpected character after quoted segment")),
                }
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c == '.' {
                        break;
                    }
                    if c == '"' || c.is_whitespace() || c.is_control() {
                        return Err(invalid(input, "unquoted segment contains a reserved character"));
                    }
                    segment.push(c);
                    chars.next();
                }
            }
        }
        if segment.is_empty() {
            return Err(invalid(input, "empty name segment"));
        }
        segments.push(segment);
        match chars.next() {
            None => return Ok(segments),
            Some('.') => {
                if chars.peek().is_none() {
                    return Err(invalid(input, "trailing separator"));
                }
            }
            Some(_) => return Err(invalid(input, "unexpected character")),
        }
    }
}

fn parse_escape<I>(input: &str, chars: &mut std::iter::Peekable<I>) -> LifecycleResult<char>
where
    I: Iterator<Item = char>,
{
    match chars.next() {
        Some('"') => Ok('"'),
        Some('\\') => Ok('\\'),
        Some('0') => Ok('\0'),
        Some('b') => Ok('\u{8}'),
        Some('t') => Ok('\t'),
        Some('n') => Ok('\n'),
        Some('f') => Ok('\u{c}'),
        Some('r') => Ok('\r'),
        Some('u') => {
            let high = parse_hex4(input, chars)?;
            if (0xD800..0xDC00).contains(&high) {
                // surrogate pair: a second \uXXXX must follow
                if chars.next() != Some('\\') || chars.next() != Some('u') {
                    return Err(invalid(input, "unpaired surrogate escape"));
                }
                let low = parse_hex4(input, chars)?;
                char::decode_utf16([high, low])
                    .next()
                    .and_then(Result::ok)
                    .ok_or_else(|| invalid(input, "invalid surrogate pair"))
            } else {
                char::from_u32(u32::from(high)).ok_or_else(|| invalid(input, "invalid unicode escape"))
            }
        }
        _ => Err(invalid(input, "invalid escape sequence")),
    }
}

fn parse_hex4<I>(input: &str, chars: &mut I) -> LifecycleResult<u16>
where
    I: Iterator<Item = char>,
{
    let mut value = 0u16;
    for _ in 0..4 {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| invalid(input, "invalid unicode escape"))?;
        value = (value << 4) | digit as u16;
    }
    Ok(value)
}

impl PartialEq for ServiceName {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.hash == other.0.hash
            && self.0.size == other.0.size
            && self.0.simple == other.0.simple
            && self.0.parent == other.0.parent
    }
}

impl Eq for ServiceName {}

impl Hash for ServiceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl PartialOrd for ServiceName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceName {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.size().cmp(&other.size()) {
            Ordering::Equal => self.cmp_same_size(other),
            // compare the common-length prefix; on a tie the longer name sorts last
            Ordering::Greater => self
                .ancestor_at(other.size())
                .cmp_same_size(other)
                .then(Ordering::Greater),
            Ordering::Less => self
                .cmp_same_size(other.ancestor_at(self.size()))
                .then(Ordering::Less),
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceName({})", self.canonical_name())
    }
}

impl std::str::FromStr for ServiceName {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceName::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ServiceName {
        ServiceName::parse(s).unwrap()
    }

    #[test]
    fn test_construction_rejects_empty_segments() {
        assert!(ServiceName::of(Vec::<String>::new()).is_err());
        assert!(ServiceName::of(["a", ""]).is_err());
        assert!(name("a").append([""]).is_err());
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        for bad in ["", ".", "a.", ".a", "a..b", "\"a", "a\"b", "\"a\"b", "a b", "\"\"", "\"\\q\""] {
            assert!(ServiceName::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_escapes_and_quoting() {
        let n = name(r#""tab\there"."\u0041""#);
        assert_eq!(n.segments(), vec!["tab\there", "A"]);
        assert_eq!(n.canonical_name(), r#""tab\there".A"#);

        let odd = ServiceName::of(["say \"hi\"", "back\\slash"]).unwrap();
        assert_eq!(odd.canonical_name(), r#""say \"hi\"".back\slash"#);
        assert_eq!(name(&odd.canonical_name()), odd);
    }

    #[test]
    fn test_equality_is_structural() {
        let a = ServiceName::of(["x", "y"]).unwrap();
        let b = name("x").append(["y"]).unwrap();
        assert_eq!(a, b);
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_ordering() {
        assert!(name("a") < name("a.b"));
        assert!(name("a.b") < name("a.c"));
        assert!(name("a.z") < name("b"));
        assert!(name("a.b.c") > name("a.b"));
        assert!(name("b") > name("a.b.c"));
        assert_eq!(name("a.b").cmp(&name("a.b")), Ordering::Equal);
    }

    #[test]
    fn test_ancestry() {
        let root = name("a");
        let deep = name("a.b.c");
        assert!(root.is_parent_of(&deep));
        assert!(deep.is_parent_of(&deep));
        assert!(!deep.is_parent_of(&root));
        assert_eq!(name("a.b.c").common_ancestor_of(&name("a.b.d.e")), Some(name("a.b")));
        assert_eq!(name("a.b").common_ancestor_of(&name("c.b")), None);
    }
}
