use std::{fmt, sync::Arc};

use regex::Regex;
use topicbus_error::PatternError;

/// Разделитель сегментов в имени топика.
pub const SEPARATOR: char = '.';
/// Ровно один сегмент.
pub const SINGLE_WILDCARD: &str = "*";
/// Ноль или больше сегментов.
pub const MULTI_WILDCARD: &str = "#";

// Токены регулярки: склейка сегментов и подстановки.
const JOIN_BOUNDARY: &str = r"\.\b";
const JOIN_AFTER_MULTI: &str = r"\b";
const ANY_SEQUENCE: &str = r"[\s\S]*";
const ONE_SEGMENT: &str = r"[^.]+";

/// Скомпилированный шаблон топика.
///
/// Без подстановок сравнение идёт по точному совпадению строки,
/// регулярка не собирается. Иначе шаблон транслируется в якорное
/// регулярное выражение посегментно:
/// - `#` -> любая последовательность символов, включая точки;
/// - `*` -> один или больше символов, кроме точки;
/// - литерал -> сам себя (экранируется);
/// - перед сегментом `i` ставится `\.\b`, но если сегмент `i-1` это `#`,
///   то только `\b`: `#` сам может поглотить разделитель.
#[derive(Clone)]
pub struct TopicMatcher {
    pattern: Arc<str>,
    kind: MatchKind,
}

#[derive(Clone)]
enum MatchKind {
    Exact,
    Regex(Regex),
}

/// Есть ли в шаблоне сегмент-подстановка.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern
        .split(SEPARATOR)
        .any(|segment| segment == SINGLE_WILDCARD || segment == MULTI_WILDCARD)
}

/// Разовая проверка имени против шаблона.
pub fn matches(
    name: &str,
    pattern: &str,
) -> Result<bool, PatternError> {
    Ok(TopicMatcher::compile(pattern)?.matches(name))
}

/// Проверка точного имени топика: те же правила, что у шаблона, и ни
/// одной подстановки.
pub fn validate_name(name: &str) -> Result<(), PatternError> {
    validate(name)?;
    if is_wildcard(name) {
        return Err(PatternError::WildcardName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl TopicMatcher {
    /// Проверяет и компилирует шаблон.
    ///
    /// Пустой шаблон, пустой сегмент или подстановочный символ внутри
    /// литерала (`a*`, `b#c`) дают [`PatternError`].
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        validate(pattern)?;

        let kind = if is_wildcard(pattern) {
            let source = to_regex(pattern);
            let regex = Regex::new(&source).map_err(|err| PatternError::Compile {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })?;
            MatchKind::Regex(regex)
        } else {
            MatchKind::Exact
        };

        Ok(Self {
            pattern: Arc::from(pattern),
            kind,
        })
    }

    pub fn matches(
        &self,
        name: &str,
    ) -> bool {
        match &self.kind {
            MatchKind::Exact => *self.pattern == *name,
            MatchKind::Regex(re) => re.is_match(name),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.kind, MatchKind::Regex(_))
    }

    /// Исходник регулярки (для диагностики), `None` для точного шаблона.
    pub fn regex_source(&self) -> Option<&str> {
        match &self.kind {
            MatchKind::Exact => None,
            MatchKind::Regex(re) => Some(re.as_str()),
        }
    }
}

impl fmt::Debug for TopicMatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TopicMatcher")
            .field("pattern", &self.pattern)
            .field("wildcard", &self.is_wildcard())
            .finish()
    }
}

fn validate(pattern: &str) -> Result<(), PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::EmptyPattern);
    }
    for (index, segment) in pattern.split(SEPARATOR).enumerate() {
        if segment.is_empty() {
            return Err(PatternError::EmptySegment {
                pattern: pattern.to_string(),
                index,
            });
        }
        let is_wild = segment == SINGLE_WILDCARD || segment == MULTI_WILDCARD;
        if !is_wild && segment.contains(['*', '#']) {
            return Err(PatternError::MalformedWildcard {
                pattern: pattern.to_string(),
                segment: segment.to_string(),
            });
        }
    }
    Ok(())
}

fn to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut prev: Option<&str> = None;
    for segment in pattern.split(SEPARATOR) {
        if let Some(p) = prev {
            out.push_str(if p == MULTI_WILDCARD {
                JOIN_AFTER_MULTI
            } else {
                JOIN_BOUNDARY
            });
        }
        match segment {
            MULTI_WILDCARD => out.push_str(ANY_SEQUENCE),
            SINGLE_WILDCARD => out.push_str(ONE_SEGMENT),
            literal => out.push_str(&regex::escape(literal)),
        }
        prev = Some(segment);
    }
    out.push('$');
    out
}
