//! Quality strings and quality requirements
//!
//! A quality is a set of components (resolution, source, codec, audio).
//! Requirements constrain each component type with a plain value, a range
//! (`720p-1080p`), a comparison (`>=720p`), an alternative list
//! (`720p|1080p`), or a negation (`!cam`).

use std::fmt;

use crate::error::ParseError;

/// Component type of a quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// Video resolution
    Resolution,
    /// Release source
    Source,
    /// Video codec
    Codec,
    /// Audio format
    Audio,
}

/// A single known quality component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Component {
    /// Component type
    pub kind: ComponentKind,
    /// Canonical name
    pub name: &'static str,
    /// Rank within its kind; higher is better
    pub value: u16,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

const fn component(kind: ComponentKind, name: &'static str, value: u16) -> Component {
    Component { kind, name, value }
}

use ComponentKind::{Audio, Codec, Resolution, Source};

const COMPONENTS: &[Component] = &[
    component(Resolution, "360p", 10),
    component(Resolution, "368p", 11),
    component(Resolution, "480i", 19),
    component(Resolution, "480p", 20),
    component(Resolution, "576p", 30),
    component(Resolution, "hr", 40),
    component(Resolution, "720i", 49),
    component(Resolution, "720p", 50),
    component(Resolution, "1080i", 59),
    component(Resolution, "1080p", 60),
    component(Resolution, "2160p", 70),
    component(Source, "workprint", 10),
    component(Source, "cam", 20),
    component(Source, "ts", 30),
    component(Source, "tc", 40),
    component(Source, "r5", 50),
    component(Source, "hdtv", 60),
    component(Source, "sdtv", 55),
    component(Source, "dvdscr", 45),
    component(Source, "webrip", 70),
    component(Source, "dvdrip", 80),
    component(Source, "web-dl", 90),
    component(Source, "bluray", 100),
    component(Source, "remux", 110),
    component(Codec, "divx", 10),
    component(Codec, "xvid", 20),
    component(Codec, "h264", 30),
    component(Codec, "h265", 40),
    component(Codec, "av1", 50),
    component(Audio, "mp3", 10),
    component(Audio, "aac", 20),
    component(Audio, "dd5.1", 30),
    component(Audio, "truehd", 40),
    component(Audio, "dts", 50),
    component(Audio, "dtshd", 60),
    component(Audio, "flac", 70),
];

const ALIASES: &[(&str, &str)] = &[
    ("4k", "2160p"),
    ("uhd", "2160p"),
    ("webdl", "web-dl"),
    ("web", "web-dl"),
    ("blu-ray", "bluray"),
    ("bdrip", "bluray"),
    ("brrip", "bluray"),
    ("x264", "h264"),
    ("avc", "h264"),
    ("x265", "h265"),
    ("hevc", "h265"),
    ("ac3", "dd5.1"),
    ("dd+5.1", "dd5.1"),
    ("dts-hd", "dtshd"),
];

/// Look up a component by name or alias (case-insensitive)
#[must_use]
pub fn lookup_component(name: &str) -> Option<Component> {
    let lowered = name.to_lowercase();
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, target)| *target)
        .unwrap_or(lowered.as_str());
    COMPONENTS.iter().copied().find(|c| c.name == canonical)
}

/// A parsed quality
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quality {
    components: Vec<Component>,
}

impl Quality {
    /// Parse a strict quality string: every word must be a known component.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut quality = Self::default();
        for word in text.split_whitespace() {
            let found = lookup_component(word)
                .ok_or_else(|| ParseError::new(format!("`{}` is not a valid quality", word)))?;
            if quality.get(found.kind).is_some() {
                return Err(ParseError::new(format!(
                    "`{}` specifies more than one {:?}",
                    text, found.kind
                )));
            }
            quality.components.push(found);
        }
        Ok(quality)
    }

    /// Lenient scan of free text (e.g. a release title) for known components.
    #[must_use]
    pub fn scan(text: &str) -> Self {
        let mut quality = Self::default();
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '+'))
            .filter(|w| !w.is_empty())
            .collect();
        for (i, word) in words.iter().enumerate() {
            // `dd5.1` style components straddle a dot
            let mut candidates = Vec::new();
            if let Some(next) = words.get(i + 1) {
                candidates.push(format!("{}.{}", word, next));
            }
            candidates.push((*word).to_string());
            candidates.extend(word.split('-').map(str::to_string));
            for candidate in candidates {
                if let Some(found) = lookup_component(&candidate) {
                    if quality.get(found.kind).is_none() {
                        quality.components.push(found);
                    }
                }
            }
        }
        quality
    }

    /// Component of the given kind, if present
    #[must_use]
    pub fn get(&self, kind: ComponentKind) -> Option<Component> {
        self.components.iter().copied().find(|c| c.kind == kind)
    }

    /// True when no component was recognised
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "unknown");
        }
        let mut sorted = self.components.clone();
        sorted.sort_by_key(|c| c.kind);
        let names: Vec<&str> = sorted.iter().map(|c| c.name).collect();
        write!(f, "{}", names.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Constraint {
    Exact(Component),
    Range(Component, Component),
    AtLeast(Component, bool),
    AtMost(Component, bool),
}

impl Constraint {
    fn kind(&self) -> ComponentKind {
        match self {
            Self::Exact(c) | Self::Range(c, _) | Self::AtLeast(c, _) | Self::AtMost(c, _) => {
                c.kind
            }
        }
    }

    fn matches(&self, candidate: Component) -> bool {
        match self {
            Self::Exact(c) => c.value == candidate.value,
            Self::Range(low, high) => low.value <= candidate.value && candidate.value <= high.value,
            Self::AtLeast(c, inclusive) => {
                candidate.value > c.value || (*inclusive && candidate.value == c.value)
            }
            Self::AtMost(c, inclusive) => {
                candidate.value < c.value || (*inclusive && candidate.value == c.value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    alternatives: Vec<Constraint>,
    negated: bool,
}

/// Parsed quality requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    text: String,
    requirements: Vec<Requirement>,
}

fn parse_component(word: &str, whole: &str) -> Result<Component, ParseError> {
    lookup_component(word).ok_or_else(|| {
        ParseError::new(format!(
            "`{}` is not a valid quality component in `{}`",
            word, whole
        ))
    })
}

fn parse_constraint(token: &str, whole: &str) -> Result<Constraint, ParseError> {
    if let Some(found) = lookup_component(token) {
        return Ok(Constraint::Exact(found));
    }
    for (prefix, at_least, inclusive) in [
        (">=", true, true),
        ("<=", false, true),
        (">", true, false),
        ("<", false, false),
    ] {
        if let Some(rest) = token.strip_prefix(prefix) {
            let found = parse_component(rest, whole)?;
            return Ok(if at_least {
                Constraint::AtLeast(found, inclusive)
            } else {
                Constraint::AtMost(found, inclusive)
            });
        }
    }
    if let Some((low, high)) = token.split_once('-') {
        let low = parse_component(low, whole)?;
        let high = parse_component(high, whole)?;
        if low.kind != high.kind {
            return Err(ParseError::new(format!(
                "range `{}` mixes {:?} and {:?}",
                token, low.kind, high.kind
            )));
        }
        return Ok(Constraint::Range(low, high));
    }
    Err(ParseError::new(format!(
        "`{}` is not a valid quality component in `{}`",
        token, whole
    )))
}

impl Requirements {
    /// Parse a requirement string such as `720p-1080p !cam h264|h265`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut requirements = Vec::new();
        for token in text.split_whitespace() {
            if token.eq_ignore_ascii_case("any") {
                continue;
            }
            let (negated, body) = match token.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            let alternatives = body
                .split('|')
                .map(|part| parse_constraint(part, text))
                .collect::<Result<Vec<_>, _>>()?;
            let kind = alternatives[0].kind();
            if alternatives.iter().any(|c| c.kind() != kind) {
                return Err(ParseError::new(format!(
                    "`{}` mixes quality component types",
                    token
                )));
            }
            requirements.push(Requirement {
                alternatives,
                negated,
            });
        }
        Ok(Self {
            text: text.to_string(),
            requirements,
        })
    }

    /// Whether the quality satisfies every requirement
    #[must_use]
    pub fn allows(&self, quality: &Quality) -> bool {
        self.requirements.iter().all(|req| {
            let kind = req.alternatives[0].kind();
            let matched = quality
                .get(kind)
                .is_some_and(|c| req.alternatives.iter().any(|alt| alt.matches(c)));
            if req.negated {
                !matched
            } else {
                matched
            }
        })
    }
}

impl fmt::Display for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests;
