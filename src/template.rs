//! Output filename templates.
//!
//! darktable-cli expands `$(VARIABLE)` placeholders in its output path
//! argument (`$(FILE.NAME)`, `$(VERSION)`, …). Export profiles here may
//! additionally use lowercase placeholders (`$(tag)`, `$(position)`) that
//! are resolved *before* invoking the renderer, from values only this tool
//! knows.
//!
//! A template is parsed once into an AST over a closed set of recognized
//! tokens. An unrecognized token is a configuration error at parse time —
//! there is no permissive "unknown placeholder passes through as an object"
//! fallback, because a typo like `$(FILE.NMAE)` would otherwise surface as
//! a literal in every exported filename.
//!
//! [`OutputTemplate::render`] substitutes the local tokens from a typed
//! [`Substitutions`] map and re-emits renderer tokens verbatim, producing
//! the path-template string handed to darktable-cli.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template token $({0})")]
    UnknownToken(String),
    #[error("unterminated placeholder starting at \"{0}\"")]
    Unterminated(String),
    #[error("template uses $({0}) but no value was supplied for it")]
    MissingValue(&'static str),
}

/// Recognized placeholder tokens.
///
/// The uppercase variants are darktable export variables: they survive
/// rendering verbatim and are expanded by darktable-cli itself. The
/// lowercase variants are local and must be supplied via [`Substitutions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    // Expanded by darktable-cli.
    FileName,
    FileFolder,
    FileExtension,
    Id,
    Version,
    Sequence,
    RollName,
    // Resolved locally before invoking the renderer.
    Tag,
    Position,
}

impl Variable {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "FILE.NAME" => Some(Self::FileName),
            "FILE.FOLDER" => Some(Self::FileFolder),
            "FILE.EXTENSION" => Some(Self::FileExtension),
            "ID" => Some(Self::Id),
            "VERSION" => Some(Self::Version),
            "SEQUENCE" => Some(Self::Sequence),
            "ROLL.NAME" => Some(Self::RollName),
            "tag" => Some(Self::Tag),
            "position" => Some(Self::Position),
            _ => None,
        }
    }

    fn token(&self) -> &'static str {
        match self {
            Self::FileName => "FILE.NAME",
            Self::FileFolder => "FILE.FOLDER",
            Self::FileExtension => "FILE.EXTENSION",
            Self::Id => "ID",
            Self::Version => "VERSION",
            Self::Sequence => "SEQUENCE",
            Self::RollName => "ROLL.NAME",
            Self::Tag => "tag",
            Self::Position => "position",
        }
    }

    /// Whether darktable-cli expands this token (as opposed to us).
    fn renderer_expanded(&self) -> bool {
        !matches!(self, Self::Tag | Self::Position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(Variable),
}

/// Values for the locally-resolved template tokens.
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    pub tag: Option<String>,
    pub position: Option<String>,
}

/// A parsed output filename template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl OutputTemplate {
    /// Parse a template string, rejecting unknown or unterminated tokens.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(start) = rest.find("$(") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find(')')
                .ok_or_else(|| TemplateError::Unterminated(rest[start..].to_string()))?;
            let token = &after[..end];
            let var = Variable::parse(token)
                .ok_or_else(|| TemplateError::UnknownToken(token.to_string()))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable(var));
            rest = &after[end + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The original template text (also the fingerprint input).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute local tokens; renderer tokens are re-emitted verbatim
    /// for darktable-cli to expand.
    pub fn render(&self, subst: &Substitutions) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(var) if var.renderer_expanded() => {
                    out.push_str("$(");
                    out.push_str(var.token());
                    out.push(')');
                }
                Segment::Variable(Variable::Tag) => {
                    let value = subst
                        .tag
                        .as_deref()
                        .ok_or(TemplateError::MissingValue("tag"))?;
                    out.push_str(value);
                }
                Segment::Variable(Variable::Position) => {
                    let value = subst
                        .position
                        .as_deref()
                        .ok_or(TemplateError::MissingValue("position"))?;
                    out.push_str(value);
                }
                Segment::Variable(_) => unreachable!(),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for OutputTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
