//! `parser` reads the bracketed hierarchical input format:
//!
//! ```text
//! [Models]
//!   [eq]
//!     type = ScalarOffset
//!     x = 'forces.x'
//!     offset = 0.6
//!   []
//! []
//! ```
//!
//! Top-level blocks are *sections* (`Models`, `Settings`); blocks inside
//! a section describe one object each. `key = value` lines attach
//! options to the innermost open block; quotes around values are
//! stripped, and `#` starts a comment.

use super::options::OptionSet;
use crate::errors::{MateriaError, Result};
use indexmap::IndexMap;

/// One top-level section: its own options plus its object blocks.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub options: OptionSet,
    pub objects: IndexMap<String, OptionSet>,
}

/// A parsed input file.
#[derive(Debug, Clone, Default)]
pub struct InputFile {
    pub sections: IndexMap<String, Section>,
}

impl InputFile {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// The options of one object in one section.
    pub fn object_options(&self, section: &str, name: &str) -> Result<&OptionSet> {
        self.sections
            .get(section)
            .and_then(|s| s.objects.get(name))
            .ok_or_else(|| {
                MateriaError::setup(format!(
                    "the input file defines no object named '{}' under [{}]",
                    name, section
                ))
            })
    }
}

fn strip_quotes(raw: &str) -> &str {
    let raw = raw.trim();
    if raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')))
    {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// Parses the bracketed hierarchical text format.
pub fn parse(text: &str) -> Result<InputFile> {
    let mut input = InputFile::default();
    // Stack of open block names: [section] or [section, object].
    let mut stack: Vec<String> = Vec::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = match raw_line.find('#') {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "[]" {
            if stack.pop().is_none() {
                return Err(MateriaError::io(format!(
                    "line {}: unbalanced block terminator",
                    lineno + 1
                )));
            }
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim();
            if name.is_empty() {
                return Err(MateriaError::io(format!(
                    "line {}: empty block name",
                    lineno + 1
                )));
            }
            match stack.len() {
                0 => {
                    input
                        .sections
                        .entry(name.to_string())
                        .or_insert_with(Section::default);
                }
                1 => {
                    let section = input
                        .sections
                        .get_mut(&stack[0])
                        .ok_or_else(|| MateriaError::io("internal parser state corrupted"))?;
                    if section.objects.contains_key(name) {
                        return Err(MateriaError::io(format!(
                            "line {}: object '{}' is defined twice under [{}]",
                            lineno + 1,
                            name,
                            stack[0]
                        )));
                    }
                    section.objects.insert(name.to_string(), OptionSet::new());
                }
                _ => {
                    return Err(MateriaError::io(format!(
                        "line {}: blocks nest at most two levels deep",
                        lineno + 1
                    )));
                }
            }
            stack.push(name.to_string());
            continue;
        }

        let (key, value) = match line.find('=') {
            Some(pos) => (line[..pos].trim(), strip_quotes(&line[pos + 1..])),
            None => {
                return Err(MateriaError::io(format!(
                    "line {}: expected a block or 'key = value', got '{}'",
                    lineno + 1,
                    line
                )));
            }
        };

        match stack.len() {
            1 => {
                let section = input
                    .sections
                    .get_mut(&stack[0])
                    .ok_or_else(|| MateriaError::io("internal parser state corrupted"))?;
                section.options.set(key, value);
            }
            2 => {
                let section = input
                    .sections
                    .get_mut(&stack[0])
                    .ok_or_else(|| MateriaError::io("internal parser state corrupted"))?;
                let object = section
                    .objects
                    .get_mut(&stack[1])
                    .ok_or_else(|| MateriaError::io("internal parser state corrupted"))?;
                object.set(key, value);
            }
            _ => {
                return Err(MateriaError::io(format!(
                    "line {}: option outside of any block",
                    lineno + 1
                )));
            }
        }
    }

    if !stack.is_empty() {
        return Err(MateriaError::io(format!(
            "unterminated block '{}'",
            stack.join("/")
        )));
    }

    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_objects() {
        let text = r"
            # a comment
            [Settings]
              disable_jit = false
            []
            [Models]
              [eq]
                type = ScalarOffset
                x = 'forces.x'
                offset = 0.6
              []
            []
        ";
        let input = parse(text).unwrap();
        assert!(input.section("Settings").is_some());
        let eq = input.object_options("Models", "eq").unwrap();
        assert_eq!(eq.get_str("type").unwrap(), "ScalarOffset");
        assert_eq!(eq.get_str("x").unwrap(), "forces.x");
        assert_eq!(eq.get_real("offset").unwrap(), 0.6);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("[]").is_err());
        assert!(parse("[Models]").is_err());
        assert!(parse("key = 1").is_err());
        assert!(parse("[A]\n[B]\n[C]\nx = 1\n[]\n[]\n[]").is_err());
    }
}
