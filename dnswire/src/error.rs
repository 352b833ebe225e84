use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("message truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("malformed message at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },

    #[error("header declares {declared} {section} entries but {actual} were provided")]
    Inconsistent {
        section: Section,
        declared: u16,
        actual: usize,
    },

    #[error("{what} is {size} bytes, the limit is {limit}")]
    Oversized {
        what: &'static str,
        size: usize,
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Question => "question",
            Section::Answer => "answer",
            Section::Authority => "authority",
            Section::Additional => "additional",
        };
        f.write_str(name)
    }
}
