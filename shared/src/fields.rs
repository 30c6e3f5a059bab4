//! Ordered field lists for building outgoing packets
//!
//! A [`PacketFields`] is the typed form of the classic `sendf` format string.
//! Each field has a one-character tag, and [`PacketFields::from_format`] /
//! [`PacketFields::tags`] convert between the two so existing format strings
//! keep working:
//!
//! | tag | meaning |
//! |---|---|
//! | `r` | (leading only) mark the packet reliable |
//! | `x` | client slot to exclude from a broadcast |
//! | `i`, `i2`..`i9` | one or more compressed ints |
//! | `f`, `f2`..`f9` | one or more floats |
//! | `s` | length-prefixed string |
//! | `m` | raw byte blob |
//! | `v` | int array |
//!
//! Arguments are consumed strictly left to right.

use crate::{Packet, PacketWriter};
use thiserror::Error;

/// One typed value in a field list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<'a> {
    Int(i32),
    Ints(&'a [i32]),
    Float(f32),
    Str(&'a str),
    Bytes(&'a [u8]),
}

impl Field<'_> {
    pub fn tag(&self) -> char {
        match self {
            Field::Int(_) => 'i',
            Field::Ints(_) => 'v',
            Field::Float(_) => 'f',
            Field::Str(_) => 's',
            Field::Bytes(_) => 'm',
        }
    }

    fn encode(&self, writer: &mut PacketWriter) {
        match *self {
            Field::Int(n) => writer.put_int(n),
            Field::Ints(values) => values.iter().for_each(|&n| writer.put_int(n)),
            Field::Float(f) => writer.put_float(f),
            Field::Str(s) => writer.put_string(s),
            Field::Bytes(bytes) => writer.put_bytes(bytes),
        }
    }
}

/// Header fields written ahead of a file body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileField<'a> {
    /// `i`
    Int(i32),
    /// `s`
    Str(&'a str),
    /// `l`: the body length
    Len,
}

impl FileField<'_> {
    pub fn encode(&self, writer: &mut PacketWriter, body_len: usize) {
        match *self {
            FileField::Int(n) => writer.put_int(n),
            FileField::Str(s) => writer.put_string(s),
            FileField::Len => writer.put_int(body_len as i32),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("unknown format tag '{0}'")]
    UnknownTag(char),
    #[error("format tag '{tag}' is missing argument {index}")]
    MissingArgument { tag: char, index: usize },
    #[error("argument {index} does not match format tag '{tag}'")]
    MismatchedArgument { tag: char, index: usize },
    #[error("{0} argument(s) left over after the format string")]
    TrailingArguments(usize),
}

/// Ordered description of one outgoing packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketFields<'a> {
    reliable: bool,
    exclude: Option<usize>,
    fields: Vec<Field<'a>>,
}

impl<'a> PacketFields<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reliable(mut self) -> Self {
        self.reliable = true;
        self
    }

    /// Leaves `slot` out when the packet is broadcast.
    pub fn exclude(mut self, slot: usize) -> Self {
        self.exclude = Some(slot);
        self
    }

    pub fn int(self, n: i32) -> Self {
        self.push(Field::Int(n))
    }

    pub fn ints(self, values: &'a [i32]) -> Self {
        self.push(Field::Ints(values))
    }

    pub fn float(self, f: f32) -> Self {
        self.push(Field::Float(f))
    }

    pub fn string(self, s: &'a str) -> Self {
        self.push(Field::Str(s))
    }

    pub fn bytes(self, bytes: &'a [u8]) -> Self {
        self.push(Field::Bytes(bytes))
    }

    pub fn push(mut self, field: Field<'a>) -> Self {
        self.fields.push(field);
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn excluded(&self) -> Option<usize> {
        self.exclude
    }

    pub fn fields(&self) -> &[Field<'a>] {
        &self.fields
    }

    pub fn encode_into(&self, writer: &mut PacketWriter) {
        for field in &self.fields {
            field.encode(writer);
        }
    }

    pub fn encode(&self) -> Packet {
        let mut writer = PacketWriter::new();
        self.encode_into(&mut writer);
        writer.finish(self.reliable)
    }

    /// Builds a field list from a classic format string, consuming `args`
    /// left to right. `x` takes an [`Field::Int`]; a negative value means no
    /// exclusion.
    pub fn from_format(format: &str, args: &[Field<'a>]) -> Result<Self, FormatError> {
        let mut out = Self::new();
        let mut tags = format.chars().peekable();
        let total = args.len();
        let mut args = args.iter().copied().enumerate();

        if tags.peek() == Some(&'r') {
            tags.next();
            out.reliable = true;
        }

        while let Some(tag) = tags.next() {
            let repeat = match tag {
                'i' | 'f' => match tags.peek().and_then(|c| c.to_digit(10)) {
                    Some(n) => {
                        tags.next();
                        n as usize
                    }
                    None => 1,
                },
                'x' | 's' | 'm' | 'v' => 1,
                other => return Err(FormatError::UnknownTag(other)),
            };

            for _ in 0..repeat {
                let (index, arg) = args
                    .next()
                    .ok_or(FormatError::MissingArgument { tag, index: total })?;
                match (tag, arg) {
                    ('x', Field::Int(n)) => out.exclude = usize::try_from(n).ok(),
                    ('i', Field::Int(_))
                    | ('f', Field::Float(_))
                    | ('s', Field::Str(_))
                    | ('m', Field::Bytes(_))
                    | ('v', Field::Ints(_)) => out.fields.push(arg),
                    _ => return Err(FormatError::MismatchedArgument { tag, index }),
                }
            }
        }

        match args.count() {
            0 => Ok(out),
            n => Err(FormatError::TrailingArguments(n)),
        }
    }

    /// Renders the field list back into its format string. Runs of ints or
    /// floats collapse into a counted tag.
    pub fn tags(&self) -> String {
        let mut out = String::new();
        if self.reliable {
            out.push('r');
        }
        if self.exclude.is_some() {
            out.push('x');
        }

        let mut i = 0;
        while i < self.fields.len() {
            let tag = self.fields[i].tag();
            let mut run = 1;
            if tag == 'i' || tag == 'f' {
                while run < 9
                    && self
                        .fields
                        .get(i + run)
                        .is_some_and(|next| next.tag() == tag)
                {
                    run += 1;
                }
            }
            out.push(tag);
            if run > 1 {
                out.push_str(&run.to_string());
            }
            i += run;
        }
        out
    }
}
