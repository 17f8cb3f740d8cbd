// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control file primitives.

`Release` and `Packages` files, as well as the `control` member of `.deb`
archives, are series of paragraphs of `Name: value` fields. Values may span
multiple lines; continuation lines start with whitespace.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>.
*/

use {
    crate::{
        error::{PacketaryError, Result},
        io::LineReader,
    },
    futures::AsyncBufRead,
    std::{
        fmt::{Display, Formatter},
        io::{BufRead, Write},
    },
};

/// A field in a control paragraph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// Construct an instance from a field name and value.
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Construct a multiline field from its lines.
    ///
    /// The value starts on the line following the field name.
    pub fn from_lines(name: impl ToString, lines: impl Iterator<Item = String>) -> Self {
        let value = lines.map(|line| format!("\n {}", line)).collect::<String>();

        Self::new(name, value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value, including newlines of multiline values.
    pub fn value_str(&self) -> &str {
        &self.value
    }

    /// Iterate over the non-empty lines of the value, leading whitespace stripped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value
            .lines()
            .map(|x| x.trim_start())
            .filter(|x| !x.is_empty())
    }

    /// Iterate over whitespace delimited words of the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> {
        self.value.split_ascii_whitespace()
    }

    /// Write the field, terminated by a newline.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b":")?;
        if !self.value.starts_with('\n') {
            writer.write_all(b" ")?;
        }
        writer.write_all(self.value.as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// An ordered series of fields.
///
/// Field names are case insensitive on read and case preserving on set.
/// A name occurs at most once.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field.
    ///
    /// A field with the same name keeps its position and takes the new value.
    pub fn set_field(&mut self, field: ControlField) {
        match self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(&field.name))
        {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Set a field from its name and value.
    pub fn set_field_from_string(&mut self, name: impl ToString, value: impl ToString) {
        self.set_field(ControlField::new(name, value));
    }

    /// Set a field only if it isn't present.
    pub fn set_default(&mut self, name: &str, value: impl ToString) {
        if !self.has_field(name) {
            self.set_field_from_string(name, value);
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }

    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// The raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// The named field evaluated as a boolean.
    ///
    /// The field is [true] iff its value is `yes`.
    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.field_str(name).map(|v| v.eq_ignore_ascii_case("yes"))
    }

    /// The named field parsed as an unsigned integer.
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| v.parse::<u64>().map_err(PacketaryError::from))
    }

    /// Obtain the value of a field that must be present.
    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| PacketaryError::ControlParse(format!("missing field {}", name)))
    }

    /// Serialize the paragraph, without a paragraph separator.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }

    /// Parse the first paragraph of a string.
    pub fn parse_str(s: &str) -> Result<Option<Self>> {
        parse_paragraphs(std::io::Cursor::new(s.as_bytes()))
            .map(|mut paragraphs| (!paragraphs.is_empty()).then(|| paragraphs.remove(0)))
    }
}

impl Display for ControlParagraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut buffer = vec![];
        self.write(&mut buffer).map_err(|_| std::fmt::Error)?;

        f.write_str(&String::from_utf8_lossy(&buffer))
    }
}

/// Holds parsing state for control files.
///
/// Instances are fed lines of text and emit [ControlParagraph] instances as
/// they are completed.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph,
    field: Option<String>,
}

impl ControlFileParser {
    /// Feed a line to the parser.
    ///
    /// Resolves to the paragraph the line terminated, if any.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph>> {
        let is_empty_line = line.trim().is_empty();
        let is_indented = (line.starts_with(' ') || line.starts_with('\t')) && !is_empty_line;

        let current_field = self.field.take();

        if is_empty_line {
            if let Some(field) = current_field {
                self.flush_field(field)?;
            }

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        match (current_field, is_indented) {
            (Some(v), false) => {
                self.flush_field(v)?;
                self.field = Some(line.to_string());
            }
            (None, true) => {
                return Err(PacketaryError::ControlParse(format!(
                    "continuation line without a field: {}",
                    line.trim_end()
                )));
            }
            (None, false) => {
                self.field = Some(line.to_string());
            }
            (Some(v), true) => {
                let mut v = v;
                if !v.ends_with('\n') {
                    v.push('\n');
                }
                self.field = Some(v + line);
            }
        }

        Ok(None)
    }

    /// Finish parsing, returning any incomplete paragraph.
    pub fn finish(mut self) -> Result<Option<ControlParagraph>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self, v: String) -> Result<()> {
        let (name, value) = v.split_once(':').ok_or_else(|| {
            PacketaryError::ControlParse(format!("error parsing line '{}'; missing colon", v.trim_end()))
        })?;

        // Strip the separator whitespace and the final line terminator but keep
        // the line structure of multiline values.
        let value = value.trim_start_matches([' ', '\t']).trim_end();

        self.paragraph
            .set_field_from_string(name.trim(), value);

        Ok(())
    }
}

/// Parse every paragraph from a synchronous reader.
pub fn parse_paragraphs<R: BufRead>(mut reader: R) -> Result<Vec<ControlParagraph>> {
    let mut paragraphs = vec![];
    let mut parser = ControlFileParser::default();

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }

        if let Some(paragraph) = parser.write_line(&line)? {
            paragraphs.push(paragraph);
        }
    }

    if let Some(paragraph) = parser.finish()? {
        paragraphs.push(paragraph);
    }

    Ok(paragraphs)
}

/// An asynchronous reader of [ControlParagraph].
pub struct ControlParagraphAsyncReader<R> {
    reader: LineReader<R>,
    parser: Option<ControlFileParser>,
}

impl<R> ControlParagraphAsyncReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: LineReader::new(reader),
            parser: Some(ControlFileParser::default()),
        }
    }

    /// Read the next available paragraph.
    ///
    /// Resolves to [None] on end of input.
    pub async fn read_paragraph(&mut self) -> Result<Option<ControlParagraph>> {
        let mut parser = if let Some(parser) = self.parser.take() {
            parser
        } else {
            return Ok(None);
        };

        while let Some(line) = self.reader.read_line().await? {
            if let Some(paragraph) = parser.write_line(&line)? {
                self.parser.replace(parser);
                return Ok(Some(paragraph));
            }
        }

        parser.finish()
    }
}
