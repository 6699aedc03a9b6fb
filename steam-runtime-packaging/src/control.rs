// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! deb822 stanzas.

`Packages`, `Sources` and `Release` files in an APT repository are all
sequences of *stanzas* (Debian policy calls them paragraphs) of
`Name: value` fields separated by blank lines. See
<https://www.debian.org/doc/debian-policy/ch-controlfields.html>.

[Stanza] holds a parsed stanza. [StanzaParser] is a line-fed state machine and
[StanzaReader] / [StanzaAsyncReader] drive it from a blocking or an
asynchronous reader.
*/

use {
    crate::error::{Result, RuntimeError},
    futures::{AsyncBufRead, AsyncBufReadExt},
    pin_project::pin_project,
    std::io::{BufRead, Write},
};

/// A single `Name: value` field.
///
/// The value keeps its continuation lines (with their leading whitespace) so
/// the stanza can be written back out unchanged.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StanzaField {
    name: String,
    raw_value: String,
}

impl StanzaField {
    /// Construct a field from a name and a single-line value.
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            raw_value: value.to_string(),
        }
    }

    /// The field name, as it appeared in the source.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field value without leading or trailing whitespace.
    pub fn value_str(&self) -> &str {
        self.raw_value.trim()
    }

    /// Iterate over the lines of the value, with leading whitespace stripped.
    ///
    /// Multiline fields like `Files` commonly start with an empty first line,
    /// which is skipped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.raw_value
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
    }

    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b":")?;
        if !self.raw_value.starts_with('\n') {
            writer.write_all(b" ")?;
        }
        writer.write_all(self.raw_value.as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// An ordered series of fields.
///
/// Field names are case insensitive on read and case preserving on set.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Stanza {
    fields: Vec<StanzaField>,
}

impl Stanza {
    /// Whether the stanza has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any field with the same (case insensitive) name.
    pub fn set_field(&mut self, field: StanzaField) {
        self.fields
            .retain(|f| !f.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Set a field from a name and value.
    pub fn set_field_from_string(&mut self, name: impl ToString, value: impl ToString) {
        self.set_field(StanzaField::new(name, value));
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &StanzaField> {
        self.fields.iter()
    }

    /// Obtain the named field.
    pub fn field(&self, name: &str) -> Option<&StanzaField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the trimmed string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the value of a field that must be present.
    ///
    /// `kind` names the stanza flavor in the resulting error.
    pub fn required_field_str(&self, kind: &'static str, name: &'static str) -> Result<&str> {
        self.field_str(name)
            .ok_or(RuntimeError::StanzaRequiredFieldMissing(kind, name))
    }

    /// Obtain the value of a field parsed as an unsigned integer.
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| v.parse::<u64>().map_err(RuntimeError::from))
    }

    /// Obtain an iterator of lines in the named field.
    pub fn field_iter_lines(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name).map(|f| f.iter_lines())
    }

    /// Serialize the stanza.
    ///
    /// No blank line is written after the final field; callers separating
    /// several stanzas must write it themselves.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

/// Line-fed parser emitting a [Stanza] whenever one is terminated.
#[derive(Clone, Debug, Default)]
pub struct StanzaParser {
    stanza: Stanza,
    field: Option<String>,
}

impl StanzaParser {
    /// Feed one line (with or without its line terminator).
    ///
    /// Returns the completed stanza if this line ended one.
    pub fn write_line(&mut self, line: &str) -> Result<Option<Stanza>> {
        if line.trim().is_empty() {
            if let Some(field) = self.field.take() {
                self.flush_field(field)?;
            }

            return Ok(if self.stanza.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.stanza))
            });
        }

        let continuation = line.starts_with(' ') || line.starts_with('\t');

        match (self.field.take(), continuation) {
            (Some(mut current), true) => {
                if !current.ends_with('\n') {
                    current.push('\n');
                }
                current.push_str(line);
                self.field = Some(current);
            }
            (Some(current), false) => {
                self.flush_field(current)?;
                self.field = Some(line.to_string());
            }
            (None, true) => {
                return Err(RuntimeError::StanzaParse(format!(
                    "continuation line without a field: {:?}",
                    line
                )));
            }
            (None, false) => {
                // Comments are permitted outside of field values.
                if !line.starts_with('#') {
                    self.field = Some(line.to_string());
                }
            }
        }

        Ok(None)
    }

    /// Finish parsing, returning any stanza not terminated by a blank line.
    pub fn finish(mut self) -> Result<Option<Stanza>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.stanza.is_empty() {
            None
        } else {
            Some(self.stanza)
        })
    }

    fn flush_field(&mut self, text: String) -> Result<()> {
        let (name, value) = text.split_once(':').ok_or_else(|| {
            RuntimeError::StanzaParse(format!("missing colon in field {:?}", text))
        })?;

        let name = name.trim();
        if name.is_empty() {
            return Err(RuntimeError::StanzaParse(format!(
                "empty field name in {:?}",
                text
            )));
        }

        let value = value.trim_start_matches([' ', '\t']).trim_end();

        self.stanza.set_field_from_string(name, value);

        Ok(())
    }
}

/// Iterator of [Stanza] read from a [BufRead].
pub struct StanzaReader<R: BufRead> {
    reader: R,
    parser: Option<StanzaParser>,
}

impl<R: BufRead> StanzaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(StanzaParser::default()),
        }
    }

    fn next_stanza(&mut self) -> Result<Option<Stanza>> {
        let mut parser = match self.parser.take() {
            Some(parser) => parser,
            None => return Ok(None),
        };

        loop {
            let mut line = String::new();

            if self.reader.read_line(&mut line)? == 0 {
                return parser.finish();
            }

            if let Some(stanza) = parser.write_line(&line)? {
                self.parser = Some(parser);
                return Ok(Some(stanza));
            }
        }
    }
}

impl<R: BufRead> Iterator for StanzaReader<R> {
    type Item = Result<Stanza>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_stanza().transpose()
    }
}

/// Asynchronous reader of [Stanza].
#[pin_project]
pub struct StanzaAsyncReader<R> {
    #[pin]
    reader: R,
    parser: Option<StanzaParser>,
}

impl<R> StanzaAsyncReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(StanzaParser::default()),
        }
    }

    /// Read the next stanza. Resolves to [None] at end of input.
    pub async fn read_stanza(&mut self) -> Result<Option<Stanza>> {
        let mut parser = match self.parser.take() {
            Some(parser) => parser,
            None => return Ok(None),
        };

        loop {
            let mut line = String::new();

            if self.reader.read_line(&mut line).await? == 0 {
                return parser.finish();
            }

            if let Some(stanza) = parser.write_line(&line)? {
                self.parser = Some(parser);
                return Ok(Some(stanza));
            }
        }
    }

    /// Read all remaining stanzas.
    pub async fn read_all(mut self) -> Result<Vec<Stanza>> {
        let mut res = vec![];

        while let Some(stanza) = self.read_stanza().await? {
            res.push(stanza);
        }

        Ok(res)
    }
}

/// Parse every stanza in a string.
pub fn parse_stanzas(s: &str) -> Result<Vec<Stanza>> {
    StanzaReader::new(std::io::Cursor::new(s.as_bytes())).collect()
}
