//! CSV representer.
//!
//! Members are flattened into rows. A nested object member adds columns
//! named `parent.child` (the cartesian product with the rows built so far);
//! an array of objects adds one row per element. Other arrays are written as
//! JSON text in a single cell.
//!
//! Cells use non-numeric quoting: strings are quoted, numbers and booleans
//! are bare, `null` is an empty cell.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::debug;

use everest_core::{DomainError, StateData};

use crate::Representer;

/// CSV document error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsvError {
    #[error("invalid field \"{field}\" in CSV input")]
    InvalidField { field: String },

    #[error("invalid row length on line {line} (found: {found}, expected: {expected})")]
    InvalidRowLength {
        line: usize,
        found: usize,
        expected: usize,
    },

    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: usize },

    /// A bare cell that is neither a number, a boolean nor empty.
    #[error("invalid unquoted value `{value}` on line {line}")]
    InvalidValue { line: usize, value: String },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDialect {
    pub delimiter: char,
    pub quote: char,
    /// Written after every record; both `\n` and `\r\n` are accepted on read.
    pub line_terminator: String,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            line_terminator: "\n".to_string(),
        }
    }
}

/// Tabular form of one or more members: column names plus value rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvData {
    fields: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl CsvData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten one member.
    pub fn from_member(member: &StateData) -> Self {
        Self::from_pairs(member.iter(), None)
    }

    fn from_object(map: &Map<String, Value>, parent: &str) -> Self {
        Self::from_pairs(map.iter().map(|(k, v)| (k.as_str(), v)), Some(parent))
    }

    fn from_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a Value)>, parent: Option<&str>) -> Self {
        let mut data = Self::new();
        for (name, value) in pairs {
            let field = match parent {
                Some(parent) => format!("{parent}.{name}"),
                None => name.to_string(),
            };
            match value {
                Value::Object(map) => data.expand(Self::from_object(map, &field)),
                Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                    let mut collection = Self::new();
                    for item in items.iter().filter_map(Value::as_object) {
                        collection.append(Self::from_object(item, &field));
                    }
                    data.expand(collection);
                }
                _ => data.push_terminal(field, value.clone()),
            }
        }
        data
    }

    /// Add a column holding `value` in every row.
    fn push_terminal(&mut self, field: String, value: Value) {
        self.fields.push(field);
        if self.rows.is_empty() {
            self.rows.push(vec![value]);
        } else {
            for row in &mut self.rows {
                row.push(value.clone());
            }
        }
    }

    /// Add `other`'s columns, pairing every existing row with every row of
    /// `other`.
    pub fn expand(&mut self, other: CsvData) {
        if other.fields.is_empty() {
            return;
        }
        if self.rows.is_empty() {
            self.rows = other.rows;
        } else {
            let mut rows = Vec::with_capacity(self.rows.len() * other.rows.len());
            for left in &self.rows {
                for right in &other.rows {
                    let mut row = left.clone();
                    row.extend(right.iter().cloned());
                    rows.push(row);
                }
            }
            self.rows = rows;
        }
        self.fields.extend(other.fields);
    }

    /// Add `other`'s rows below the existing ones.
    ///
    /// Columns are matched by name; a column missing on either side is
    /// `null` in the rows that lack it.
    pub fn append(&mut self, other: CsvData) {
        if self.fields.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }
        for field in &other.fields {
            if !self.fields.contains(field) {
                self.fields.push(field.clone());
                for row in &mut self.rows {
                    row.push(Value::Null);
                }
            }
        }
        let positions: HashMap<&str, usize> = self
            .fields
            .iter()
            .enumerate()
            .map(|(idx, field)| (field.as_str(), idx))
            .collect();
        for row in other.rows {
            let mut aligned = vec![Value::Null; self.fields.len()];
            for (field, value) in other.fields.iter().zip(row) {
                if let Some(&idx) = positions.get(field.as_str()) {
                    aligned[idx] = value;
                }
            }
            self.rows.push(aligned);
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Writes members as a CSV document.
#[derive(Debug, Clone, Default)]
pub struct CsvGenerator {
    dialect: CsvDialect,
}

impl CsvGenerator {
    pub fn new(dialect: CsvDialect) -> Self {
        Self { dialect }
    }

    /// Header plus one or more rows per member; no members, no output.
    pub fn generate(&self, members: &[StateData]) -> String {
        let mut data = CsvData::new();
        for member in members {
            data.append(CsvData::from_member(member));
        }
        self.write(&data)
    }

    pub fn write(&self, data: &CsvData) -> String {
        let mut out = String::new();
        if data.is_empty() {
            return out;
        }
        let header: Vec<String> = data.fields.iter().map(|f| self.quoted(f)).collect();
        self.write_record(&mut out, &header);
        for row in &data.rows {
            let cells: Vec<String> = row.iter().map(|v| self.cell(v)).collect();
            self.write_record(&mut out, &cells);
        }
        debug!(rows = data.len(), columns = data.fields.len(), "generated CSV");
        out
    }

    fn write_record(&self, out: &mut String, cells: &[String]) {
        // A lone empty cell would be a blank line, which readers skip.
        if matches!(cells, [cell] if cell.is_empty()) {
            out.push(self.dialect.quote);
            out.push(self.dialect.quote);
            out.push_str(&self.dialect.line_terminator);
            return;
        }
        for (idx, cell) in cells.iter().enumerate() {
            if idx > 0 {
                out.push(self.dialect.delimiter);
            }
            out.push_str(cell);
        }
        out.push_str(&self.dialect.line_terminator);
    }

    fn cell(&self, value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.quoted(s),
            Value::Array(_) | Value::Object(_) => self.quoted(&value.to_string()),
        }
    }

    fn quoted(&self, text: &str) -> String {
        let quote = self.dialect.quote;
        let mut out = String::with_capacity(text.len() + 2);
        out.push(quote);
        for c in text.chars() {
            if c == quote {
                out.push(quote);
            }
            out.push(c);
        }
        out.push(quote);
        out
    }
}

/// One raw cell as read from the document.
#[derive(Debug, Default)]
struct RawCell {
    text: String,
    quoted: bool,
}

/// One record and the line it starts on.
struct RawRecord {
    line: usize,
    cells: Vec<RawCell>,
}

impl RawRecord {
    fn is_blank(&self) -> bool {
        matches!(self.cells.as_slice(), [cell] if cell.text.is_empty() && !cell.quoted)
    }
}

/// Reads CSV documents back into member snapshots.
#[derive(Debug, Clone)]
pub struct CsvParser {
    attributes: BTreeSet<String>,
    dialect: CsvDialect,
}

impl CsvParser {
    /// Parser accepting the given column names.
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
            dialect: CsvDialect::default(),
        }
    }

    pub fn with_dialect(mut self, dialect: CsvDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }

    /// One member per data row; the first record is the header.
    pub fn parse(&self, text: &str) -> Result<Vec<StateData>, CsvError> {
        let mut records = self.records(text)?.into_iter().filter(|r| !r.is_blank());
        let Some(header) = records.next() else {
            return Ok(Vec::new());
        };

        let header: Vec<String> = header.cells.into_iter().map(|c| c.text).collect();
        if let Some(field) = header.iter().find(|f| !self.attributes.contains(f.as_str())) {
            return Err(CsvError::InvalidField { field: field.clone() });
        }

        let mut members = Vec::new();
        for record in records {
            if record.cells.len() != header.len() {
                return Err(CsvError::InvalidRowLength {
                    line: record.line,
                    found: record.cells.len(),
                    expected: header.len(),
                });
            }
            let mut member = StateData::new();
            for (field, cell) in header.iter().zip(record.cells) {
                member.insert(field.clone(), cell_value(cell, record.line)?);
            }
            members.push(member);
        }
        debug!(members = members.len(), "parsed CSV");
        Ok(members)
    }

    fn records(&self, text: &str) -> Result<Vec<RawRecord>, CsvError> {
        let CsvDialect { delimiter, quote, .. } = self.dialect;
        let mut records = Vec::new();
        let mut cells = Vec::new();
        let mut cell = RawCell::default();
        let mut in_quotes = false;
        let mut line = 1;
        let mut record_line = 1;
        let mut quote_line = 1;

        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quotes {
                if c == quote {
                    if chars.peek() == Some(&quote) {
                        chars.next();
                        cell.text.push(quote);
                    } else {
                        in_quotes = false;
                    }
                } else {
                    if c == '\n' {
                        line += 1;
                    }
                    cell.text.push(c);
                }
                continue;
            }

            if c == quote && cell.text.is_empty() && !cell.quoted {
                in_quotes = true;
                cell.quoted = true;
                quote_line = line;
            } else if c == delimiter {
                cells.push(std::mem::take(&mut cell));
            } else if c == '\r' && chars.peek() == Some(&'\n') {
                // Handled with the '\n'.
            } else if c == '\n' || c == '\r' {
                cells.push(std::mem::take(&mut cell));
                records.push(RawRecord {
                    line: record_line,
                    cells: std::mem::take(&mut cells),
                });
                line += 1;
                record_line = line;
            } else {
                cell.text.push(c);
            }
        }

        if in_quotes {
            return Err(CsvError::UnterminatedQuote { line: quote_line });
        }
        if !cells.is_empty() || !cell.text.is_empty() || cell.quoted {
            cells.push(cell);
            records.push(RawRecord {
                line: record_line,
                cells,
            });
        }
        Ok(records)
    }
}

/// Quoted cells are strings; bare cells are numbers or booleans. Empty cells
/// of either kind read as `null`.
fn cell_value(cell: RawCell, line: usize) -> Result<Value, CsvError> {
    if cell.text.is_empty() {
        return Ok(Value::Null);
    }
    if cell.quoted {
        return Ok(Value::String(cell.text));
    }
    let text = cell.text.trim();
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Ok(Value::from(n));
    }
    let invalid = || CsvError::InvalidValue {
        line,
        value: cell.text.clone(),
    };
    let float = text.parse::<f64>().map_err(|_| invalid())?;
    if float.fract() == 0.0 && float >= i64::MIN as f64 && float <= i64::MAX as f64 {
        return Ok(Value::from(float as i64));
    }
    Number::from_f64(float).map(Value::Number).ok_or_else(invalid)
}

/// CSV representer: a generator and a parser sharing one dialect.
#[derive(Debug, Clone)]
pub struct CsvRepresenter {
    generator: CsvGenerator,
    parser: CsvParser,
}

impl CsvRepresenter {
    /// Representer whose parser accepts `attributes` as columns.
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            generator: CsvGenerator::default(),
            parser: CsvParser::new(attributes),
        }
    }

    pub fn with_dialect(self, dialect: CsvDialect) -> Self {
        Self {
            generator: CsvGenerator::new(dialect.clone()),
            parser: self.parser.with_dialect(dialect),
        }
    }

    pub fn generator(&self) -> &CsvGenerator {
        &self.generator
    }

    pub fn parser(&self) -> &CsvParser {
        &self.parser
    }
}

impl Representer for CsvRepresenter {
    type Error = CsvError;

    const CONTENT_TYPE: &'static str = "text/csv";

    fn represent(&self, members: &[StateData]) -> Result<String, CsvError> {
        Ok(self.generator.generate(members))
    }

    fn parse(&self, text: &str) -> Result<Vec<StateData>, CsvError> {
        self.parser.parse(text)
    }
}
