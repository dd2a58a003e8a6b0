//! Brewer telemetry schema and line classification.

use crate::config::TelemetryConfig;

/// What a single brewer line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// A well-formed row: one value per schema column after the first
    Sample(Vec<f64>),
    /// Non-empty chatter (firmware messages, partial rows, labels)
    Diagnostic,
    /// Nothing to process
    Empty,
}

/// Ordered, fixed-name telemetry columns. Column 0 holds the sample timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySchema {
    headers: Vec<String>,
    delimiter: char,
}

impl TelemetrySchema {
    /// Build a schema from column names
    pub fn new(headers: Vec<String>, delimiter: char) -> Self {
        Self { headers, delimiter }
    }

    /// Schema described by the brewer configuration
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.headers.clone(), config.delimiter)
    }

    /// Number of columns, timestamp included
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// True for a schema without columns
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// All column names
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Position of `name` within a sample's values
    pub fn value_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().skip(1).position(|h| h == name)
    }

    /// Classify one raw line.
    ///
    /// A sample needs exactly `len()` fields, no alphabetic character past field 0,
    /// and every value parseable as a float. Any other non-blank line is diagnostic.
    pub fn classify(&self, line: &str) -> LineKind {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return LineKind::Empty;
        }

        let fields: Vec<&str> = line.split(self.delimiter).collect();
        if fields.len() != self.headers.len() {
            return LineKind::Diagnostic;
        }

        let values = &fields[1..];
        if values
            .iter()
            .any(|field| field.chars().any(|c| c.is_ascii_alphabetic()))
        {
            return LineKind::Diagnostic;
        }

        let parsed: Result<Vec<f64>, _> = values.iter().map(|v| v.trim().parse::<f64>()).collect();
        match parsed {
            Ok(values) => LineKind::Sample(values),
            Err(_) => LineKind::Diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn six_field_schema() -> TelemetrySchema {
        TelemetrySchema::new(
            ["NOTES", "a", "b", "c", "d", "e"].map(String::from).to_vec(),
            ',',
        )
    }

    #[test]
    fn test_short_labelled_line_is_diagnostic() {
        assert_eq!(six_field_schema().classify("INFO,1,2,3"), LineKind::Diagnostic);
    }

    #[test]
    fn test_full_default_row_is_sample() {
        let schema = TelemetrySchema::from_config(&TelemetryConfig::default());
        let line = "1,10.0,20.0,0.1,15.0,199.0,5.0,5.0,195.0,50.0,5.0,0.0,0.0,12.0,1.0,195.0,8.0";
        let LineKind::Sample(values) = schema.classify(line) else {
            panic!("expected a sample");
        };
        assert_eq!(values.len(), 16);
        assert_eq!(values[0], 10.0);
        assert_eq!(values[4], 199.0);
        assert_eq!(values[15], 8.0);
    }

    #[test]
    fn test_label_in_field_zero_is_allowed() {
        assert_eq!(
            six_field_schema().classify("DATA,1,2,3,4,5\r"),
            LineKind::Sample(vec![1.0, 2.0, 3.0, 4.0, 5.0])
        );
    }

    #[test]
    fn test_letters_past_field_zero_reject() {
        assert_eq!(six_field_schema().classify("1,2,3,ERR,4,5"), LineKind::Diagnostic);
        // exponent notation contains a letter too
        assert_eq!(six_field_schema().classify("1,2,3,1e3,4,5"), LineKind::Diagnostic);
    }

    #[test]
    fn test_unparseable_numbers_are_diagnostic() {
        assert_eq!(six_field_schema().classify("1,2,3,1.2.3,4,5"), LineKind::Diagnostic);
        assert_eq!(six_field_schema().classify("1,2,3,,4,5"), LineKind::Diagnostic);
    }

    #[test]
    fn test_blank_lines_are_empty() {
        assert_eq!(six_field_schema().classify(""), LineKind::Empty);
        assert_eq!(six_field_schema().classify(" \r"), LineKind::Empty);
    }

    #[test]
    fn test_value_index() {
        let schema = six_field_schema();
        assert_eq!(schema.value_index("a"), Some(0));
        assert_eq!(schema.value_index("e"), Some(4));
        assert_eq!(schema.value_index("NOTES"), None);
    }
}
