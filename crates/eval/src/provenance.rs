//! Read tracking for evaluation results.
//!
//! Each evaluation can report which fields it actually read, which is
//! narrower than the formula's static reference set when short-circuiting
//! skips a branch.

/// Collector that records field reads during evaluation, in first-read
/// order and without duplicates.
#[derive(Debug, Clone, Default)]
pub struct ReadCollector {
    pub fields_read: Vec<String>,
}

impl ReadCollector {
    pub fn new() -> Self {
        ReadCollector::default()
    }

    pub fn record_field(&mut self, field_id: &str) {
        if !self.fields_read.iter().any(|f| f == field_id) {
            self.fields_read.push(field_id.to_owned());
        }
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields_read
    }
}
