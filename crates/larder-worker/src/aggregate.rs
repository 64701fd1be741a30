use serde::Deserialize;
use serde_json::Value;

/// The fields of a batch record that feed the valuation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub stock: f64,
    #[serde(default)]
    pub is_active: bool,
}

impl BatchRecord {
    pub fn contribution(&self) -> f64 {
        if self.is_active && self.stock > 0.0 {
            round2(self.cost * self.stock)
        } else {
            0.0
        }
    }
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Running state of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tally {
    pub processed: u64,
    pub value: f64,
    /// Records whose fields had the wrong JSON type; counted, never valued.
    pub malformed: u64,
}

impl Tally {
    pub fn record(&mut self, value: &Value) {
        self.processed += 1;
        match BatchRecord::deserialize(value) {
            Ok(batch) => {
                let contribution = batch.contribution();
                if contribution.is_finite() {
                    self.value += contribution;
                }
            }
            Err(_) => self.malformed += 1,
        }
    }

    pub fn current_value(&self) -> f64 {
        round2(self.value)
    }
}
