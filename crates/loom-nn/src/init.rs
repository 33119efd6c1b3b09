use serde::{Deserialize, Serialize};

/// How weight matrices are scaled at construction.
///
/// The scale is the standard deviation of the normal samples and depends on
/// the fan-in `n` of the matrix (its row count).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightInit {
    /// Fixed standard deviation.
    Std(f64),
    /// `1 / sqrt(n)`
    #[default]
    Xavier,
    /// `sqrt(2 / n)`
    He,
}

impl WeightInit {
    pub fn scale(&self, fan_in: usize) -> f64 {
        let n = fan_in.max(1) as f64;
        match *self {
            WeightInit::Std(std) => std,
            WeightInit::Xavier => 1.0 / n.sqrt(),
            WeightInit::He => (2.0 / n).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales() {
        assert_eq!(WeightInit::Std(0.01).scale(100), 0.01);
        assert!((WeightInit::Xavier.scale(4) - 0.5).abs() < 1e-12);
        assert!((WeightInit::He.scale(8) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn serde_names() {
        let json = serde_json::to_string(&WeightInit::He).unwrap();
        assert_eq!(json, "\"he\"");
        let parsed: WeightInit = serde_json::from_str("{\"std\":0.1}").unwrap();
        assert_eq!(parsed, WeightInit::Std(0.1));
    }
}
