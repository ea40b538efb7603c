use serde::{Serialize, Serializer};
use std::fmt;

/// Chest X-ray findings the classifier distinguishes, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Normal,
    Covid19,
    Pneumonia,
}

impl Condition {
    pub const ALL: [Condition; 3] = [Condition::Normal, Condition::Covid19, Condition::Pneumonia];

    pub fn label(&self) -> &'static str {
        match self {
            Condition::Normal => "Normal",
            Condition::Covid19 => "COVID-19",
            Condition::Pneumonia => "Pneumonia",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Condition::Normal => 0,
            Condition::Covid19 => 1,
            Condition::Pneumonia => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}
