use crate::{
    error::InferenceError,
    labels::Condition,
    math::{argmax, softmax},
};
use serde::{ser::SerializeMap, Serialize, Serializer};

/// Probability per [`Condition`], indexed in label order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    values: [f32; 3],
}

impl ClassProbabilities {
    pub fn from_logits(logits: &[f32]) -> Result<Self, InferenceError> {
        if logits.len() != Condition::ALL.len() {
            return Err(InferenceError::UnexpectedOutput(format!(
                "expected {} class logits, got {}",
                Condition::ALL.len(),
                logits.len()
            )));
        }
        if logits.iter().any(|x| !x.is_finite()) {
            return Err(InferenceError::UnexpectedOutput(format!(
                "non-finite class logits: {:?}",
                logits
            )));
        }

        let probs = softmax(logits);
        Ok(Self {
            values: [probs[0], probs[1], probs[2]],
        })
    }

    pub fn get(&self, condition: Condition) -> f32 {
        self.values[condition.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Condition, f32)> + '_ {
        Condition::ALL.iter().map(|&c| (c, self.values[c.index()]))
    }

    pub fn prediction(&self) -> Condition {
        argmax(&self.values)
            .and_then(Condition::from_index)
            .unwrap_or(Condition::Normal)
    }

    pub fn confidence(&self) -> f32 {
        self.get(self.prediction())
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (condition, probability) in self.iter() {
            map.serialize_entry(condition.label(), &probability)?;
        }
        map.end()
    }
}
