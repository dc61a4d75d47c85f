use shared::DementiaStage;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelTableError {
    #[error("expected {expected} classes, metadata lists {found}")]
    WrongClassCount { expected: usize, found: usize },
    #[error("unknown class name in metadata: {0}")]
    UnknownClass(String),
    #[error("class index {0} is out of range")]
    IndexOutOfRange(usize),
    #[error("class index {0} is assigned twice")]
    DuplicateIndex(usize),
    #[error("stage {0} is listed twice")]
    DuplicateStage(DementiaStage),
}

/// Maps model output positions to stages. The only index↔label table in the service;
/// it is always built from the model's training metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    by_index: [DementiaStage; DementiaStage::COUNT],
}

impl LabelTable {
    /// Builds the table from a Keras-style `class_indices` mapping. Names may be training
    /// keys (`NonDemented`) or clinical labels (`Non-Demented`).
    pub fn from_class_indices(
        class_indices: &BTreeMap<String, usize>,
    ) -> Result<Self, LabelTableError> {
        if class_indices.len() != DementiaStage::COUNT {
            return Err(LabelTableError::WrongClassCount {
                expected: DementiaStage::COUNT,
                found: class_indices.len(),
            });
        }

        let mut slots: [Option<DementiaStage>; DementiaStage::COUNT] = [None; DementiaStage::COUNT];
        for (name, &index) in class_indices {
            let stage = DementiaStage::from_str(name.trim())
                .map_err(|_| LabelTableError::UnknownClass(name.clone()))?;
            if index >= DementiaStage::COUNT {
                return Err(LabelTableError::IndexOutOfRange(index));
            }
            if slots.contains(&Some(stage)) {
                return Err(LabelTableError::DuplicateStage(stage));
            }
            if slots[index].is_some() {
                return Err(LabelTableError::DuplicateIndex(index));
            }
            slots[index] = Some(stage);
        }

        // Four distinct in-range indices fill every slot.
        let mut by_index = [DementiaStage::NonDemented; DementiaStage::COUNT];
        for (index, slot) in slots.iter().enumerate() {
            by_index[index] = slot.ok_or(LabelTableError::WrongClassCount {
                expected: DementiaStage::COUNT,
                found: index,
            })?;
        }
        Ok(Self { by_index })
    }

    pub fn stage_at(&self, index: usize) -> Option<DementiaStage> {
        self.by_index.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, DementiaStage)> + '_ {
        self.by_index.iter().copied().enumerate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn builds_from_keras_class_indices() {
        let table = LabelTable::from_class_indices(&indices(&[
            ("MildDemented", 0),
            ("ModerateDemented", 1),
            ("NonDemented", 2),
            ("VeryMildDemented", 3),
        ]))
        .unwrap();

        assert_eq!(table.stage_at(0), Some(DementiaStage::MildDemented));
        assert_eq!(table.stage_at(1), Some(DementiaStage::ModerateDemented));
        assert_eq!(table.stage_at(2), Some(DementiaStage::NonDemented));
        assert_eq!(table.stage_at(3), Some(DementiaStage::VeryMildDemented));
        assert_eq!(table.stage_at(4), None);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn accepts_clinical_labels() {
        let table = LabelTable::from_class_indices(&indices(&[
            ("Non-Demented", 0),
            ("Very Mild Demented", 1),
            ("Mild Demented", 2),
            ("Moderate Demented", 3),
        ]))
        .unwrap();
        let order: Vec<DementiaStage> = table.iter().map(|(_, s)| s).collect();
        assert_eq!(order, DementiaStage::all());
    }

    #[test]
    fn rejects_malformed_tables() {
        let missing = indices(&[("MildDemented", 0), ("NonDemented", 1), ("VeryMildDemented", 2)]);
        assert_eq!(
            LabelTable::from_class_indices(&missing),
            Err(LabelTableError::WrongClassCount {
                expected: 4,
                found: 3
            })
        );

        let unknown = indices(&[
            ("MildDemented", 0),
            ("ModerateDemented", 1),
            ("NonDemented", 2),
            ("SevereDemented", 3),
        ]);
        assert_eq!(
            LabelTable::from_class_indices(&unknown),
            Err(LabelTableError::UnknownClass("SevereDemented".to_string()))
        );

        let duplicate_index = indices(&[
            ("MildDemented", 0),
            ("ModerateDemented", 0),
            ("NonDemented", 2),
            ("VeryMildDemented", 3),
        ]);
        assert_eq!(
            LabelTable::from_class_indices(&duplicate_index),
            Err(LabelTableError::DuplicateIndex(0))
        );

        let out_of_range = indices(&[
            ("MildDemented", 0),
            ("ModerateDemented", 1),
            ("NonDemented", 2),
            ("VeryMildDemented", 7),
        ]);
        assert_eq!(
            LabelTable::from_class_indices(&out_of_range),
            Err(LabelTableError::IndexOutOfRange(7))
        );

        let duplicate_stage = indices(&[
            ("MildDemented", 0),
            ("Mild Demented", 1),
            ("NonDemented", 2),
            ("VeryMildDemented", 3),
        ]);
        assert_eq!(
            LabelTable::from_class_indices(&duplicate_stage),
            Err(LabelTableError::DuplicateStage(DementiaStage::MildDemented))
        );
    }
}
