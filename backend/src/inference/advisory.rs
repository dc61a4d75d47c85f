use shared::DementiaStage;
use std::str::FromStr;

pub const FALLBACK_ADVICE: &str = "Consult with healthcare provider.";

pub fn advice_for(stage: DementiaStage) -> &'static str {
    match stage {
        DementiaStage::NonDemented => {
            "Patient shows no signs of cognitive impairment. Maintain regular cognitive health \
             practices: healthy diet, exercise, social engagement, mental stimulation."
        }
        DementiaStage::VeryMildDemented => {
            "Patient shows subtle cognitive changes. Recommend: Regular neurology check-ups, \
             cognitive exercises, memory training, lifestyle modifications."
        }
        DementiaStage::MildDemented => {
            "Patient shows noticeable cognitive decline. Recommend: Specialist neurology \
             consultation, cognitive behavioral therapy, family support, medication review."
        }
        DementiaStage::ModerateDemented => {
            "Patient shows significant cognitive and functional impairment. Recommend: Immediate \
             specialist care, comprehensive neuropsychological evaluation, care planning with \
             family, potential medication adjustment."
        }
    }
}

/// Guidance for a label string; unknown labels get the generic fallback.
pub fn advise(label: &str) -> &'static str {
    match DementiaStage::from_str(label.trim()) {
        Ok(stage) => advice_for(stage),
        Err(_) => FALLBACK_ADVICE,
    }
}
