use crate::classifier::Classification;

/// Position of a transaction in the SMTP dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Connected,
    Greeted,
    SenderKnown,
    RecipientKnown,
    HeadersReceived,
    BodyReceived,
    Closed,
}

/// Per-transaction state.
///
/// The classification is written at most once (header stage) and handed out
/// at most once (body stage), so a transaction can never be decorated twice.
#[derive(Debug, Clone)]
pub struct Session {
    stage: Stage,
    classification: Classification,
    classified: bool,
    decorated: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session {
            stage: Stage::Connected,
            classification: Classification::NoMatch,
            classified: false,
            decorated: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance(&mut self, stage: Stage) {
        if stage < self.stage {
            log::debug!("Stage {:?} arrived after {:?}", stage, self.stage);
        }
        self.stage = stage;
    }

    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    pub fn is_classified(&self) -> bool {
        self.classified
    }

    pub fn is_decorated(&self) -> bool {
        self.decorated
    }

    /// Stores the result of the header stage. Returns false when this
    /// transaction was already classified; the first result is kept.
    pub fn set_classification(&mut self, classification: Classification) -> bool {
        if self.classified {
            return false;
        }
        self.classification = classification;
        self.classified = true;
        true
    }

    /// Hands out the stored classification once, leaving `NoMatch` behind.
    pub fn take_classification(&mut self) -> Classification {
        std::mem::take(&mut self.classification)
    }

    pub fn mark_decorated(&mut self) {
        self.decorated = true;
    }
}
