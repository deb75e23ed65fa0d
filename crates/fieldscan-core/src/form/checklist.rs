//! Yes/no confirmation checks.
//!
//! The operator confirms the photo and each record field against the
//! vehicle in front of them. The note summarising the answers is stored
//! with the transaction.
use super::FormError;

/// One confirmation the operator must answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    Photo,
    DriverName,
    Plate,
    FleetNumber,
    Vehicle,
}

impl Check {
    /// Every check, in display and column order.
    pub const ALL: [Check; 5] = [
        Check::Photo,
        Check::DriverName,
        Check::Plate,
        Check::FleetNumber,
        Check::Vehicle,
    ];

    /// Identifier used in notes and by the backend sheet.
    pub fn id(self) -> &'static str {
        match self {
            Self::Photo => "foto",
            Self::DriverName => "nama",
            Self::Plate => "nopol",
            Self::FleetNumber => "nolambung",
            Self::Vehicle => "kendaraan",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checklist {
    answers: [Option<bool>; 5],
}

impl Checklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, check: Check, answer: bool) {
        self.answers[check.index()] = Some(answer);
    }

    pub fn answer(&self, check: Check) -> Option<bool> {
        self.answers[check.index()]
    }

    pub fn unanswered(&self) -> Vec<Check> {
        Check::ALL
            .into_iter()
            .filter(|c| self.answer(*c).is_none())
            .collect()
    }

    pub fn all_answered(&self) -> bool {
        self.answers.iter().all(Option::is_some)
    }

    /// `Ok` once every check has an answer; gates the quantity step.
    pub fn ensure_complete(&self) -> Result<(), FormError> {
        let missing = self.unanswered();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FormError::UnansweredChecks(missing))
        }
    }

    /// Overall verdict: every check confirmed.
    pub fn passed(&self) -> bool {
        self.answers.iter().all(|a| *a == Some(true))
    }

    /// Human-readable summary. Unanswered checks count as false.
    pub fn note(&self) -> String {
        let (yes, no): (Vec<Check>, Vec<Check>) = Check::ALL
            .into_iter()
            .partition(|c| self.answer(*c) == Some(true));

        if no.is_empty() {
            return "All true".into();
        }
        if yes.is_empty() {
            return "All false".into();
        }
        format!(
            "{} True ({}) - {} False ({})",
            yes.len(),
            join_ids(&yes),
            no.len(),
            join_ids(&no)
        )
    }

    pub fn clear(&mut self) {
        self.answers = [None; 5];
    }
}

fn join_ids(checks: &[Check]) -> String {
    checks.iter().map(|c| c.id()).collect::<Vec<_>>().join(", ")
}
