use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled block on the planner grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerBlock {
    pub id: Uuid,
    pub title: String,
    pub date: NaiveDate,
    /// Minutes after midnight where the block starts.
    pub start_minute: u16,
    pub duration_min: u16,
    #[serde(default)]
    pub done: bool,
    pub updated_at: DateTime<Utc>,
}

impl PlannerBlock {
    pub fn new(title: impl Into<String>, date: NaiveDate, start_minute: u16, duration_min: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            date,
            start_minute,
            duration_min,
            done: false,
            updated_at: Utc::now(),
        }
    }

    pub fn end_minute(&self) -> u16 {
        self.start_minute.saturating_add(self.duration_min)
    }

    /// Whether two blocks on the same date overlap in time.
    pub fn overlaps(&self, other: &PlannerBlock) -> bool {
        self.date == other.date
            && self.start_minute < other.end_minute()
            && other.start_minute < self.end_minute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn overlap_same_day() {
        let a = PlannerBlock::new("Read", date(), 540, 60);
        let b = PlannerBlock::new("Review", date(), 570, 60);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn adjacent_blocks_do_not_overlap() {
        let a = PlannerBlock::new("Read", date(), 540, 60);
        let b = PlannerBlock::new("Review", date(), 600, 30);
        assert!(!a.overlaps(&b));
    }
}
