//! Participant identity and session start stamp.

use std::collections::HashSet;

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Smallest identifier handed out.
pub const PARTICIPANT_ID_MIN: u32 = 100_000;
/// Largest identifier handed out (inclusive).
pub const PARTICIPANT_ID_MAX: u32 = 999_999;

/// Random six-digit participant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ParticipantId {
    /// Draw an identifier that is not in `existing`.
    ///
    /// Draws uniformly from the fixed range until an unused value turns up.
    /// Once more than half of the range is taken, the free values are
    /// enumerated and one is picked uniformly instead, so the draw stays
    /// bounded even for a nearly full range.
    pub fn assign<R: Rng + ?Sized>(existing: &HashSet<ParticipantId>, rng: &mut R) -> Result<Self> {
        let range_size = (PARTICIPANT_ID_MAX - PARTICIPANT_ID_MIN + 1) as usize;
        let used = existing
            .iter()
            .filter(|id| (PARTICIPANT_ID_MIN..=PARTICIPANT_ID_MAX).contains(&id.0))
            .count();

        if used >= range_size {
            return Err(Error::IdentityExhausted);
        }

        if used * 2 <= range_size {
            loop {
                let candidate =
                    ParticipantId(rng.random_range(PARTICIPANT_ID_MIN..=PARTICIPANT_ID_MAX));
                if !existing.contains(&candidate) {
                    return Ok(candidate);
                }
            }
        }

        let free: Vec<ParticipantId> = (PARTICIPANT_ID_MIN..=PARTICIPANT_ID_MAX)
            .map(ParticipantId)
            .filter(|id| !existing.contains(id))
            .collect();
        Ok(free[rng.random_range(0..free.len())])
    }
}

/// Date and time a session was opened, written on every output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStamp {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SessionStamp {
    pub fn now() -> Self {
        Self::from(Local::now())
    }

    /// `%Y-%m-%d`
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `%H:%M:%S`
    pub fn time_string(&self) -> String {
        self.time.format("%H:%M:%S").to_string()
    }
}

impl From<DateTime<Local>> for SessionStamp {
    fn from(at: DateTime<Local>) -> Self {
        let naive = at.naive_local();
        Self {
            date: naive.date(),
            time: naive.time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_assign_in_range() {
        let mut rng = SmallRng::seed_from_u64(7);
        let existing = HashSet::new();
        for _ in 0..1000 {
            let id = ParticipantId::assign(&existing, &mut rng).unwrap();
            assert!((PARTICIPANT_ID_MIN..=PARTICIPANT_ID_MAX).contains(&id.0));
        }
    }

    #[test]
    fn test_assign_avoids_existing() {
        let mut rng = SmallRng::seed_from_u64(11);
        let existing: HashSet<_> = (PARTICIPANT_ID_MIN..PARTICIPANT_ID_MIN + 1000)
            .map(ParticipantId)
            .collect();
        for _ in 0..1000 {
            let id = ParticipantId::assign(&existing, &mut rng).unwrap();
            assert!(!existing.contains(&id));
        }
    }

    #[test]
    fn test_assign_single_free_value() {
        let free = ParticipantId(543_210);
        let existing: HashSet<_> = (PARTICIPANT_ID_MIN..=PARTICIPANT_ID_MAX)
            .map(ParticipantId)
            .filter(|id| *id != free)
            .collect();
        for seed in 0..3 {
            let mut rng = SmallRng::seed_from_u64(seed);
            assert_eq!(ParticipantId::assign(&existing, &mut rng).unwrap(), free);
        }
    }

    #[test]
    fn test_assign_exhausted() {
        let existing: HashSet<_> = (PARTICIPANT_ID_MIN..=PARTICIPANT_ID_MAX)
            .map(ParticipantId)
            .collect();
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(matches!(
            ParticipantId::assign(&existing, &mut rng),
            Err(Error::IdentityExhausted)
        ));
    }

    #[test]
    fn test_stamp_formatting() {
        let stamp = SessionStamp {
            date: NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
            time: NaiveTime::from_hms_opt(9, 5, 30).unwrap(),
        };
        assert_eq!(stamp.date_string(), "2025-01-04");
        assert_eq!(stamp.time_string(), "09:05:30");
    }
}
