use crate::RetryWindow;
use std::fmt;

/// Attempt-count ranges of the retry histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AttemptBucket {
    One,
    Two,
    Three,
    FourToFive,
    SixToTen,
    ElevenToTwenty,
    TwentyOnePlus,
}

impl AttemptBucket {
    /// Every bucket, in ascending order.
    pub const ALL: [AttemptBucket; 7] = [
        AttemptBucket::One,
        AttemptBucket::Two,
        AttemptBucket::Three,
        AttemptBucket::FourToFive,
        AttemptBucket::SixToTen,
        AttemptBucket::ElevenToTwenty,
        AttemptBucket::TwentyOnePlus,
    ];

    /// The bucket `attempts` falls into. Zero counts as one attempt.
    pub fn for_attempts(attempts: u32) -> Self {
        match attempts {
            0 | 1 => AttemptBucket::One,
            2 => AttemptBucket::Two,
            3 => AttemptBucket::Three,
            4..=5 => AttemptBucket::FourToFive,
            6..=10 => AttemptBucket::SixToTen,
            11..=20 => AttemptBucket::ElevenToTwenty,
            _ => AttemptBucket::TwentyOnePlus,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttemptBucket::One => "1",
            AttemptBucket::Two => "2",
            AttemptBucket::Three => "3",
            AttemptBucket::FourToFive => "4-5",
            AttemptBucket::SixToTen => "6-10",
            AttemptBucket::ElevenToTwenty => "11-20",
            AttemptBucket::TwentyOnePlus => "21+",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AttemptBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Distribution of attempts per closed retry window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryHistogram {
    counts: [u64; 7],
}

impl RetryHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one window with `attempts` attempts.
    pub fn record(&mut self, attempts: u32) {
        self.counts[AttemptBucket::for_attempts(attempts).index()] += 1;
    }

    pub fn record_window(&mut self, window: &RetryWindow) {
        self.record(window.attempt_count);
    }

    pub fn count(&self, bucket: AttemptBucket) -> u64 {
        self.counts[bucket.index()]
    }

    /// Count per bucket, in bucket order.
    pub fn distribution(&self) -> Vec<(AttemptBucket, u64)> {
        AttemptBucket::ALL
            .iter()
            .map(|&bucket| (bucket, self.count(bucket)))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Share of windows per bucket, as percentages. All zero when empty.
    pub fn percentages(&self) -> Vec<(AttemptBucket, f64)> {
        let total = self.total();
        AttemptBucket::ALL
            .iter()
            .map(|&bucket| {
                let pct = if total == 0 {
                    0.0
                } else {
                    self.count(bucket) as f64 / total as f64 * 100.0
                };
                (bucket, pct)
            })
            .collect()
    }
}
