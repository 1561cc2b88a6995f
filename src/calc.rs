use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("invalid band configuration: {0}")]
    InvalidBandConfiguration(String),
}

impl CalcError {
    pub fn code(&self) -> &'static str {
        match self {
            CalcError::InvalidBandConfiguration(_) => "invalid_band_configuration",
        }
    }
}

/// One graded piece of work. Ungraded work never becomes a `GradedItem`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedItem {
    pub score: f64,
    pub max_score: f64,
    pub date: Option<NaiveDate>,
    pub group_key: String,
}

impl GradedItem {
    pub fn percentage(&self) -> f64 {
        if self.max_score > 0.0 {
            100.0 * self.score / self.max_score
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBand {
    pub label: String,
    pub min: f64,
    pub max: f64,
}

impl ScoreBand {
    pub fn new(label: &str, min: f64, max: f64) -> Self {
        Self {
            label: label.to_string(),
            min,
            max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandCount {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub period: String,
    pub average: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAverage {
    pub key: String,
    pub average: f64,
    pub count: usize,
    pub letter: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub count: usize,
    pub average: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    pub letter: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodGranularity {
    Day,
    Week,
    Month,
}

impl PeriodGranularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Sortable period key: `YYYY-MM-DD`, ISO `YYYY-Www` or `YYYY-MM`.
    pub fn key(self, date: NaiveDate) -> String {
        match self {
            Self::Day => date.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let w = date.iso_week();
                format!("{:04}-W{:02}", w.year(), w.week())
            }
            Self::Month => date.format("%Y-%m").to_string(),
        }
    }

    pub fn period_of(self, item: &GradedItem) -> Option<String> {
        item.date.map(|d| self.key(d))
    }
}

pub fn standard_bands() -> Vec<ScoreBand> {
    vec![
        ScoreBand::new("90-100", 90.0, 100.0),
        ScoreBand::new("80-89", 80.0, 89.0),
        ScoreBand::new("70-79", 70.0, 79.0),
        ScoreBand::new("60-69", 60.0, 69.0),
        ScoreBand::new("0-59", 0.0, 59.0),
    ]
}

/// Checks that `bands` partition `[0, 100]` at whole-point granularity and returns them
/// ordered from highest to lowest.
pub fn validate_bands(bands: &[ScoreBand]) -> Result<Vec<ScoreBand>, CalcError> {
    let bad = |m: String| -> Result<Vec<ScoreBand>, CalcError> {
        Err(CalcError::InvalidBandConfiguration(m))
    };
    if bands.is_empty() {
        return bad("at least one band is required".into());
    }
    for b in bands {
        if !b.min.is_finite() || !b.max.is_finite() {
            return bad(format!("band {} has a non-finite bound", b.label));
        }
        if b.min > b.max {
            return bad(format!("band {} has min greater than max", b.label));
        }
        if b.min < 0.0 || b.max > 100.0 {
            return bad(format!("band {} lies outside 0..=100", b.label));
        }
    }
    let mut sorted = bands.to_vec();
    sorted.sort_by(|a, b| b.min.partial_cmp(&a.min).unwrap_or(Ordering::Equal));

    if sorted[0].max < 100.0 {
        return bad("bands must reach 100".into());
    }
    if sorted[sorted.len() - 1].min > 0.0 {
        return bad("bands must start at 0".into());
    }
    for pair in sorted.windows(2) {
        let (hi, lo) = (&pair[0], &pair[1]);
        if lo.max >= hi.min {
            return bad(format!("bands {} and {} overlap", hi.label, lo.label));
        }
        if hi.min > lo.max + 1.0 {
            return bad(format!("gap between bands {} and {}", lo.label, hi.label));
        }
    }
    Ok(sorted)
}

pub fn average(items: &[GradedItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    items.iter().map(GradedItem::percentage).sum::<f64>() / items.len() as f64
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

pub fn summarize(items: &[GradedItem]) -> GradeSummary {
    let mut pcts: Vec<f64> = items.iter().map(GradedItem::percentage).collect();
    let avg = average(items);
    let min = pcts.iter().copied().reduce(f64::min);
    let max = pcts.iter().copied().reduce(f64::max);
    GradeSummary {
        count: items.len(),
        average: avg,
        min,
        max,
        median: median(&mut pcts),
        letter: if items.is_empty() {
            None
        } else {
            Some(letter_grade(avg))
        },
    }
}

/// Counts items per band, in the order `bands` are given. Expects bands that passed
/// `validate_bands`; an item lands in the highest band whose `min` it reaches.
pub fn distribution(items: &[GradedItem], bands: &[ScoreBand]) -> Vec<BandCount> {
    let mut by_min: Vec<usize> = (0..bands.len()).collect();
    by_min.sort_by(|&a, &b| {
        bands[b]
            .min
            .partial_cmp(&bands[a].min)
            .unwrap_or(Ordering::Equal)
    });

    let mut counts = vec![0usize; bands.len()];
    for item in items {
        let pct = item.percentage().clamp(0.0, 100.0);
        if let Some(&idx) = by_min.iter().find(|&&i| pct >= bands[i].min) {
            counts[idx] += 1;
        }
    }

    let total = items.len();
    bands
        .iter()
        .zip(counts)
        .map(|(band, count)| BandCount {
            label: band.label.clone(),
            min: band.min,
            max: band.max,
            count,
            percentage: if total > 0 {
                100.0 * count as f64 / total as f64
            } else {
                0.0
            },
        })
        .collect()
}

/// Per-period averages in ascending period order. Items with no period are skipped.
pub fn trend<F>(items: &[GradedItem], period_key: F) -> Vec<TrendPoint>
where
    F: Fn(&GradedItem) -> Option<String>,
{
    let mut groups: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for item in items {
        let Some(period) = period_key(item) else {
            continue;
        };
        let entry = groups.entry(period).or_insert((0.0, 0));
        entry.0 += item.percentage();
        entry.1 += 1;
    }
    groups
        .into_iter()
        .map(|(period, (sum, count))| TrendPoint {
            period,
            average: sum / count as f64,
            count,
        })
        .collect()
}

pub fn group_averages(items: &[GradedItem]) -> Vec<GroupAverage> {
    let mut groups: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for item in items {
        let entry = groups.entry(item.group_key.as_str()).or_insert((0.0, 0));
        entry.0 += item.percentage();
        entry.1 += 1;
    }
    groups
        .into_iter()
        .map(|(key, (sum, count))| {
            let avg = sum / count as f64;
            GroupAverage {
                key: key.to_string(),
                average: avg,
                count,
                letter: letter_grade(avg),
            }
        })
        .collect()
}

const LETTER_THRESHOLDS: [(f64, &str); 12] = [
    (97.0, "A+"),
    (93.0, "A"),
    (90.0, "A-"),
    (87.0, "B+"),
    (83.0, "B"),
    (80.0, "B-"),
    (77.0, "C+"),
    (73.0, "C"),
    (70.0, "C-"),
    (67.0, "D+"),
    (63.0, "D"),
    (60.0, "D-"),
];

/// Out-of-range input is clamped to `[0, 100]`.
pub fn letter_grade(percentage: f64) -> &'static str {
    let pct = percentage.clamp(0.0, 100.0);
    LETTER_THRESHOLDS
        .iter()
        .find(|(min, _)| pct >= *min)
        .map(|(_, letter)| *letter)
        .unwrap_or("F")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pct: f64, date: Option<&str>, key: &str) -> GradedItem {
        GradedItem {
            score: pct,
            max_score: 100.0,
            date: date.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").expect("date")),
            group_key: key.to_string(),
        }
    }

    fn pcts(values: &[f64]) -> Vec<GradedItem> {
        values.iter().map(|v| item(*v, None, "g")).collect()
    }

    #[test]
    fn standard_band_example() {
        let items = pcts(&[95.0, 82.0, 71.0, 55.0]);
        let dist = distribution(&items, &standard_bands());
        let counts: Vec<usize> = dist.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 1, 0, 1]);
        let shares: Vec<f64> = dist.iter().map(|b| b.percentage).collect();
        assert_eq!(shares, vec![25.0, 25.0, 25.0, 0.0, 25.0]);
        assert!((average(&items) - 75.75).abs() < 1e-9);
    }

    #[test]
    fn distribution_totals_hold() {
        let items = pcts(&[100.0, 99.9, 89.5, 60.0, 59.99, 0.0, 33.3]);
        let dist = distribution(&items, &standard_bands());
        assert_eq!(dist.iter().map(|b| b.count).sum::<usize>(), items.len());
        let total: f64 = dist.iter().map(|b| b.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
        // 89.5 sits between 80-89 and 90-100 and belongs to the lower band.
        assert_eq!(dist[1].count, 1);
    }

    #[test]
    fn empty_input_behavior() {
        assert_eq!(average(&[]), 0.0);
        let dist = distribution(&[], &standard_bands());
        assert!(dist.iter().all(|b| b.count == 0 && b.percentage == 0.0));
        assert!(trend(&[], |_| Some("x".to_string())).is_empty());
        let s = summarize(&[]);
        assert_eq!(s.count, 0);
        assert_eq!(s.min, None);
        assert_eq!(s.letter, None);
    }

    #[test]
    fn percentages_use_max_score() {
        let items = vec![
            GradedItem {
                score: 45.0,
                max_score: 50.0,
                date: None,
                group_key: "quiz".into(),
            },
            GradedItem {
                score: 7.0,
                max_score: 10.0,
                date: None,
                group_key: "essay".into(),
            },
        ];
        assert!((average(&items) - 80.0).abs() < 1e-9);
        let groups = group_averages(&items);
        assert_eq!(groups[0].key, "essay");
        assert_eq!(groups[1].letter, "A-");
    }

    #[test]
    fn trend_groups_by_month_in_order() {
        let items = vec![
            item(80.0, Some("2026-03-04"), "a"),
            item(60.0, Some("2026-01-20"), "a"),
            item(100.0, Some("2026-03-28"), "a"),
            item(50.0, None, "a"),
        ];
        let points = trend(&items, |i| PeriodGranularity::Month.period_of(i));
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].period, "2026-01");
        assert_eq!(points[1].period, "2026-03");
        assert_eq!(points[1].count, 2);
        assert!((points[1].average - 90.0).abs() < 1e-9);
    }

    #[test]
    fn week_keys_are_iso_and_sortable() {
        let d = NaiveDate::from_ymd_opt(2027, 1, 1).expect("date");
        assert_eq!(PeriodGranularity::Week.key(d), "2026-W53");
        let d = NaiveDate::from_ymd_opt(2026, 2, 3).expect("date");
        assert_eq!(PeriodGranularity::Week.key(d), "2026-W06");
        assert_eq!(PeriodGranularity::Day.key(d), "2026-02-03");
    }

    #[test]
    fn letter_grade_thresholds() {
        assert_eq!(letter_grade(97.0), "A+");
        assert_eq!(letter_grade(96.99), "A");
        assert_eq!(letter_grade(90.0), "A-");
        assert_eq!(letter_grade(87.0), "B+");
        assert_eq!(letter_grade(80.0), "B-");
        assert_eq!(letter_grade(72.0), "C-");
        assert_eq!(letter_grade(60.0), "D-");
        assert_eq!(letter_grade(59.9), "F");
        assert_eq!(letter_grade(150.0), "A+");
        assert_eq!(letter_grade(-5.0), "F");
    }

    #[test]
    fn band_validation() {
        assert!(validate_bands(&standard_bands()).is_ok());

        let gap = vec![
            ScoreBand::new("pass", 60.0, 100.0),
            ScoreBand::new("fail", 0.0, 50.0),
        ];
        let e = validate_bands(&gap).expect_err("gap");
        assert_eq!(e.code(), "invalid_band_configuration");

        let overlap = vec![
            ScoreBand::new("pass", 50.0, 100.0),
            ScoreBand::new("fail", 0.0, 50.0),
        ];
        assert!(validate_bands(&overlap).is_err());

        let mut beyond = standard_bands();
        beyond.push(ScoreBand::new("bonus", 101.0, 200.0));
        assert!(validate_bands(&beyond).is_err());
        let below = vec![
            ScoreBand::new("pass", 50.0, 100.0),
            ScoreBand::new("fail", -10.0, 49.0),
        ];
        assert!(validate_bands(&below).is_err());

        let short = vec![ScoreBand::new("most", 0.0, 95.0)];
        assert!(validate_bands(&short).is_err());
        assert!(validate_bands(&[]).is_err());

        let sorted = validate_bands(&[
            ScoreBand::new("fail", 0.0, 49.0),
            ScoreBand::new("pass", 50.0, 100.0),
        ])
        .expect("valid");
        assert_eq!(sorted[0].label, "pass");
    }

    #[test]
    fn summary_reports_median_and_extremes() {
        let s = summarize(&pcts(&[70.0, 90.0, 80.0, 100.0]));
        assert_eq!(s.count, 4);
        assert_eq!(s.min, Some(70.0));
        assert_eq!(s.max, Some(100.0));
        assert_eq!(s.median, Some(85.0));
        assert_eq!(s.letter, Some("B"));
    }
}
