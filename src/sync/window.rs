//! Date window generation for chunked downloads.

use chrono::{Duration, NaiveDate};

use crate::types::DateRange;

/// Days per window.
pub const WINDOW_DAYS: i64 = 2;

/// One window of a chunked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
  /// Position in the download, starting at zero
  pub index: u32,
  pub range: DateRange,
}

impl DateWindow {
  pub fn label(&self) -> String {
    self.range.to_string()
  }
}

/// Lazily yields consecutive windows covering a range, in date order.
#[derive(Debug, Clone)]
pub struct Windows {
  next_start: NaiveDate,
  to: NaiveDate,
  span_days: i64,
  index: u32,
}

impl Iterator for Windows {
  type Item = DateWindow;

  fn next(&mut self) -> Option<Self::Item> {
    if self.next_start > self.to {
      return None;
    }

    let start = self.next_start;
    let end = (start + Duration::days(self.span_days - 1)).min(self.to);
    let window = DateWindow {
      index: self.index,
      range: DateRange::new(start, end),
    };

    self.next_start = end + Duration::days(1);
    self.index += 1;
    Some(window)
  }
}

/// Split `range` into windows of [`WINDOW_DAYS`], the last one clipped.
pub fn windows(range: DateRange) -> Windows {
  windows_with_span(range, WINDOW_DAYS)
}

pub fn windows_with_span(range: DateRange, span_days: i64) -> Windows {
  Windows {
    next_start: range.from,
    to: range.to,
    span_days: span_days.max(1),
    index: 0,
  }
}

/// Number of windows [`windows`] yields for `range`.
pub fn window_count(range: DateRange) -> u32 {
  let days = range.days();
  ((days + WINDOW_DAYS - 1) / WINDOW_DAYS) as u32
}

/// The window containing `date` when tiling forward from `anchor`, clipped
/// to `clip`. A date before the anchor gets a single-day window so it cannot
/// overlap windows that already exist.
pub fn window_containing(anchor: NaiveDate, date: NaiveDate, clip: NaiveDate) -> DateRange {
  if date < anchor {
    return DateRange::new(date, date);
  }

  let offset = (date - anchor).num_days() / WINDOW_DAYS * WINDOW_DAYS;
  let start = anchor + Duration::days(offset);
  let end = (start + Duration::days(WINDOW_DAYS - 1)).min(clip.max(date));
  DateRange::new(start, end)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  #[test]
  fn test_five_days_make_three_windows() {
    let got: Vec<DateRange> = windows(DateRange::new(d(2024, 1, 1), d(2024, 1, 5)))
      .map(|w| w.range)
      .collect();

    assert_eq!(
      got,
      vec![
        DateRange::new(d(2024, 1, 1), d(2024, 1, 2)),
        DateRange::new(d(2024, 1, 3), d(2024, 1, 4)),
        DateRange::new(d(2024, 1, 5), d(2024, 1, 5)),
      ]
    );
  }

  #[test]
  fn test_windows_tile_range_exactly() {
    let start = d(2023, 12, 20);
    for len in 0..40 {
      let range = DateRange::new(start, start + Duration::days(len));
      let all: Vec<DateWindow> = windows(range).collect();

      assert_eq!(all.len() as u32, window_count(range));
      assert_eq!(all.first().unwrap().range.from, range.from);
      assert_eq!(all.last().unwrap().range.to, range.to);
      for (i, w) in all.iter().enumerate() {
        assert_eq!(w.index as usize, i);
        assert!(w.range.days() >= 1 && w.range.days() <= WINDOW_DAYS);
      }
      for pair in all.windows(2) {
        assert_eq!(pair[0].range.next_day(), pair[1].range.from);
      }
    }
  }

  #[test]
  fn test_empty_range_has_no_windows() {
    let range = DateRange::new(d(2024, 1, 2), d(2024, 1, 1));
    assert_eq!(windows(range).count(), 0);
    assert_eq!(window_count(range), 0);
  }

  #[test]
  fn test_windows_are_lazy() {
    // A century of windows; only the first few are ever built
    let range = DateRange::new(d(1924, 1, 1), d(2024, 1, 1));
    let first: Vec<DateWindow> = windows(range).skip(2).take(1).collect();
    assert_eq!(first[0].index, 2);
    assert_eq!(first[0].range.from, d(1924, 1, 5));
  }

  #[test]
  fn test_window_containing() {
    let anchor = d(2024, 1, 1);
    assert_eq!(
      window_containing(anchor, d(2024, 1, 4), d(2024, 1, 31)),
      DateRange::new(d(2024, 1, 3), d(2024, 1, 4))
    );
    assert_eq!(
      window_containing(anchor, d(2024, 1, 5), d(2024, 1, 5)),
      DateRange::new(d(2024, 1, 5), d(2024, 1, 5))
    );
    assert_eq!(
      window_containing(anchor, d(2023, 12, 30), d(2024, 1, 31)),
      DateRange::new(d(2023, 12, 30), d(2023, 12, 30))
    );
  }
}
