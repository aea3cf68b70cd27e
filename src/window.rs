//! Keeps a small contiguous window of items mounted around the current one.

use std::collections::HashSet;
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::model::FeedItem;

/// Indices mounted for `current` in a list of `len` items: `size / 2` on
/// each side, clipped to the list.
pub fn mounted_range(current: usize, len: usize, size: usize) -> Range<usize> {
    if len == 0 {
        return 0..0;
    }
    let half = size.max(1) / 2;
    let current = current.min(len - 1);
    let start = current.saturating_sub(half);
    let end = (current + half + 1).min(len);
    start..end
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub index: usize,
    pub id: String,
    /// Position relative to the viewport in item heights. 0 is on screen,
    /// 1 is one page below. Fractional while a transition runs.
    pub offset: f64,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowDiff {
    pub entered: Vec<String>,
    pub left: Vec<String>,
}

impl WindowDiff {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

/// Eased slide between two index positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTransition {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl SlideTransition {
    pub fn new(from: f64, to: f64, started: Instant, duration: Duration) -> Self {
        Self {
            from,
            to,
            started,
            duration,
        }
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        let progress = self.progress(now);
        self.from + (self.to - self.from) * ease_in_out(progress)
    }

    pub fn is_done(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }

    fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}

fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

pub struct WindowedRenderer {
    size: usize,
    transition_duration: Duration,
    mounted: Vec<(usize, String)>,
    current: usize,
    transition: Option<SlideTransition>,
}

impl WindowedRenderer {
    pub fn new(size: usize, transition_duration: Duration) -> Self {
        let size = size.max(1);
        Self {
            size: if size % 2 == 0 { size + 1 } else { size },
            transition_duration,
            mounted: Vec::new(),
            current: 0,
            transition: None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_animating(&self, now: Instant) -> bool {
        self.transition.is_some_and(|slide| !slide.is_done(now))
    }

    /// Recomputes the mounted set for `current`. Items are keyed by id so a
    /// replaced list unmounts everything that is no longer present even
    /// when the indices overlap.
    pub fn reconcile(&mut self, items: &[FeedItem], current: usize, now: Instant) -> WindowDiff {
        let range = mounted_range(current, items.len(), self.size);
        let next: Vec<(usize, String)> = items[range.clone()]
            .iter()
            .enumerate()
            .map(|(i, item)| (range.start + i, item.id.clone()))
            .collect();

        let before: HashSet<&str> = self.mounted.iter().map(|(_, id)| id.as_str()).collect();
        let after: HashSet<&str> = next.iter().map(|(_, id)| id.as_str()).collect();
        let diff = WindowDiff {
            entered: next
                .iter()
                .filter(|(_, id)| !before.contains(id.as_str()))
                .map(|(_, id)| id.clone())
                .collect(),
            left: self
                .mounted
                .iter()
                .filter(|(_, id)| !after.contains(id.as_str()))
                .map(|(_, id)| id.clone())
                .collect(),
        };

        if current != self.current && !items.is_empty() {
            let from = self
                .transition
                .map(|slide| slide.position_at(now))
                .unwrap_or(self.current as f64);
            self.transition = Some(SlideTransition::new(
                from,
                current as f64,
                now,
                self.transition_duration,
            ));
        }
        if items.is_empty() {
            self.transition = None;
        }
        self.current = current;
        self.mounted = next;

        if !diff.is_empty() {
            tracing::debug!(
                entered = diff.entered.len(),
                left = diff.left.len(),
                range = ?range,
                "window reconciled"
            );
        }
        diff
    }

    /// Mounted items with their offsets at `now`.
    pub fn slots(&self, now: Instant) -> Vec<Slot> {
        let position = self
            .transition
            .map(|slide| slide.position_at(now))
            .unwrap_or(self.current as f64);
        self.mounted
            .iter()
            .map(|(index, id)| Slot {
                index: *index,
                id: id.clone(),
                offset: *index as f64 - position,
                active: *index == self.current,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::items;

    #[test]
    fn range_is_clipped_at_edges() {
        assert_eq!(mounted_range(0, 10, 5), 0..3);
        assert_eq!(mounted_range(5, 10, 5), 3..8);
        assert_eq!(mounted_range(9, 10, 5), 7..10);
        assert_eq!(mounted_range(0, 0, 5), 0..0);
        assert_eq!(mounted_range(7, 3, 5), 0..3);
    }

    #[test]
    fn even_sizes_are_rounded_up() {
        let renderer = WindowedRenderer::new(4, Duration::ZERO);
        assert_eq!(renderer.size(), 5);
    }

    #[test]
    fn stepping_forward_mounts_one_and_unmounts_one() {
        let now = Instant::now();
        let list = items(&["a", "b", "c", "d", "e", "f", "g"]);
        let mut renderer = WindowedRenderer::new(5, Duration::ZERO);
        let first = renderer.reconcile(&list, 2, now);
        assert_eq!(first.entered, vec!["a", "b", "c", "d", "e"]);
        assert!(first.left.is_empty());

        let next = renderer.reconcile(&list, 3, now);
        assert_eq!(next.entered, vec!["f"]);
        assert_eq!(next.left, vec!["a"]);
    }

    #[test]
    fn replaced_list_unmounts_by_id() {
        let now = Instant::now();
        let mut renderer = WindowedRenderer::new(5, Duration::ZERO);
        renderer.reconcile(&items(&["a", "b", "c"]), 0, now);
        let diff = renderer.reconcile(&items(&["x", "b"]), 0, now);
        assert_eq!(diff.entered, vec!["x"]);
        assert_eq!(diff.left, vec!["a", "c"]);
    }

    #[test]
    fn offsets_slide_towards_new_index() {
        let now = Instant::now();
        let list = items(&["a", "b", "c"]);
        let mut renderer = WindowedRenderer::new(5, Duration::from_millis(500));
        renderer.reconcile(&list, 0, now);
        renderer.reconcile(&list, 1, now);

        let start = renderer.slots(now);
        assert_eq!(start[1].offset, 1.0);
        assert!(start[1].active);

        let mid = renderer.slots(now + Duration::from_millis(250));
        assert!(mid[1].offset > 0.0 && mid[1].offset < 1.0);

        let end = renderer.slots(now + Duration::from_millis(500));
        assert_eq!(end[1].offset, 0.0);
        assert_eq!(end[0].offset, -1.0);
        assert!(!renderer.is_animating(now + Duration::from_millis(500)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn range_is_contiguous_bounded_and_contains_current(
            len in 1usize..50,
            current in 0usize..50,
            size in 1usize..9,
        ) {
            let current = current % len;
            let odd = if size % 2 == 0 { size + 1 } else { size };
            let range = mounted_range(current, len, odd);
            prop_assert!(range.len() <= odd);
            prop_assert!(range.contains(&current));
            prop_assert!(range.end <= len);
            let half = odd / 2;
            prop_assert_eq!(range.start, current.saturating_sub(half));
            prop_assert_eq!(range.end, (current + half + 1).min(len));
        }
    }
}
