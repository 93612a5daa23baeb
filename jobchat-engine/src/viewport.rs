//! # Message list windowing
//!
//! Only a window of rows around the scroll position is materialized. Rows
//! outside the window are replaced by two spacers so that the total scroll
//! height never depends on which rows are attached.

use std::time::Duration;

use shared::config::ViewportConfig;
use shared::models::ConversationId;
use tokio::time::Instant;

/// Half-open index range `[start, end)` over a message sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
}

impl VisibleRange {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Spacer heights above and below the materialized rows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Padding {
    pub top: f64,
    pub bottom: f64,
}

fn usable_item_height(item_height: f64) -> Option<f64> {
    (item_height.is_finite() && item_height > 0.0).then_some(item_height)
}

/// Rows to materialize for a scroll position. Pure; the result is clamped
/// to `[0, sequence_length]` and its length is bounded by the viewport, not
/// by the sequence.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute_visible_range(
    sequence_length: usize,
    scroll_offset: f64,
    viewport_height: f64,
    item_height: f64,
    buffer: usize,
) -> VisibleRange {
    let Some(item_height) = usable_item_height(item_height) else {
        return VisibleRange::default();
    };
    let offset = if scroll_offset.is_finite() {
        scroll_offset.max(0.0)
    } else {
        0.0
    };
    let viewport = if viewport_height.is_finite() {
        viewport_height.max(0.0)
    } else {
        0.0
    };

    let first_visible = (offset / item_height).floor() as usize;
    let visible_rows = (viewport / item_height).ceil() as usize;

    let start = first_visible.saturating_sub(buffer).min(sequence_length);
    let end = first_visible
        .saturating_add(visible_rows)
        .saturating_add(buffer)
        .min(sequence_length)
        .max(start);

    VisibleRange { start, end }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_padding(range: VisibleRange, sequence_length: usize, item_height: f64) -> Padding {
    let Some(item_height) = usable_item_height(item_height) else {
        return Padding::default();
    };
    let below = sequence_length.saturating_sub(range.end);
    Padding {
        top: range.start as f64 * item_height,
        bottom: below as f64 * item_height,
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn total_height(sequence_length: usize, item_height: f64) -> f64 {
    usable_item_height(item_height).map_or(0.0, |height| sequence_length as f64 * height)
}

/// Last known scroll position of the open conversation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub conversation_id: ConversationId,
    pub offset: f64,
}

/// What the renderer should attach for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportFrame {
    pub range: VisibleRange,
    pub padding: Padding,
    /// Set when the renderer must jump to this offset (the bottom).
    pub scroll_to: Option<f64>,
}

/// Ephemeral view state of the open conversation.
#[derive(Debug, Clone)]
pub struct ViewportState {
    item_height: f64,
    viewport_height: f64,
    buffer: usize,
    anchor: Option<ScrollAnchor>,
    has_auto_scrolled: bool,
    auto_scroll_requested: bool,
    visible_range: VisibleRange,
}

impl ViewportState {
    #[must_use]
    pub fn new(config: &ViewportConfig) -> Self {
        Self {
            item_height: config.item_height,
            viewport_height: config.viewport_height,
            buffer: config.buffer_rows,
            anchor: None,
            has_auto_scrolled: false,
            auto_scroll_requested: false,
            visible_range: VisibleRange::default(),
        }
    }

    /// Switches to a conversation. Re-selecting the open one changes nothing.
    pub fn select(&mut self, conversation_id: ConversationId) -> bool {
        if self.conversation_id() == Some(conversation_id) {
            return false;
        }
        self.anchor = Some(ScrollAnchor {
            conversation_id,
            offset: 0.0,
        });
        self.has_auto_scrolled = false;
        self.auto_scroll_requested = false;
        self.visible_range = VisibleRange::default();
        true
    }

    pub fn clear(&mut self) {
        self.anchor = None;
        self.has_auto_scrolled = false;
        self.auto_scroll_requested = false;
        self.visible_range = VisibleRange::default();
    }

    /// A new message arrived while this conversation is open.
    pub fn request_auto_scroll(&mut self) {
        if self.anchor.is_some() {
            self.auto_scroll_requested = true;
        }
    }

    /// Records a (throttled) user scroll.
    pub fn on_scroll(&mut self, offset: f64) {
        if let Some(anchor) = self.anchor.as_mut() {
            anchor.offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
        }
    }

    pub fn resize(&mut self, viewport_height: f64) {
        self.viewport_height = viewport_height;
    }

    /// Computes the frame for the current sequence length.
    ///
    /// The first render of a conversation with rows, and the first render
    /// after an auto-scroll request, pin the offset to the bottom. After that
    /// the user's own scroll position is left alone.
    pub fn render(&mut self, sequence_length: usize) -> ViewportFrame {
        let mut scroll_to = None;
        let first_fill = !self.has_auto_scrolled && sequence_length > 0;
        if let Some(anchor) = self.anchor.as_mut()
            && (first_fill || self.auto_scroll_requested)
        {
            let bottom = (total_height(sequence_length, self.item_height) - self.viewport_height)
                .max(0.0);
            anchor.offset = bottom;
            scroll_to = Some(bottom);
            self.has_auto_scrolled = self.has_auto_scrolled || sequence_length > 0;
            self.auto_scroll_requested = false;
        }

        let offset = self.anchor.map_or(0.0, |anchor| anchor.offset);
        let range = compute_visible_range(
            sequence_length,
            offset,
            self.viewport_height,
            self.item_height,
            self.buffer,
        );
        self.visible_range = range;

        ViewportFrame {
            range,
            padding: compute_padding(range, sequence_length, self.item_height),
            scroll_to,
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.anchor.map(|anchor| anchor.conversation_id)
    }

    #[must_use]
    pub const fn anchor(&self) -> Option<ScrollAnchor> {
        self.anchor
    }

    #[must_use]
    pub const fn has_auto_scrolled(&self) -> bool {
        self.has_auto_scrolled
    }

    #[must_use]
    pub const fn visible_range(&self) -> VisibleRange {
        self.visible_range
    }
}

/// Rate limiter for scroll recomputation.
///
/// The first offset in a quiet period is applied immediately; offsets that
/// arrive during the interval are coalesced and the latest one is released
/// once the interval has elapsed.
#[derive(Debug, Clone)]
pub struct ScrollThrottle {
    interval: Duration,
    last_fired: Option<Instant>,
    pending: Option<f64>,
}

impl ScrollThrottle {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
            pending: None,
        }
    }

    /// Returns the offset to apply now, if any.
    pub fn offer(&mut self, offset: f64, now: Instant) -> Option<f64> {
        let ready = self
            .last_fired
            .is_none_or(|fired| now.saturating_duration_since(fired) >= self.interval);
        if ready {
            self.last_fired = Some(now);
            self.pending = None;
            Some(offset)
        } else {
            self.pending = Some(offset);
            None
        }
    }

    /// When the coalesced offset becomes due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending?;
        Some(self.last_fired.map_or_else(Instant::now, |fired| fired + self.interval))
    }

    /// Releases the coalesced offset once it is due.
    pub fn flush(&mut self, now: Instant) -> Option<f64> {
        let due = self.deadline()?;
        if now < due {
            return None;
        }
        self.last_fired = Some(now);
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ViewportConfig {
        ViewportConfig {
            item_height: 50.0,
            viewport_height: 500.0,
            buffer_rows: 2,
            scroll_throttle_ms: 100,
        }
    }

    #[test]
    fn range_is_clamped_and_bounded() {
        for length in [0, 1, 7, 100, 1_000, 100_000] {
            let total = total_height(length, 50.0);
            for offset in [0.0, total / 3.0, total / 2.0, total] {
                let range = compute_visible_range(length, offset, 500.0, 50.0, 2);
                assert!(range.start <= range.end);
                assert!(range.end <= length);
                assert!(range.len() <= 10 + 2 * 2);
            }
        }
    }

    #[test]
    fn range_size_is_independent_of_sequence_length() {
        let small = compute_visible_range(100, 2_000.0, 500.0, 50.0, 3);
        let large = compute_visible_range(100_000, 2_000.0, 500.0, 50.0, 3);
        assert_eq!(small, large);
        assert_eq!(small, VisibleRange { start: 37, end: 53 });
    }

    #[test]
    fn degenerate_inputs_yield_empty_range() {
        assert!(compute_visible_range(100, 0.0, 500.0, 0.0, 2).is_empty());
        assert!(compute_visible_range(100, 0.0, 500.0, f64::NAN, 2).is_empty());
        let range = compute_visible_range(100, f64::NAN, 500.0, 50.0, 2);
        assert_eq!(range, VisibleRange { start: 0, end: 12 });
    }

    #[test]
    fn padding_preserves_total_height() {
        let length = 1_000;
        let range = compute_visible_range(length, 10_000.0, 500.0, 50.0, 2);
        let padding = compute_padding(range, length, 50.0);

        #[allow(clippy::cast_precision_loss)]
        let rendered = range.len() as f64 * 50.0;
        let total = padding.top + rendered + padding.bottom;
        assert!((total - total_height(length, 50.0)).abs() < f64::EPSILON);
        assert!((padding.top - 198.0 * 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn first_render_pins_to_bottom_once() {
        let mut state = ViewportState::new(&config());
        let conversation = uuid::Uuid::new_v4();
        assert!(state.select(conversation));

        let frame = state.render(100);
        assert_eq!(frame.scroll_to, Some(4_500.0));
        assert_eq!(frame.range.end, 100);
        assert!(state.has_auto_scrolled());

        state.on_scroll(1_000.0);
        let frame = state.render(100);
        assert_eq!(frame.scroll_to, None);
        assert_eq!(frame.range.start, 18);
    }

    #[test]
    fn reselecting_same_conversation_does_not_scroll_again() {
        let mut state = ViewportState::new(&config());
        let conversation = uuid::Uuid::new_v4();
        state.select(conversation);
        state.render(40);
        state.on_scroll(0.0);

        assert!(!state.select(conversation));
        assert_eq!(state.render(40).scroll_to, None);
    }

    #[test]
    fn empty_first_render_waits_for_rows() {
        let mut state = ViewportState::new(&config());
        state.select(uuid::Uuid::new_v4());

        assert_eq!(state.render(0).scroll_to, None);
        assert!(!state.has_auto_scrolled());
        assert_eq!(state.render(30).scroll_to, Some(1_000.0));
    }

    #[test]
    fn auto_scroll_signal_overrides_manual_position() {
        let mut state = ViewportState::new(&config());
        state.select(uuid::Uuid::new_v4());
        state.render(30);
        state.on_scroll(0.0);

        state.request_auto_scroll();
        assert_eq!(state.render(31).scroll_to, Some(1_050.0));
        assert_eq!(state.render(31).scroll_to, None);
    }

    #[test]
    fn switching_conversation_resets_auto_scroll() {
        let mut state = ViewportState::new(&config());
        state.select(uuid::Uuid::new_v4());
        state.render(30);

        assert!(state.select(uuid::Uuid::new_v4()));
        assert!(!state.has_auto_scrolled());
        assert!(state.render(30).scroll_to.is_some());
    }

    #[test]
    fn throttle_fires_leading_edge_and_flushes_latest() {
        let start = Instant::now();
        let mut throttle = ScrollThrottle::new(Duration::from_millis(100));

        assert_eq!(throttle.offer(10.0, start), Some(10.0));
        assert_eq!(throttle.offer(20.0, start + Duration::from_millis(30)), None);
        assert_eq!(throttle.offer(30.0, start + Duration::from_millis(60)), None);
        assert_eq!(
            throttle.deadline(),
            Some(start + Duration::from_millis(100))
        );

        assert_eq!(throttle.flush(start + Duration::from_millis(90)), None);
        assert_eq!(throttle.flush(start + Duration::from_millis(100)), Some(30.0));
        assert_eq!(throttle.deadline(), None);
        assert_eq!(throttle.offer(40.0, start + Duration::from_millis(150)), None);
        assert_eq!(throttle.offer(50.0, start + Duration::from_millis(200)), Some(50.0));
    }
}
