//! Gain ramp descriptors
//!
//! A [`Ramp`] is attached to each decoded audio message and describes a
//! linear progression of the ramp value from `start` to `end` across that
//! message. Values live in `[0, Ramp::MAX]`; the gain actually applied at
//! each sample is the configured [`RampCurve`](ohpipe_common::RampCurve)
//! evaluated at `value / MAX` when the message is rendered.
//!
//! Several elements may ramp the same audio. When a message that already
//! carries a ramp is ramped again, the quieter value wins at both ends, so
//! one element's fade can never make another's audible.

/// Direction of a ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampDirection {
    /// No ramp: full gain
    None,
    /// Gain increasing
    Up,
    /// Gain decreasing
    Down,
    /// Zero gain throughout
    Mute,
}

/// Linear ramp applied across one audio message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ramp {
    start: u32,
    end: u32,
    direction: RampDirection,
}

impl Default for Ramp {
    fn default() -> Self {
        Self::none()
    }
}

impl Ramp {
    /// Full gain
    pub const MAX: u32 = 1 << 28;
    /// Silence
    pub const MIN: u32 = 0;

    /// A message with no ramp
    pub fn none() -> Self {
        Self {
            start: Self::MAX,
            end: Self::MAX,
            direction: RampDirection::None,
        }
    }

    /// A message muted throughout
    pub fn mute() -> Self {
        Self {
            start: Self::MIN,
            end: Self::MIN,
            direction: RampDirection::Mute,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn direction(&self) -> RampDirection {
        self.direction
    }

    /// Whether this ramp alters gain at all
    pub fn is_enabled(&self) -> bool {
        self.direction != RampDirection::None
    }

    /// Apply a ramp step to a message of `fragment` jiffies
    ///
    /// `start` is the current ramp value and `remaining` the jiffies left in
    /// the overall ramp. Returns the ramp value reached at the end of this
    /// fragment, which the caller feeds into the next fragment. If this
    /// message was already ramped, the quieter value is kept at each end.
    pub fn set(
        &mut self,
        start: u32,
        fragment: u64,
        remaining: u64,
        direction: RampDirection,
    ) -> u32 {
        let start = start.min(Self::MAX);
        let end = match direction {
            RampDirection::None => Self::MAX,
            RampDirection::Mute => Self::MIN,
            RampDirection::Up => {
                if fragment >= remaining {
                    Self::MAX
                } else {
                    let step = (Self::MAX - start) as u64 * fragment / remaining;
                    start + step as u32
                }
            }
            RampDirection::Down => {
                if fragment >= remaining {
                    Self::MIN
                } else {
                    let step = start as u64 * fragment / remaining;
                    start - step as u32
                }
            }
        };
        let (new_start, new_end) = match direction {
            RampDirection::Mute => (Self::MIN, Self::MIN),
            RampDirection::None => (Self::MAX, Self::MAX),
            _ => (start, end),
        };

        if self.direction == RampDirection::None {
            self.start = new_start;
            self.end = new_end;
            self.direction = direction;
        } else {
            self.start = self.start.min(new_start);
            self.end = self.end.min(new_end);
            self.direction = Self::direction_between(self.start, self.end, direction);
        }
        end
    }

    fn direction_between(start: u32, end: u32, requested: RampDirection) -> RampDirection {
        if end > start {
            RampDirection::Up
        } else if end < start {
            RampDirection::Down
        } else if start == Self::MIN {
            RampDirection::Mute
        } else {
            requested
        }
    }

    /// Ramp value `offset` jiffies into a message of `length` jiffies
    pub fn value_at(&self, offset: u64, length: u64) -> u32 {
        if length == 0 || offset == 0 {
            return self.start;
        }
        if offset >= length {
            return self.end;
        }
        let delta = self.end as i64 - self.start as i64;
        let value = self.start as i64 + delta * offset as i64 / length as i64;
        value.clamp(Self::MIN as i64, Self::MAX as i64) as u32
    }

    /// Split this ramp at `offset` of `length`; `self` keeps the head
    pub fn split(&mut self, offset: u64, length: u64) -> Ramp {
        let mid = self.value_at(offset, length);
        let tail = Ramp {
            start: mid,
            end: self.end,
            direction: Self::direction_between(mid, self.end, self.direction),
        };
        self.end = mid;
        self.direction = Self::direction_between(self.start, mid, self.direction);
        tail
    }

    /// Ramp position in `[0, 1]` for gain curve evaluation
    pub fn position(value: u32) -> f32 {
        value as f32 / Self::MAX as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_full_gain() {
        let ramp = Ramp::none();
        assert!(!ramp.is_enabled());
        assert_eq!(ramp.start(), Ramp::MAX);
        assert_eq!(ramp.end(), Ramp::MAX);
    }

    #[test]
    fn test_ramp_down_across_two_fragments() {
        let mut first = Ramp::none();
        let mid = first.set(Ramp::MAX, 500, 1000, RampDirection::Down);
        assert_eq!(mid, Ramp::MAX / 2);
        assert_eq!(first.direction(), RampDirection::Down);

        let mut second = Ramp::none();
        let end = second.set(mid, 500, 500, RampDirection::Down);
        assert_eq!(end, Ramp::MIN);
        assert_eq!(second.start(), mid);
        assert_eq!(second.end(), Ramp::MIN);
    }

    #[test]
    fn test_ramp_up_reaches_max() {
        let mut ramp = Ramp::none();
        let end = ramp.set(Ramp::MIN, 2000, 1000, RampDirection::Up);
        assert_eq!(end, Ramp::MAX);
        assert_eq!(ramp.direction(), RampDirection::Up);
    }

    #[test]
    fn test_combined_ramps_keep_quieter_ends() {
        let mut ramp = Ramp::none();
        ramp.set(Ramp::MIN, 1000, 1000, RampDirection::Up);
        ramp.set(Ramp::MAX, 1000, 1000, RampDirection::Down);

        // min(0, MAX) at the start, min(MAX, 0) at the end
        assert_eq!(ramp.start(), Ramp::MIN);
        assert_eq!(ramp.end(), Ramp::MIN);
        assert_eq!(ramp.direction(), RampDirection::Mute);
    }

    #[test]
    fn test_combined_ramp_never_louder() {
        let mut ramp = Ramp::none();
        ramp.set(Ramp::MAX / 2, 100, 200, RampDirection::Down);
        let (start, end) = (ramp.start(), ramp.end());
        ramp.set(Ramp::MAX, 100, 1000, RampDirection::Down);
        assert!(ramp.start() <= start);
        assert!(ramp.end() <= end);
    }

    #[test]
    fn test_mute_overrides() {
        let mut ramp = Ramp::none();
        ramp.set(Ramp::MAX, 100, 1000, RampDirection::Down);
        ramp.set(Ramp::MAX, 100, 1000, RampDirection::Mute);
        assert_eq!(ramp, Ramp::mute());
    }

    #[test]
    fn test_split_interpolates() {
        let mut head = Ramp::none();
        head.set(Ramp::MAX, 1000, 1000, RampDirection::Down);
        let tail = head.split(250, 1000);

        assert_eq!(head.start(), Ramp::MAX);
        assert_eq!(head.end(), Ramp::MAX / 4 * 3);
        assert_eq!(tail.start(), head.end());
        assert_eq!(tail.end(), Ramp::MIN);
        assert_eq!(tail.direction(), RampDirection::Down);
    }

    #[test]
    fn test_split_unramped_stays_unramped() {
        let mut head = Ramp::none();
        let tail = head.split(10, 100);
        assert!(!head.is_enabled());
        assert!(!tail.is_enabled());
    }
}
