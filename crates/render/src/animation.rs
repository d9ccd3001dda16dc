use std::collections::HashMap;

use foundation::ids::MarkerId;
use runtime::frame::Frame;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FadeInConfig {
    pub enabled: bool,
    /// Frames for one marker to go from `start_opacity` to fully opaque.
    pub frames: u32,
    /// Delay between consecutive markers, in frames.
    pub stagger_step: u32,
    /// Upper bound on any marker's stagger delay.
    pub max_stagger_frames: u32,
    /// Opacity markers are attached with while slices are still arriving.
    pub start_opacity: f32,
}

impl Default for FadeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frames: 4,
            stagger_step: 1,
            max_stagger_frames: 12,
            start_opacity: 0.4,
        }
    }
}

impl FadeInConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Opacity a newly attached marker starts at.
    pub fn initial_opacity(&self) -> f32 {
        if self.enabled { self.start_opacity } else { 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    id: MarkerId,
    start: u64,
    seq: u64,
}

/// Staggered opacity ramp that runs after the final slice of a pass.
///
/// Purely cosmetic: markers are attached and interactive before their ramp
/// starts, and dropping the animation leaves them at their start opacity.
///
/// `active` maps each fading id to the sequence number of its current entry;
/// `forget` only touches the map, and `advance` drops entries whose id is no
/// longer active, so removing a marker costs O(1) however many are fading.
#[derive(Debug, Clone, Default)]
pub struct FadeIn {
    config: FadeInConfig,
    entries: Vec<Entry>,
    active: HashMap<MarkerId, u64>,
    next_seq: u64,
}

impl FadeIn {
    pub fn new(config: FadeInConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> FadeInConfig {
        self.config
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Markers still waiting for or running their ramp.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn start(&mut self, frame: Frame, ids: impl IntoIterator<Item = MarkerId>) {
        if !self.config.enabled {
            return;
        }
        for (i, id) in ids.into_iter().enumerate() {
            let delay = (i as u64)
                .saturating_mul(u64::from(self.config.stagger_step))
                .min(u64::from(self.config.max_stagger_frames));
            let seq = self.next_seq;
            self.next_seq += 1;
            self.active.insert(id.clone(), seq);
            self.entries.push(Entry {
                id,
                start: frame.index + 1 + delay,
                seq,
            });
        }
    }

    pub fn forget(&mut self, id: &MarkerId) {
        self.active.remove(id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.active.clear();
    }

    /// Opacity for every marker whose ramp moved on this frame.
    pub fn advance(&mut self, frame: Frame) -> Vec<(MarkerId, f32)> {
        let frames = self.config.frames.max(1) as f32;
        let from = self.config.start_opacity;
        let mut out = Vec::new();
        let active = &mut self.active;
        self.entries.retain(|e| {
            if active.get(&e.id) != Some(&e.seq) {
                return false;
            }
            if frame.index < e.start {
                return true;
            }
            let t = ((frame.index - e.start + 1) as f32 / frames).min(1.0);
            out.push((e.id.clone(), from + (1.0 - from) * t));
            if t < 1.0 {
                return true;
            }
            active.remove(&e.id);
            false
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{FadeIn, FadeInConfig};
    use foundation::ids::MarkerId;
    use foundation::time::Timestamp;
    use runtime::frame::Frame;

    fn frame(index: u64) -> Frame {
        Frame::new(index, Timestamp::from_millis(index * 16))
    }

    #[test]
    fn ramps_to_opaque_with_stagger() {
        let mut fade = FadeIn::new(FadeInConfig {
            frames: 2,
            stagger_step: 1,
            ..FadeInConfig::default()
        });
        fade.start(frame(10), [MarkerId::property("a"), MarkerId::property("b")]);

        let f11 = fade.advance(frame(11));
        assert_eq!(f11, vec![(MarkerId::property("a"), 0.7)]);
        let f12 = fade.advance(frame(12));
        assert_eq!(
            f12,
            vec![(MarkerId::property("a"), 1.0), (MarkerId::property("b"), 0.7)]
        );
        let f13 = fade.advance(frame(13));
        assert_eq!(f13, vec![(MarkerId::property("b"), 1.0)]);
        assert!(!fade.is_active());
    }

    #[test]
    fn disabled_fade_never_starts() {
        let mut fade = FadeIn::new(FadeInConfig::disabled());
        fade.start(frame(0), [MarkerId::property("a")]);
        assert!(!fade.is_active());
        assert_eq!(FadeInConfig::disabled().initial_opacity(), 1.0);
    }

    #[test]
    fn forgotten_markers_drop_out_of_the_ramp() {
        let mut fade = FadeIn::new(FadeInConfig {
            frames: 2,
            stagger_step: 0,
            ..FadeInConfig::default()
        });
        fade.start(frame(0), (0..3).map(|i| MarkerId::property(i.to_string())));
        assert_eq!(fade.len(), 3);

        fade.forget(&MarkerId::property("1"));
        assert_eq!(fade.len(), 2);
        let ids: Vec<_> = fade.advance(frame(1)).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![MarkerId::property("0"), MarkerId::property("2")]);
    }

    #[test]
    fn restarted_marker_follows_its_latest_ramp() {
        let mut fade = FadeIn::new(FadeInConfig {
            frames: 2,
            ..FadeInConfig::default()
        });
        fade.start(frame(0), [MarkerId::property("a")]);
        fade.forget(&MarkerId::property("a"));
        fade.start(frame(5), [MarkerId::property("a")]);

        assert!(fade.advance(frame(1)).is_empty());
        assert_eq!(fade.advance(frame(6)), vec![(MarkerId::property("a"), 0.7)]);
        assert_eq!(fade.advance(frame(7)), vec![(MarkerId::property("a"), 1.0)]);
        assert!(!fade.is_active());
    }
}
