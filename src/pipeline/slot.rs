//! Latest-wins handoff of processed frames to the presenter

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use wgpu::{Texture, TextureView};

use crate::layout::Size;

/// Fully processed texture, ready to present
pub struct ProcessedFrame {
    pub sequence: u64,
    pub size: Size,
    pub texture: Texture,
    pub view: TextureView,
}

impl ProcessedFrame {
    pub fn new(sequence: u64, texture: Texture) -> Self {
        let view = texture.create_view(&Default::default());
        Self {
            sequence,
            size: Size::new(texture.width(), texture.height()),
            texture,
            view,
        }
    }
}

struct Entry<T> {
    value: Arc<T>,
    presented: AtomicBool,
}

/// Single-slot, overwrite-on-publish mailbox. No queue: a value published before the
/// previous one was presented replaces it.
pub struct PublishedSlot<T = ProcessedFrame> {
    slot: ArcSwapOption<Entry<T>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    published: AtomicU64,
    presented: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub published: u64,
    pub presented: u64,
    /// Values replaced before the presenter ever saw them
    pub skipped: u64,
}

impl<T> PublishedSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the current value
    pub fn publish(&self, value: Arc<T>) {
        let previous = self.slot.swap(Some(Arc::new(Entry {
            value,
            presented: AtomicBool::new(false),
        })));
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = previous {
            if !previous.presented.load(Ordering::Acquire) {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Presenter: take the newest value and mark it presented
    pub fn acquire(&self) -> Option<Arc<T>> {
        let entry = self.slot.load_full()?;
        if !entry.presented.swap(true, Ordering::AcqRel) {
            self.stats.presented.fetch_add(1, Ordering::Relaxed);
        }
        Some(entry.value.clone())
    }

    /// Newest value without marking it presented
    pub fn latest(&self) -> Option<Arc<T>> {
        self.slot.load_full().map(|entry| entry.value.clone())
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            published: self.stats.published.load(Ordering::Relaxed),
            presented: self.stats.presented.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for PublishedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_has_nothing_to_present() {
        let slot = PublishedSlot::<u64>::new();
        assert!(slot.acquire().is_none());
        assert!(slot.latest().is_none());
        assert_eq!(slot.stats(), SlotStats::default());
    }

    #[test]
    fn latest_publish_wins() {
        let slot = PublishedSlot::new();
        slot.publish(Arc::new(1u64));
        slot.publish(Arc::new(2u64));
        slot.publish(Arc::new(3u64));
        assert_eq!(*slot.acquire().unwrap(), 3);
        assert_eq!(
            slot.stats(),
            SlotStats {
                published: 3,
                presented: 1,
                skipped: 2
            }
        );
    }

    #[test]
    fn slow_producer_repeats_the_same_value() {
        let slot = PublishedSlot::new();
        slot.publish(Arc::new(7u64));
        for _ in 0..3 {
            assert_eq!(*slot.acquire().unwrap(), 7);
        }
        slot.publish(Arc::new(8u64));
        assert_eq!(slot.stats().presented, 1);
        assert_eq!(slot.stats().skipped, 0);
    }

    #[test]
    fn latest_does_not_count_as_presented() {
        let slot = PublishedSlot::new();
        slot.publish(Arc::new(1u64));
        assert_eq!(*slot.latest().unwrap(), 1);
        slot.publish(Arc::new(2u64));
        assert_eq!(slot.stats().skipped, 1);
    }

    #[test]
    fn concurrent_publish_and_acquire() {
        let slot = Arc::new(PublishedSlot::new());
        let producer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    slot.publish(Arc::new(i));
                }
            })
        };
        let mut last = 0;
        while !producer.is_finished() {
            if let Some(v) = slot.acquire() {
                assert!(*v >= last, "values never go backwards");
                last = *v;
            }
        }
        producer.join().unwrap();
        let stats = slot.stats();
        assert_eq!(stats.published, 1000);
        assert_eq!(*slot.latest().unwrap(), 999);
    }
}
