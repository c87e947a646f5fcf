// The two-destructor idiom, re-architected (spec.md §9 DESIGN NOTES):
//
//   "raw frames carry two function pointers (release_data, release_frame) to
//    express that payload memory may be owned separately from the frame
//    struct (capture DMA buffer vs. heap frame). Re-architect as a sum type
//    Payload ∈ {Owned(buffer), Borrowed(device_slot_id)} with a single drop
//    that dispatches on the variant; the capture adapter supplies the
//    device-slot return hook."
//
// `Owned` is a plain heap buffer with no side effect on drop. `Borrowed`
// additionally carries the device-slot id and the adapter-supplied hook
// that returns the slot to the capture device's DMA ring; `Drop` calls it
// exactly once.

use std::fmt;
use std::sync::Arc;

pub type ReleaseHook = Arc<dyn Fn(u64) + Send + Sync>;

pub enum Payload {
    Owned(Vec<u8>),
    Borrowed {
        bytes: Arc<[u8]>,
        device_slot: u64,
        release: ReleaseHook,
    },
}

impl Payload {
    pub fn owned(bytes: Vec<u8>) -> Self {
        Payload::Owned(bytes)
    }

    pub fn borrowed(bytes: Arc<[u8]>, device_slot: u64, release: ReleaseHook) -> Self {
        Payload::Borrowed { bytes, device_slot, release }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Owned(v) => v.as_slice(),
            Payload::Borrowed { bytes, .. } => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Some(slot)` for a device-backed payload, used by tests and the
    /// shutdown path to confirm every borrowed slot was actually returned.
    pub fn device_slot(&self) -> Option<u64> {
        match self {
            Payload::Owned(_) => None,
            Payload::Borrowed { device_slot, .. } => Some(*device_slot),
        }
    }

    /// A heap copy of the bytes, owned independently of any device slot.
    /// Used by the input stage to retain a "last good frame" for
    /// `sdi_input.inject_frame_enable` repeats without holding a second
    /// reference into the capture device's DMA ring.
    pub fn duplicate(&self) -> Payload {
        Payload::Owned(self.as_slice().to_vec())
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Payload::Borrowed { device_slot, release, .. } = self {
            release(*device_slot);
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Owned(v) => f.debug_tuple("Owned").field(&v.len()).finish(),
            Payload::Borrowed { device_slot, bytes, .. } => f
                .debug_struct("Borrowed")
                .field("device_slot", device_slot)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn owned_has_no_release_side_effect() {
        let p = Payload::owned(vec![1, 2, 3]);
        assert_eq!(p.as_slice(), &[1, 2, 3]);
        assert_eq!(p.device_slot(), None);
        drop(p); // must not panic or touch any hook
    }

    #[test]
    fn borrowed_calls_release_hook_exactly_once_on_drop() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = Arc::clone(&calls);
        let hook: ReleaseHook = Arc::new(move |slot| {
            assert_eq!(slot, 7);
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        let bytes: Arc<[u8]> = Arc::from(vec![9u8; 4]);
        let p = Payload::borrowed(bytes, 7, hook);
        assert_eq!(p.device_slot(), Some(7));
        drop(p);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
